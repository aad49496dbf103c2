//! Token codec: binary layout, HMAC-SHA256 signing and verification.
//!
//! # Layout (big-endian)
//!
//! ```text
//! u8      version (0x01)
//! u8      key id length k
//! [k]     key id (UTF-8)
//! [16]    token id
//! u64     issued-at
//! u64     expires-at
//! u16     principal id length p
//! [p]     principal id (UTF-8)
//! [32]    HMAC-SHA256 over every preceding byte
//! ```
//!
//! The key id travels in cleartext so verification goes straight to the
//! right key. The MAC covers the key id, timestamps and token id, so none of
//! them can be swapped or truncated without failing verification.
//!
//! Decoding checks the layout first ([`CodecError::Malformed`]), then the
//! signature ([`CodecError::BadSignature`]), then expiry
//! ([`CodecError::Expired`]). Field contents are only interpreted after the
//! signature has been verified.

use std::sync::Arc;
use std::time::Duration;

use hmac::{Hmac, KeyInit, Mac};
use sha2::Sha256;

use super::{SessionToken, TokenId, TokenPayload};
use crate::error::AuthError;
use crate::keys::{KeyManager, MAX_KEY_ID_LEN, SigningKey};

type HmacSha256 = Hmac<Sha256>;

/// Current wire format version.
pub const TOKEN_VERSION: u8 = 0x01;

/// Maximum principal identifier length in bytes.
pub const MAX_PRINCIPAL_LEN: usize = 1024;

const MAC_LEN: usize = 32;

/// Codec failures.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Byte layout unrecognized.
    #[error("malformed token: {0}")]
    Malformed(&'static str),
    /// MAC mismatch, or the signing key is unknown or out of its window.
    #[error("bad signature")]
    BadSignature,
    /// `expires_at` is in the past.
    #[error("token expired")]
    Expired,
    /// Principal id empty or too long to encode.
    #[error("principal id must be 1..={MAX_PRINCIPAL_LEN} bytes")]
    InvalidPrincipal,
}

impl From<CodecError> for AuthError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Malformed(reason) => Self::Malformed(reason.to_string()),
            CodecError::BadSignature => Self::BadSignature,
            CodecError::Expired => Self::Expired,
            CodecError::InvalidPrincipal => Self::Malformed(err.to_string()),
        }
    }
}

/// A freshly issued token and its decoded contents.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// Signed token bytes for the client.
    pub token: SessionToken,
    /// What the token carries (including the signing key id).
    pub payload: TokenPayload,
}

/// Issues and decodes session tokens with keys from a [`KeyManager`].
#[derive(Clone)]
pub struct TokenCodec {
    keys: Arc<KeyManager>,
}

impl TokenCodec {
    /// Create a codec over `keys`.
    #[must_use]
    pub fn new(keys: Arc<KeyManager>) -> Self {
        Self { keys }
    }

    /// Issue a token for `principal_id`, valid from `now` for `ttl`.
    pub fn issue(&self, principal_id: &str, now: u64, ttl: Duration) -> Result<IssuedToken, CodecError> {
        if principal_id.is_empty() || principal_id.len() > MAX_PRINCIPAL_LEN {
            return Err(CodecError::InvalidPrincipal);
        }

        let key = self.keys.current_key();
        let payload = TokenPayload {
            token_id: TokenId::generate(),
            principal_id: principal_id.to_string(),
            issued_at: now,
            expires_at: now.saturating_add(ttl_secs(ttl)),
            key_id: key.id().to_string(),
        };

        let mut buf = encode_body(&payload);
        let tag = sign(&key, &buf)?;
        buf.extend_from_slice(&tag);

        Ok(IssuedToken {
            token: SessionToken::from_bytes(buf),
            payload,
        })
    }

    /// Decode and verify `bytes` at time `now`.
    pub fn decode(&self, bytes: &[u8], now: u64) -> Result<TokenPayload, CodecError> {
        let raw = RawToken::parse(bytes)?;

        let key_id =
            std::str::from_utf8(raw.key_id).map_err(|_| CodecError::Malformed("key id encoding"))?;
        let key = self.keys.find(key_id, now).ok_or(CodecError::BadSignature)?;
        verify(&key, raw.signed, raw.tag)?;

        let principal_id = std::str::from_utf8(raw.principal_id)
            .map_err(|_| CodecError::Malformed("principal id encoding"))?;

        if raw.expires_at < now {
            return Err(CodecError::Expired);
        }

        Ok(TokenPayload {
            token_id: TokenId::from_bytes(raw.token_id),
            principal_id: principal_id.to_string(),
            issued_at: raw.issued_at,
            expires_at: raw.expires_at,
            key_id: key_id.to_string(),
        })
    }
}

/// Whole seconds, rounding a fractional remainder up.
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs()
        .saturating_add(u64::from(ttl.subsec_nanos() > 0))
}

fn encode_body(payload: &TokenPayload) -> Vec<u8> {
    let key_id = payload.key_id.as_bytes();
    let principal = payload.principal_id.as_bytes();
    let mut buf = Vec::with_capacity(36 + key_id.len() + principal.len() + MAC_LEN);

    buf.push(TOKEN_VERSION);
    // Both lengths are bounded by MAX_KEY_ID_LEN / MAX_PRINCIPAL_LEN.
    #[allow(clippy::cast_possible_truncation)]
    buf.push(key_id.len() as u8);
    buf.extend_from_slice(key_id);
    buf.extend_from_slice(payload.token_id.as_bytes());
    buf.extend_from_slice(&payload.issued_at.to_be_bytes());
    buf.extend_from_slice(&payload.expires_at.to_be_bytes());
    #[allow(clippy::cast_possible_truncation)]
    buf.extend_from_slice(&(principal.len() as u16).to_be_bytes());
    buf.extend_from_slice(principal);
    buf
}

fn keyed_mac(key: &SigningKey, data: &[u8]) -> Result<HmacSha256, CodecError> {
    let mut mac = HmacSha256::new_from_slice(key.material()).map_err(|_| CodecError::BadSignature)?;
    mac.update(data);
    Ok(mac)
}

fn sign(key: &SigningKey, data: &[u8]) -> Result<Vec<u8>, CodecError> {
    Ok(keyed_mac(key, data)?.finalize().into_bytes().to_vec())
}

fn verify(key: &SigningKey, data: &[u8], tag: &[u8]) -> Result<(), CodecError> {
    keyed_mac(key, data)?
        .verify_slice(tag)
        .map_err(|_| CodecError::BadSignature)
}

/// Token split into its fields, before the signature is checked.
struct RawToken<'a> {
    key_id: &'a [u8],
    token_id: [u8; 16],
    issued_at: u64,
    expires_at: u64,
    principal_id: &'a [u8],
    signed: &'a [u8],
    tag: &'a [u8],
}

impl<'a> RawToken<'a> {
    fn parse(bytes: &'a [u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);

        if r.u8()? != TOKEN_VERSION {
            return Err(CodecError::Malformed("unknown version"));
        }

        let key_len = usize::from(r.u8()?);
        if key_len == 0 || key_len > MAX_KEY_ID_LEN {
            return Err(CodecError::Malformed("key id length"));
        }
        let key_id = r.take(key_len)?;

        let mut token_id = [0u8; 16];
        token_id.copy_from_slice(r.take(16)?);
        let issued_at = r.u64()?;
        let expires_at = r.u64()?;

        let principal_len = usize::from(r.u16()?);
        if principal_len == 0 || principal_len > MAX_PRINCIPAL_LEN {
            return Err(CodecError::Malformed("principal id length"));
        }
        let principal_id = r.take(principal_len)?;

        let signed_len = r.position();
        let tag = r.take(MAC_LEN)?;
        if !r.is_empty() {
            return Err(CodecError::Malformed("trailing bytes"));
        }

        Ok(Self {
            key_id,
            token_id,
            issued_at,
            expires_at,
            principal_id,
            signed: &bytes[..signed_len],
            tag,
        })
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or(CodecError::Malformed("truncated"))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        let mut b = [0u8; 2];
        b.copy_from_slice(self.take(2)?);
        Ok(u16::from_be_bytes(b))
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        let mut b = [0u8; 8];
        b.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(b))
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn is_empty(&self) -> bool {
        self.pos == self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    fn codec() -> (TokenCodec, Arc<KeyManager>) {
        let keys = Arc::new(KeyManager::new(SigningKey::new("k1", vec![1; 32]).unwrap()));
        (TokenCodec::new(Arc::clone(&keys)), keys)
    }

    #[test]
    fn issue_then_decode_returns_payload() {
        // GIVEN: a token for alice issued at t=1000
        let (codec, _) = codec();
        let issued = codec.issue("alice", 1_000, HOUR).unwrap();

        // WHEN: decoded shortly after
        let payload = codec.decode(issued.token.as_bytes(), 1_010).unwrap();

        // THEN: every field survives
        assert_eq!(payload, issued.payload);
        assert_eq!(payload.principal_id, "alice");
        assert_eq!(payload.issued_at, 1_000);
        assert_eq!(payload.expires_at, 4_600);
        assert_eq!(payload.key_id, "k1");
    }

    #[test]
    fn token_ids_are_unique() {
        let (codec, _) = codec();
        let a = codec.issue("alice", 0, HOUR).unwrap();
        let b = codec.issue("alice", 0, HOUR).unwrap();
        assert_ne!(a.payload.token_id, b.payload.token_id);
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn expiry_is_checked_after_signature() {
        let (codec, _) = codec();
        let issued = codec.issue("alice", 1_000, HOUR).unwrap();

        assert!(codec.decode(issued.token.as_bytes(), 4_600).is_ok());
        assert_eq!(
            codec.decode(issued.token.as_bytes(), 4_601),
            Err(CodecError::Expired)
        );
    }

    #[test]
    fn fractional_ttl_rounds_up_to_whole_seconds() {
        let (codec, _) = codec();
        let issued = codec.issue("alice", 1_000, Duration::from_millis(500)).unwrap();
        assert_eq!(issued.payload.expires_at, 1_001);
        assert!(codec.decode(issued.token.as_bytes(), 1_000).is_ok());

        let issued = codec.issue("alice", 1_000, Duration::from_millis(2_001)).unwrap();
        assert_eq!(issued.payload.expires_at, 1_003);
    }

    #[test]
    fn every_single_byte_flip_is_rejected() {
        // GIVEN: a valid token
        let (codec, _) = codec();
        let issued = codec.issue("alice", 1_000, HOUR).unwrap();
        let bytes = issued.token.into_bytes();

        // WHEN/THEN: flipping any one byte makes decode fail
        for i in 0..bytes.len() {
            let mut tampered = bytes.clone();
            tampered[i] ^= 0x01;
            let result = codec.decode(&tampered, 1_010);
            assert!(result.is_err(), "byte {i} flip was accepted");
            assert_ne!(result, Err(CodecError::Expired), "byte {i}");
        }
    }

    #[test]
    fn layout_errors_are_malformed() {
        let (codec, _) = codec();
        let bytes = codec.issue("alice", 0, HOUR).unwrap().token.into_bytes();

        assert!(matches!(codec.decode(&[], 0), Err(CodecError::Malformed(_))));
        assert!(matches!(
            codec.decode(&bytes[..bytes.len() - 1], 0),
            Err(CodecError::Malformed("truncated"))
        ));

        let mut extended = bytes.clone();
        extended.push(0);
        assert_eq!(codec.decode(&extended, 0), Err(CodecError::Malformed("trailing bytes")));

        let mut wrong_version = bytes;
        wrong_version[0] = 0x02;
        assert_eq!(
            codec.decode(&wrong_version, 0),
            Err(CodecError::Malformed("unknown version"))
        );
    }

    #[test]
    fn token_signed_by_unknown_key_is_bad_signature() {
        // GIVEN: a token from a different key ring that happens to use the same id
        let (codec, _) = codec();
        let other_keys = Arc::new(KeyManager::new(SigningKey::new("k1", vec![2; 32]).unwrap()));
        let foreign = TokenCodec::new(other_keys).issue("alice", 0, HOUR).unwrap();

        // THEN: signature check fails
        assert_eq!(
            codec.decode(foreign.token.as_bytes(), 1),
            Err(CodecError::BadSignature)
        );
    }

    #[test]
    fn grace_key_verifies_until_window_closes() {
        // GIVEN: a token under k1, then rotation to k2 with 10 minutes grace at t=100
        let (codec, keys) = codec();
        let issued = codec.issue("alice", 0, HOUR).unwrap();
        keys.rotate(SigningKey::new("k2", vec![9; 32]).unwrap(), Duration::from_secs(600), 100)
            .unwrap();

        // THEN: new tokens use k2, the old one verifies until t=700
        assert_eq!(codec.issue("bob", 100, HOUR).unwrap().payload.key_id, "k2");
        assert!(codec.decode(issued.token.as_bytes(), 699).is_ok());
        assert_eq!(
            codec.decode(issued.token.as_bytes(), 700),
            Err(CodecError::BadSignature)
        );
    }

    #[test]
    fn rejects_unencodable_principal() {
        let (codec, _) = codec();
        assert_eq!(codec.issue("", 0, HOUR).unwrap_err(), CodecError::InvalidPrincipal);
        let long = "p".repeat(MAX_PRINCIPAL_LEN + 1);
        assert_eq!(codec.issue(&long, 0, HOUR).unwrap_err(), CodecError::InvalidPrincipal);
    }
}
