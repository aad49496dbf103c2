//! Session tokens: wire codec and the live-token cache.
//!
//! A session token is an opaque, HMAC-signed byte string. Clients carry it as
//! URL-safe base64 (see [`SessionToken::to_bearer`]). Holding a well-signed
//! token is never enough on its own: the token's identifier must also be live
//! in the [`TokenCache`].

pub mod cache;
pub mod codec;

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

pub use cache::{CacheEntry, CacheError, InMemoryTokenCache, Liveness, TokenCache};
pub use codec::{CodecError, IssuedToken, TokenCodec};

/// Unique token identifier (UUID v4), used for revocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(uuid::Uuid);

impl TokenId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Build from the 16 raw bytes carried in a token.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(uuid::Uuid::from_bytes(bytes))
    }

    /// Raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl FromStr for TokenId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s).map(Self)
    }
}

/// Signed, opaque session token bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(Vec<u8>);

impl SessionToken {
    /// Wrap raw token bytes (not validated).
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume into raw bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Encode for transport (URL-safe base64, no padding).
    #[must_use]
    pub fn to_bearer(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.0)
    }

    /// Decode a bearer string. Fails with [`CodecError::Malformed`] on bad base64.
    pub fn from_bearer(bearer: &str) -> Result<Self, CodecError> {
        URL_SAFE_NO_PAD
            .decode(bearer.trim())
            .map(Self)
            .map_err(|_| CodecError::Malformed("invalid base64"))
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken(<{} bytes>)", self.0.len())
    }
}

/// Decoded and verified token contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPayload {
    /// Unique token identifier.
    pub token_id: TokenId,
    /// Authenticated principal.
    pub principal_id: String,
    /// Issued-at (Unix seconds).
    pub issued_at: u64,
    /// Expires-at (Unix seconds).
    pub expires_at: u64,
    /// Identifier of the key that signed the token.
    pub key_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_id_text_round_trip() {
        let id = TokenId::generate();
        let parsed: TokenId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<TokenId>().is_err());
    }

    #[test]
    fn bearer_rejects_invalid_base64() {
        assert_eq!(
            SessionToken::from_bearer("***"),
            Err(CodecError::Malformed("invalid base64"))
        );
    }

    #[test]
    fn debug_does_not_print_token_bytes() {
        let token = SessionToken::from_bytes(vec![0x41; 8]);
        assert_eq!(format!("{token:?}"), "SessionToken(<8 bytes>)");
    }
}
