//! Credential verification: salted digests and constant-time comparison.
//!
//! Stored material is never the raw secret: it is `SHA-256(salt || secret)`
//! with a per-principal 16-byte random salt. Verification recomputes the
//! digest of the submitted secret and compares the two digests with
//! [`subtle::ConstantTimeEq`], so the comparison time does not depend on where
//! the first differing byte sits.
//!
//! # Text form
//!
//! ```text
//! sha256$<32 hex chars of salt>$<64 hex chars of digest>
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Salt length in bytes.
pub const SALT_LEN: usize = 16;

/// SHA-256 output length in bytes.
pub const DIGEST_LEN: usize = 32;

const SCHEME: &str = "sha256";

/// A presented secret. `Debug` never prints the value.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the raw secret. Callers must not log the result.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Error parsing the text form of a [`StoredCredential`].
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CredentialFormatError {
    /// Not of the form `scheme$salt$digest`.
    #[error("expected `sha256$<salt>$<digest>`")]
    Layout,
    /// Scheme other than `sha256`.
    #[error("unsupported credential scheme: {0}")]
    Scheme(String),
    /// Salt or digest is not valid hex of the expected length.
    #[error("invalid {0} encoding")]
    Encoding(&'static str),
}

/// Salted digest of a principal's secret.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StoredCredential {
    salt: [u8; SALT_LEN],
    digest: [u8; DIGEST_LEN],
}

impl StoredCredential {
    /// Derive fresh material for `secret` with a random salt.
    #[must_use]
    pub fn derive(secret: &str) -> Self {
        let salt: [u8; SALT_LEN] = rand::random();
        Self::with_salt(salt, secret)
    }

    /// Derive material with a caller-chosen salt.
    #[must_use]
    pub fn with_salt(salt: [u8; SALT_LEN], secret: &str) -> Self {
        Self {
            salt,
            digest: salted_digest(&salt, secret),
        }
    }

    /// Text form (`sha256$salt$digest`).
    #[must_use]
    pub fn encode(&self) -> String {
        format!(
            "{SCHEME}${}${}",
            hex::encode(self.salt),
            hex::encode(self.digest)
        )
    }
}

impl fmt::Debug for StoredCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredCredential")
            .field("scheme", &SCHEME)
            .finish_non_exhaustive()
    }
}

impl FromStr for StoredCredential {
    type Err = CredentialFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('$');
        let (Some(scheme), Some(salt), Some(digest), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(CredentialFormatError::Layout);
        };

        if scheme != SCHEME {
            return Err(CredentialFormatError::Scheme(scheme.to_string()));
        }

        let mut out = Self {
            salt: [0; SALT_LEN],
            digest: [0; DIGEST_LEN],
        };
        hex::decode_to_slice(salt, &mut out.salt)
            .map_err(|_| CredentialFormatError::Encoding("salt"))?;
        hex::decode_to_slice(digest, &mut out.digest)
            .map_err(|_| CredentialFormatError::Encoding("digest"))?;
        Ok(out)
    }
}

impl TryFrom<String> for StoredCredential {
    type Error = CredentialFormatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StoredCredential> for String {
    fn from(value: StoredCredential) -> Self {
        value.encode()
    }
}

fn salted_digest(salt: &[u8; SALT_LEN], secret: &str) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(secret.as_bytes());
    let out = hasher.finalize();

    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(&out);
    digest
}

/// Decides match/no-match between a submitted secret and stored material.
pub struct CredentialVerifier {
    /// Material compared against when the principal does not exist, so the
    /// unknown-principal path costs one digest plus one comparison like any
    /// other attempt.
    decoy: StoredCredential,
}

impl CredentialVerifier {
    /// Create a verifier with a random decoy credential.
    #[must_use]
    pub fn new() -> Self {
        let decoy_secret = hex::encode(rand::random::<[u8; 32]>());
        Self {
            decoy: StoredCredential::derive(&decoy_secret),
        }
    }

    /// Constant-time check of `submitted` against `stored`.
    #[must_use]
    pub fn verify(&self, submitted: &Secret, stored: &StoredCredential) -> bool {
        let computed = salted_digest(&stored.salt, submitted.expose());
        computed.as_slice().ct_eq(stored.digest.as_slice()).into()
    }

    /// Run the same work as [`verify`](Self::verify) against the decoy and
    /// always report no match.
    #[must_use]
    pub fn verify_dummy(&self, submitted: &Secret) -> bool {
        let matched = self.verify(submitted, &self.decoy);
        std::hint::black_box(matched);
        false
    }
}

impl Default for CredentialVerifier {
    fn default() -> Self {
        Self::new()
    }
}
