//! Error types for the auth gateway
//!
//! Two layers live here:
//!
//! - [`AuthError`]: the internal taxonomy. Every variant names the exact check
//!   that failed and is only ever written to local logs.
//! - [`Status`]: what crosses the external boundary. Several internal variants
//!   collapse into one status so a caller cannot tell *which* check failed.
//!
//! [`Error`] is the crate-level error for configuration, IO and server failures.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for the auth gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-level errors (bootstrap, configuration, IO)
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential file could not be parsed
    #[error("Credential file error: {0}")]
    Credentials(String),

    /// Signing key error
    #[error("Signing key error: {0}")]
    Key(#[from] crate::keys::KeyError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Internal authentication and session errors.
///
/// Never serialized to clients; see [`AuthError::status`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Principal unknown or disabled.
    #[error("principal not found")]
    NotFound,

    /// Principal exists but the secret did not match.
    #[error("credential mismatch")]
    CredentialMismatch,

    /// Lockout or request throttle tripped.
    #[error("rate limited (retry after {}s)", retry_after.as_secs())]
    RateLimited {
        /// Earliest moment the caller may try again.
        retry_after: Duration,
    },

    /// Credential store or token cache unreachable.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Token bytes do not follow the expected layout.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// Signature verification failed or the signing key is unknown.
    #[error("bad signature")]
    BadSignature,

    /// Token passed its expiry.
    #[error("token expired")]
    Expired,

    /// Token was revoked before its natural expiry.
    #[error("token revoked")]
    Revoked,

    /// Well-signed token with no entry in the token cache.
    #[error("session not found")]
    SessionNotFound,
}

impl AuthError {
    /// Collapse into the externally visible status.
    #[must_use]
    pub fn status(&self) -> Status {
        match self {
            Self::NotFound | Self::CredentialMismatch => Status::Unauthenticated,
            Self::RateLimited { retry_after } => Status::RateLimited {
                retry_after_secs: retry_after.as_secs().max(1),
            },
            Self::Unavailable(_) => Status::Unavailable,
            Self::Malformed(_)
            | Self::BadSignature
            | Self::Expired
            | Self::Revoked
            | Self::SessionNotFound => Status::InvalidSession,
        }
    }

    /// Short machine-readable reason, used in audit events.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::CredentialMismatch => "credential_mismatch",
            Self::RateLimited { .. } => "rate_limited",
            Self::Unavailable(_) => "unavailable",
            Self::Malformed(_) => "malformed",
            Self::BadSignature => "bad_signature",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
            Self::SessionNotFound => "session_not_found",
        }
    }
}

/// External response codes. This is everything a client ever learns.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Credentials rejected (unknown principal or wrong secret).
    #[error("authentication failed")]
    Unauthenticated,

    /// Session token rejected (any reason).
    #[error("invalid session")]
    InvalidSession,

    /// Too many attempts; back off.
    #[error("too many attempts, retry in {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the caller may retry.
        retry_after_secs: u64,
    },

    /// Backing store unavailable; retryable.
    #[error("service unavailable, retry later")]
    Unavailable,
}

impl Status {
    /// Stable error code string for response bodies.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::InvalidSession => "invalid_session",
            Self::RateLimited { .. } => "rate_limited",
            Self::Unavailable => "unavailable",
        }
    }

    /// Whether the caller may retry the same request unchanged.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable | Self::RateLimited { .. })
    }
}

impl From<AuthError> for Status {
    fn from(err: AuthError) -> Self {
        err.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_failures_collapse_to_unauthenticated() {
        assert_eq!(AuthError::NotFound.status(), Status::Unauthenticated);
        assert_eq!(AuthError::CredentialMismatch.status(), Status::Unauthenticated);
    }

    #[test]
    fn session_failures_collapse_to_invalid_session() {
        for err in [
            AuthError::Malformed("short".to_string()),
            AuthError::BadSignature,
            AuthError::Expired,
            AuthError::Revoked,
            AuthError::SessionNotFound,
        ] {
            assert_eq!(err.status(), Status::InvalidSession, "{err}");
        }
    }

    #[test]
    fn rate_limited_keeps_retry_hint() {
        let err = AuthError::RateLimited {
            retry_after: Duration::from_secs(42),
        };
        assert_eq!(err.status(), Status::RateLimited { retry_after_secs: 42 });
    }

    #[test]
    fn sub_second_retry_rounds_up_to_one() {
        let err = AuthError::RateLimited {
            retry_after: Duration::from_millis(10),
        };
        assert_eq!(err.status(), Status::RateLimited { retry_after_secs: 1 });
    }

    #[test]
    fn status_display_never_names_internal_reason() {
        let rendered = AuthError::CredentialMismatch.status().to_string();
        assert!(!rendered.contains("mismatch"));
        let rendered = AuthError::Revoked.status().to_string();
        assert!(!rendered.contains("revoked"));
    }

    #[test]
    fn only_availability_and_backoff_are_retryable() {
        assert!(Status::Unavailable.is_retryable());
        assert!(Status::RateLimited { retry_after_secs: 1 }.is_retryable());
        assert!(!Status::Unauthenticated.is_retryable());
        assert!(!Status::InvalidSession.is_retryable());
    }
}
