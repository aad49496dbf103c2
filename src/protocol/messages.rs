//! Request and response bodies for `AuthService`.

use serde::{Deserialize, Serialize};

use crate::credential::{CredentialSubmission, Secret};
use crate::error::Status;

/// `AuthService.Get` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    /// Submitted credentials.
    pub credentials: Credentials,
}

/// Username/password pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// Principal identifier.
    pub username: String,
    /// Secret.
    pub password: Secret,
}

impl AuthRequest {
    /// Build a request.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<Secret>) -> Self {
        Self {
            credentials: Credentials {
                username: username.into(),
                password: password.into(),
            },
        }
    }
}

impl From<AuthRequest> for CredentialSubmission {
    fn from(req: AuthRequest) -> Self {
        Self::new(req.credentials.username, req.credentials.password)
    }
}

/// `AuthService.Get` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    /// Opaque session token (URL-safe base64).
    pub token: String,
    /// Expiry (Unix seconds).
    pub expires_at: u64,
}

/// Error body. Never names the internal reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable code (`unauthenticated`, `invalid_session`, `rate_limited`, `unavailable`).
    pub error: String,
    /// Generic message.
    pub message: String,
    /// Seconds to wait before retrying, for `rate_limited`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl From<Status> for ErrorBody {
    fn from(status: Status) -> Self {
        Self {
            error: status.code().to_string(),
            message: status.to_string(),
            retry_after: match status {
                Status::RateLimited { retry_after_secs } => Some(retry_after_secs),
                _ => None,
            },
        }
    }
}

/// Admin revocation response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokeResponse {
    /// Number of tokens newly revoked by this call; already-revoked or
    /// unknown tokens are not counted.
    pub revoked: usize,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"healthy"`.
    pub status: String,
    /// Crate version.
    pub version: String,
    /// Entries in the token cache.
    pub tokens: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_request_parses_and_hides_password() {
        let req: AuthRequest =
            serde_json::from_str(r#"{"credentials":{"username":"alice","password":"s3cret"}}"#)
                .unwrap();
        assert_eq!(req.credentials.username, "alice");
        assert_eq!(req.credentials.password.expose(), "s3cret");
        assert!(!format!("{req:?}").contains("s3cret"));
    }

    #[test]
    fn error_body_carries_retry_hint_only_when_rate_limited() {
        let body = ErrorBody::from(Status::RateLimited { retry_after_secs: 7 });
        assert_eq!(body.error, "rate_limited");
        assert_eq!(body.retry_after, Some(7));

        let json = serde_json::to_string(&ErrorBody::from(Status::Unauthenticated)).unwrap();
        assert!(!json.contains("retry_after"));
    }
}
