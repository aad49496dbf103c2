//! Audit events for authentication and session lifecycle.
//!
//! Every event goes out through `tracing::info!` as one JSON blob in the
//! `audit` field.
//!
//! | Event | When |
//! |-------|------|
//! | `auth.issued` | Credentials accepted and a token registered |
//! | `auth.denied` | Credentials rejected (reason is internal only) |
//! | `auth.locked` | Attempt refused by lockout or throttle |
//! | `auth.unavailable` | Store or cache failed during authentication |
//! | `session.rejected` | A presented token failed verification |
//! | `token.revoked` | Admin revocation of one token or one principal's tokens |
//! | `key.rotated` | Signing key rotated |
//!
//! Secrets and token bytes never appear in an event.

use std::net::IpAddr;

use serde::Serialize;

use crate::token::TokenPayload;

/// Structured audit record.
#[derive(Debug, Serialize)]
pub struct AuditEvent {
    /// Event type string (e.g. `"auth.issued"`).
    pub event: &'static str,
    /// Principal concerned, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
    /// Affected token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    /// Signing key involved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    /// Token expiry (Unix seconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    /// Number of tokens affected by a bulk operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    /// Client address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<IpAddr>,
    /// Internal reason code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

impl AuditEvent {
    fn new(event: &'static str) -> Self {
        Self {
            event,
            principal: None,
            token_id: None,
            key_id: None,
            expires_at: None,
            count: None,
            client_ip: None,
            reason: None,
        }
    }

    /// `auth.issued`
    #[must_use]
    pub fn issued(payload: &TokenPayload, client_ip: Option<IpAddr>) -> Self {
        Self {
            principal: Some(payload.principal_id.clone()),
            token_id: Some(payload.token_id.to_string()),
            key_id: Some(payload.key_id.clone()),
            expires_at: Some(payload.expires_at),
            client_ip,
            ..Self::new("auth.issued")
        }
    }

    /// `auth.denied`
    #[must_use]
    pub fn denied(principal: &str, reason: &'static str, client_ip: Option<IpAddr>) -> Self {
        Self {
            principal: Some(principal.to_string()),
            client_ip,
            reason: Some(reason),
            ..Self::new("auth.denied")
        }
    }

    /// `auth.locked`
    #[must_use]
    pub fn locked(principal: Option<&str>, reason: &'static str, client_ip: Option<IpAddr>) -> Self {
        Self {
            principal: principal.map(str::to_string),
            client_ip,
            reason: Some(reason),
            ..Self::new("auth.locked")
        }
    }

    /// `auth.unavailable`
    #[must_use]
    pub fn unavailable(principal: &str, reason: &'static str) -> Self {
        Self {
            principal: Some(principal.to_string()),
            reason: Some(reason),
            ..Self::new("auth.unavailable")
        }
    }

    /// `session.rejected`
    #[must_use]
    pub fn session_rejected(reason: &'static str, payload: Option<&TokenPayload>) -> Self {
        Self {
            principal: payload.map(|p| p.principal_id.clone()),
            token_id: payload.map(|p| p.token_id.to_string()),
            key_id: payload.map(|p| p.key_id.clone()),
            reason: Some(reason),
            ..Self::new("session.rejected")
        }
    }

    /// `token.revoked` for a single token.
    #[must_use]
    pub fn revoked(token_id: &str, newly_revoked: bool) -> Self {
        Self {
            token_id: Some(token_id.to_string()),
            count: Some(usize::from(newly_revoked)),
            ..Self::new("token.revoked")
        }
    }

    /// `token.revoked` for every token of one principal.
    #[must_use]
    pub fn principal_revoked(principal: &str, count: usize) -> Self {
        Self {
            principal: Some(principal.to_string()),
            count: Some(count),
            ..Self::new("token.revoked")
        }
    }

    /// `key.rotated`
    #[must_use]
    pub fn key_rotated(key_id: &str) -> Self {
        Self {
            key_id: Some(key_id.to_string()),
            ..Self::new("key.rotated")
        }
    }
}

/// Emit `event` via `tracing::info!`.
pub fn emit(event: &AuditEvent) {
    match serde_json::to_string(event) {
        Ok(ref json) => tracing::info!(audit = %json, "auth audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
    }
}
