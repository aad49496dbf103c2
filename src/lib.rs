//! Auth Gateway Library
//!
//! Authentication front door for a data cluster's RPC surface. Clients
//! exchange a principal identifier and secret for a short-lived, signed,
//! revocable session token; every later call presents the token and is
//! verified against the signing keys and the live-token cache.
//!
//! # Features
//!
//! - **Credential exchange**: salted SHA-256 digests, constant-time comparison,
//!   uniform answers for unknown principals and wrong secrets
//! - **Session tokens**: compact HMAC-SHA256 binary tokens with embedded key id
//! - **Revocation**: per-token and per-principal, effective immediately
//! - **Key rotation**: grace windows for in-flight tokens, optional auto-rotation
//! - **Abuse control**: per-principal lockout and per-source throttle
//! - **Production Ready**: structured audit logs, background sweeping, graceful shutdown

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod clock;
pub mod config;
pub mod credential;
pub mod error;
pub mod gateway;
pub mod keys;
pub mod protocol;
pub mod token;

pub use error::{AuthError, Error, Result, Status};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
