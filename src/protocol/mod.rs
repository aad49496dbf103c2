//! `AuthService` RPC surface.
//!
//! `Get` exchanges credentials for a session token. `VerifySession` is called
//! by the RPC dispatch path for every data-plane request. Both answer with a
//! [`Status`] on failure; internal reasons stay in the logs.

mod messages;

use std::net::IpAddr;

use async_trait::async_trait;

pub use messages::*;

use crate::error::Status;
use crate::gateway::{AuthGateway, AuthenticatedPrincipal};

/// The authentication RPC service.
#[async_trait]
pub trait AuthService: Send + Sync {
    /// `AuthService.Get`: credentials in, session token out.
    async fn get(&self, request: AuthRequest, source: Option<IpAddr>) -> Result<AuthResponse, Status>;

    /// Verify a bearer token presented on a data-plane call.
    async fn verify_session(&self, bearer: &str) -> Result<AuthenticatedPrincipal, Status>;
}

#[async_trait]
impl AuthService for AuthGateway {
    async fn get(&self, request: AuthRequest, source: Option<IpAddr>) -> Result<AuthResponse, Status> {
        let issued = self.authenticate(&request.into(), source).await?;
        Ok(AuthResponse {
            token: issued.token.to_bearer(),
            expires_at: issued.expires_at,
        })
    }

    async fn verify_session(&self, bearer: &str) -> Result<AuthenticatedPrincipal, Status> {
        Ok(self.verify_bearer(bearer).await?)
    }
}
