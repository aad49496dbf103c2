//! Request middleware: client source resolution and session verification.
//!
//! - [`client_source_middleware`] records where a request came from as a
//!   [`ClientSource`] extension, used by the per-source throttle and audit.
//! - [`session_middleware`] guards data-plane routes. It reads
//!   `Authorization: Bearer <token>`, runs `VerifySession` and injects the
//!   [`AuthenticatedPrincipal`] for downstream handlers.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::error::Status;
use crate::protocol::AuthService;

pub use super::service::AuthenticatedPrincipal;

/// Client address attached to each request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientSource(pub Option<IpAddr>);

/// How to determine the client address.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourcePolicy {
    /// Honour `X-Forwarded-For` / `X-Real-IP`.
    pub trust_forwarded_for: bool,
}

/// Extract the bearer token from `Authorization`.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn forwarded_for(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
        })
}

/// Resolve the client address for `request`.
#[must_use]
pub fn resolve_source(policy: SourcePolicy, request: &Request<Body>) -> ClientSource {
    if policy.trust_forwarded_for {
        if let Some(ip) = forwarded_for(request.headers()) {
            return ClientSource(Some(ip));
        }
    }
    ClientSource(
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip()),
    )
}

/// Insert a [`ClientSource`] extension.
pub async fn client_source_middleware(
    State(policy): State<SourcePolicy>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let source = resolve_source(policy, &request);
    request.extensions_mut().insert(source);
    next.run(request).await
}

/// Verify the session token and inject the [`AuthenticatedPrincipal`].
pub async fn session_middleware(
    State(service): State<Arc<dyn AuthService>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    let Some(token) = bearer_token(request.headers()) else {
        debug!(path = %path, "Missing session token");
        return Status::InvalidSession.into_response();
    };

    let verdict = service.verify_session(token).await;
    match verdict {
        Ok(principal) => {
            debug!(principal = %principal.principal_id, path = %path, "Session accepted");
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(status) => status.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));

        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn forwarded_headers_only_when_trusted() {
        let request = Request::builder()
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(Body::empty())
            .unwrap();

        let trusted = resolve_source(SourcePolicy { trust_forwarded_for: true }, &request);
        assert_eq!(trusted, ClientSource(Some("203.0.113.9".parse().unwrap())));

        let untrusted = resolve_source(SourcePolicy::default(), &request);
        assert_eq!(untrusted, ClientSource(None));
    }

    #[test]
    fn connect_info_is_the_fallback() {
        let mut request = Request::builder()
            .header("x-real-ip", "garbage")
            .body(Body::empty())
            .unwrap();
        let addr: SocketAddr = "192.0.2.4:5555".parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));

        let source = resolve_source(SourcePolicy { trust_forwarded_for: true }, &request);
        assert_eq!(source, ClientSource(Some(addr.ip())));
    }
}
