//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use super::auth::{
    AuthenticatedPrincipal, ClientSource, SourcePolicy, bearer_token, client_source_middleware,
    session_middleware,
};
use super::service::AuthGateway;
use crate::error::Status;
use crate::protocol::{AuthRequest, AuthService, ErrorBody, HealthResponse, RevokeResponse};
use crate::token::TokenId;

/// Shared application state
pub struct AppState {
    /// The gateway service
    pub gateway: Arc<AuthGateway>,
    /// Resolved admin bearer token; admin endpoints are disabled when `None`
    pub admin_token: Option<String>,
}

/// Create the router
pub fn create_router(state: Arc<AppState>, source_policy: SourcePolicy) -> Router {
    let service: Arc<dyn AuthService> = Arc::clone(&state.gateway) as Arc<dyn AuthService>;

    let session_routes = Router::new()
        .route("/v1/session", get(session_handler))
        .layer(middleware::from_fn_with_state(service, session_middleware));

    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/auth/get", post(auth_get_handler))
        .route("/v1/admin/tokens/{token_id}", delete(revoke_token_handler))
        .route(
            "/v1/admin/principals/{principal}/tokens",
            delete(revoke_principal_handler),
        )
        .route("/v1/admin/keys/rotate", post(rotate_key_handler))
        .with_state(state)
        .merge(session_routes)
        .layer(middleware::from_fn_with_state(
            source_policy,
            client_source_middleware,
        ))
        .layer(tower_http::catch_panic::CatchPanicLayer::new())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

impl IntoResponse for Status {
    fn into_response(self) -> Response {
        let code = match self {
            Self::Unauthenticated | Self::InvalidSession => StatusCode::UNAUTHORIZED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        };
        let mut response = (code, Json(ErrorBody::from(self))).into_response();
        match self {
            Self::RateLimited { retry_after_secs } => {
                if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
            }
            Self::Unauthenticated | Self::InvalidSession => {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            }
            Self::Unavailable => {}
        }
        response
    }
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        tokens: state.gateway.cache().len(),
    })
}

/// `AuthService.Get`
async fn auth_get_handler(
    State(state): State<Arc<AppState>>,
    Extension(ClientSource(source)): Extension<ClientSource>,
    Json(request): Json<AuthRequest>,
) -> Response {
    match state.gateway.get(request, source).await {
        Ok(response) => Json(response).into_response(),
        Err(status) => status.into_response(),
    }
}

/// Echo the verified session (data-plane example route)
async fn session_handler(Extension(principal): Extension<AuthenticatedPrincipal>) -> impl IntoResponse {
    Json(principal)
}

async fn revoke_token_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(token_id): Path<String>,
) -> Response {
    if let Err(response) = require_admin(&state, &headers) {
        return response;
    }
    let Ok(token_id) = token_id.parse::<TokenId>() else {
        return admin_error(StatusCode::BAD_REQUEST, "invalid_token_id", "Token id must be a UUID");
    };
    match state.gateway.revoke(token_id).await {
        Ok(newly_revoked) => {
            info!(token_id = %token_id, newly_revoked, "Token revoked via admin API");
            Json(RevokeResponse {
                revoked: usize::from(newly_revoked),
            })
            .into_response()
        }
        Err(e) => e.status().into_response(),
    }
}

async fn revoke_principal_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(principal): Path<String>,
) -> Response {
    if let Err(response) = require_admin(&state, &headers) {
        return response;
    }
    match state.gateway.revoke_principal(&principal).await {
        Ok(revoked) => {
            info!(principal = %principal, revoked, "Principal tokens revoked via admin API");
            Json(RevokeResponse { revoked }).into_response()
        }
        Err(e) => e.status().into_response(),
    }
}

async fn rotate_key_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(response) = require_admin(&state, &headers) {
        return response;
    }
    match state.gateway.rotate_generated() {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => {
            warn!(error = %e, "Key rotation failed");
            admin_error(StatusCode::CONFLICT, "rotation_failed", &e.to_string())
        }
    }
}

/// Constant-time admin bearer check.
fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(expected) = state.admin_token.as_deref() else {
        return Err(admin_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "admin_disabled",
            "No admin token configured",
        ));
    };
    let presented = bearer_token(headers).unwrap_or_default();
    if bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        warn!("Rejected admin request with invalid bearer token");
        Err(admin_error(StatusCode::UNAUTHORIZED, "unauthorized", "Invalid admin token"))
    }
}

fn admin_error(code: StatusCode, error: &str, message: &str) -> Response {
    (
        code,
        Json(ErrorBody {
            error: error.to_string(),
            message: message.to_string(),
            retry_after: None,
        }),
    )
        .into_response()
}
