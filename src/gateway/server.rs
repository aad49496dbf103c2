//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::auth::SourcePolicy;
use super::router::{AppState, create_router};
use super::service::AuthGateway;
use super::sweeper::spawn_sweeper;
use crate::config::Config;
use crate::keys::spawn_rotator;
use crate::{Error, Result};

/// Authentication gateway server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// The service behind the HTTP surface
    gateway: Arc<AuthGateway>,
    /// Resolved admin token
    admin_token: Option<String>,
}

impl Gateway {
    /// Create a new gateway
    pub async fn new(config: Config) -> Result<Self> {
        let gateway = Arc::new(AuthGateway::from_config(&config).await?);
        let admin_token = config.admin.resolve_bearer_token()?;
        if config.admin.bearer_token.as_deref() == Some("auto") {
            if let Some(ref token) = admin_token {
                info!("Auto-generated admin token: {}", token);
            }
        }
        Ok(Self {
            config,
            gateway,
            admin_token,
        })
    }

    /// The underlying service.
    #[must_use]
    pub fn service(&self) -> &Arc<AuthGateway> {
        &self.gateway
    }

    /// Run the gateway until a shutdown signal arrives
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let state = Arc::new(AppState {
            gateway: Arc::clone(&self.gateway),
            admin_token: self.admin_token.clone(),
        });
        let policy = SourcePolicy {
            trust_forwarded_for: self.config.server.trust_forwarded_for,
        };
        let app = create_router(state, policy).layer(tower_http::timeout::TimeoutLayer::new(
            self.config.server.request_timeout,
        ));

        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("AUTH GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(
            ttl = ?self.config.tokens.ttl,
            key_id = %self.gateway.keys().current_key().id(),
            "Token issuance ready"
        );
        info!(
            "  POST http://{}:{}/v1/auth/get",
            self.config.server.host, self.config.server.port
        );
        if self.admin_token.is_some() {
            info!("ADMIN endpoints enabled under /v1/admin");
        } else {
            warn!("ADMIN endpoints disabled - no admin.bearer_token configured");
        }
        if self.config.server.trust_forwarded_for {
            warn!("Trusting X-Forwarded-For; only run behind a trusted proxy");
        }
        info!("============================================================");

        let sweeper = spawn_sweeper(Arc::clone(&self.gateway), self.config.tokens.sweep_interval);

        let rotator_cancel = CancellationToken::new();
        let rotator = self.config.keys.rotation_interval.map(|interval| {
            info!(interval = ?interval, "Automatic key rotation enabled");
            spawn_rotator(
                Arc::clone(self.gateway.keys()),
                Arc::clone(self.gateway.clock()),
                interval,
                self.config.keys.grace_period,
                rotator_cancel.clone(),
            )
        });

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::Internal(e.to_string()))?;

        info!("Stopping background tasks...");
        rotator_cancel.cancel();
        if let Some(handle) = rotator {
            if let Err(e) = handle.await {
                warn!(error = %e, "Key rotator ended abnormally");
            }
        }
        let drain = tokio::time::timeout(self.config.server.shutdown_timeout, sweeper.shutdown());
        if drain.await.is_err() {
            warn!("Sweeper did not stop within shutdown timeout");
        }

        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
