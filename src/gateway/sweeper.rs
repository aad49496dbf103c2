//! Background maintenance task.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::service::AuthGateway;

/// Handle to a running sweeper.
pub struct SweeperHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl SweeperHandle {
    /// Cancellation token; cancelling it stops the sweeper.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop the sweeper and wait for it to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            warn!(error = %e, "Sweeper task ended abnormally");
        }
    }
}

/// Run [`AuthGateway::sweep`] every `interval` until cancelled.
pub fn spawn_sweeper(gateway: Arc<AuthGateway>, interval: Duration) -> SweeperHandle {
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = gateway.sweep().await {
                        warn!(error = %e, "Sweep failed, retrying next interval");
                    }
                }
                () = token.cancelled() => {
                    debug!("Sweeper shutting down");
                    break;
                }
            }
        }
    });

    SweeperHandle { cancel, join }
}
