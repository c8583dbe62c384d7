//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Two-phase stop shared by the server's accept loop and its sessions.
///
/// `shutdown` stops accepting; `force` cancels sessions that outlive the
/// grace period. Forcing also implies shutdown.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    force: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            force: CancellationToken::new(),
        }
    }

    /// Cancelled when shutdown begins.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancelled when live sessions must stop.
    pub fn force_token(&self) -> CancellationToken {
        self.force.clone()
    }

    /// Initiate shutdown. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Cancel live sessions now. Also initiates shutdown.
    pub fn force(&self) {
        self.token.cancel();
        self.force.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait up to `timeout` for `tracker` to empty, then force the rest.
    ///
    /// The tracker is closed first so the wait can complete.
    pub async fn drain(&self, tracker: &TaskTracker, timeout: Duration) {
        self.shutdown();
        let _ = tracker.close();
        info!(
            task_count = tracker.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for sessions to finish"
        );
        if tokio::time::timeout(timeout, tracker.wait()).await.is_err() {
            warn!(remaining = tracker.len(), "shutdown timed out after {timeout:?}, closing remaining sessions");
            self.force();
            tracker.wait().await;
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
