//! Interrupt handling for SIGTERM and SIGINT.
//!
//! A signal cancels the run's token. The executor then stops scheduling new
//! files, lets in-flight files finish, and skips the state commit.

use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shutdown coordinator
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token cancelled when a shutdown signal arrives
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wait for a shutdown signal (SIGTERM or SIGINT), then cancel the token.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), stopping after in-flight files...");
            }
            _ = terminate => {
                info!("Received SIGTERM, stopping after in-flight files...");
            }
            _ = self.token.cancelled() => return,
        }

        self.token.cancel();
    }

    /// Listen for signals in the background until the token is cancelled.
    pub fn spawn_listener(self) -> (CancellationToken, JoinHandle<()>) {
        let token = self.token();
        let handle = tokio::spawn(async move {
            self.wait_for_signal().await;
        });
        (token, handle)
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listener_exits_when_token_cancelled() {
        let coordinator = ShutdownCoordinator::new();
        let (token, handle) = coordinator.spawn_listener();

        token.cancel();

        // Listener notices the cancellation and returns without a signal.
        handle.await.unwrap();
        assert!(token.is_cancelled());
    }
}
