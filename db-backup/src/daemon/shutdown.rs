//! SIGTERM / SIGINT handling.
//!
//! A signal cancels the run token: in-flight dumps are killed, pending
//! targets fail, archiving is skipped, and cleanup still releases the lock.

use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Spawn a listener that cancels `cancel` on SIGINT or SIGTERM. The listener
/// exits on its own once `cancel` is cancelled by anyone else.
pub fn cancel_on_signal(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), cancelling backup...");
            }
            _ = terminate => {
                info!("Received SIGTERM, cancelling backup...");
            }
            _ = cancel.cancelled() => return,
        }

        cancel.cancel();
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listener_exits_when_run_finishes() {
        let cancel = CancellationToken::new();
        let handle = cancel_on_signal(cancel.clone());

        cancel.cancel();

        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("listener did not stop")
            .unwrap();
    }
}
