//! Periodic removal of expired sessions

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use super::SessionStore;

/// Handle for the background cleanup task
pub struct CleanupTask {
    shutdown_tx: tokio::sync::mpsc::Sender<()>,
    handle: tokio::task::JoinHandle<()>,
}

impl CleanupTask {
    /// Signal the cleanup task to shutdown gracefully and wait for it
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.handle.await;
    }
}

/// Spawn a task that calls `clear_expired` on `store` every `period`
pub fn spawn_cleanup_task<S: SessionStore>(store: Arc<S>, period: Duration) -> CleanupTask {
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);

    let handle = tokio::spawn(async move {
        tracing::info!(
            "Starting session cleanup task for {} store (interval: {:?})",
            store.backend_name(),
            period
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Session cleanup task shutting down");
                    break;
                }
                _ = sleep(period) => {
                    match store.clear_expired().await {
                        Ok(0) => {}
                        Ok(removed) => tracing::info!("Removed {} expired sessions", removed),
                        Err(e) => tracing::error!("Session cleanup failed: {}", e),
                    }
                }
            }
        }
    });

    CleanupTask {
        shutdown_tx,
        handle,
    }
}
