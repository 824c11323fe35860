//! Shutdown coordination.

use crate::error::Result;
use crate::types::Event;
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::Downloader;

/// How long shutdown waits for cancelled runs to wind down
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

impl Downloader {
    /// Gracefully shut down the downloader
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new runs (`submit` returns `ShuttingDown`)
    /// 2. Cancels every active run and background service
    /// 3. Waits for active runs to finish with a timeout (30 seconds)
    /// 4. Emits [`Event::Shutdown`]
    ///
    /// Runs cancelled here end as failed and keep their directories, which
    /// the retention sweep of a later process removes.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        // 1. Stop accepting new runs
        self.state.accepting_new.store(false, Ordering::SeqCst);
        tracing::info!("Stopped accepting new runs");

        // 2. Cancel active runs, then every child of the root token
        self.state.active.cancel_all().await;
        self.state.root_token.cancel();
        tracing::info!("Signaled cancellation to all active runs");

        // 3. Wait for active runs to wind down with timeout
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.wait_for_active_runs()).await {
            Ok(()) => {
                tracing::info!("All active runs finished");
            }
            Err(_) => {
                let remaining = self.state.active.len().await;
                tracing::warn!(
                    remaining,
                    "Timeout waiting for runs to finish, proceeding with shutdown"
                );
            }
        }

        // 4. Emit shutdown event
        self.emit_event(Event::Shutdown);

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// True once [`shutdown`](Self::shutdown) has started
    pub fn is_shutting_down(&self) -> bool {
        !self.state.accepting_new.load(Ordering::SeqCst)
    }

    /// Wait until no run is registered as active
    async fn wait_for_active_runs(&self) {
        loop {
            let active_count = self.state.active.len().await;
            if active_count == 0 {
                return;
            }

            tracing::debug!(active_count, "Waiting for active runs to finish");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
