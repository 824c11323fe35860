//! Run control: cancel, release and status queries.

use crate::error::{Error, Result};
use crate::types::{Event, RunId, RunStatus};

use super::Downloader;

impl Downloader {
    /// Cancel a run that has not finished yet
    ///
    /// A run still waiting for a slot fails without starting; a running
    /// pipeline stops at its next cancellation point and the run ends as
    /// [`RunStatus::Failed`]. Returns false if `id` is not an active run.
    pub async fn cancel(&self, id: RunId) -> bool {
        let cancelled = self.state.active.cancel(id).await;
        if cancelled {
            tracing::info!(run_id = %id, "run cancellation requested");
        }
        cancelled
    }

    /// Delete the directory of a finished run
    ///
    /// Call this once the artifacts of a completed or failed run have been
    /// consumed. The periodic retention sweep still removes directories that
    /// are never released.
    ///
    /// # Errors
    ///
    /// - [`Error::RunActive`] if the run has not reached a terminal status
    /// - [`Error::NotFound`] if the run is unknown or was already released
    /// - [`Error::Io`] if the directory exists but cannot be removed
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use clipfetch::*;
    /// # async fn example(downloader: Downloader) -> Result<()> {
    /// let mut events = downloader.subscribe();
    /// while let Ok(event) = events.recv().await {
    ///     if let Event::Completed { id, bundle } = event {
    ///         // hand bundle.video to the caller, then free the disk space
    ///         downloader.release(id).await?;
    ///     }
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn release(&self, id: RunId) -> Result<()> {
        if self.state.active.contains(id).await {
            return Err(Error::RunActive(id));
        }

        let (dir, status) = self
            .state
            .finished
            .remove(id)
            .await
            .ok_or_else(|| Error::NotFound(format!("run {} is not releasable", id)))?;

        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            // already swept
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::error!(run_id = %id, dir = %dir.display(), error = %e, "failed to remove run directory");
                self.state.finished.insert(id, dir, status).await;
                return Err(Error::Io(e));
            }
        }

        tracing::info!(run_id = %id, dir = %dir.display(), "run released");
        self.emit_event(Event::Released { id });
        Ok(())
    }

    /// Runs admitted and not yet finished, oldest first
    pub async fn active_runs(&self) -> Vec<(RunId, RunStatus)> {
        self.state.active.snapshot().await
    }

    /// Current status of a run, if the downloader still knows it
    ///
    /// Finished runs report their terminal status until released or swept.
    pub async fn status(&self, id: RunId) -> Option<RunStatus> {
        if let Some(status) = self.state.active.status(id).await {
            return Some(status);
        }
        self.state.finished.status(id).await
    }
}
