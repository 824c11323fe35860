//! Background service starters: retention sweep and admission counter cleanup.

use crate::retention::{AnyWriter, PartialFileCheck, RetentionSweeper, SweepReport};
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::Downloader;

impl Downloader {
    /// Retention sweeper over the artifact root
    ///
    /// Directories of active runs and directories holding partial downloads
    /// are treated as busy and never removed. Finished runs whose directory
    /// is removed are forgotten and can no longer be released.
    pub fn retention_sweeper(&self) -> RetentionSweeper {
        let check = AnyWriter::new()
            .with(Arc::new(self.state.active.clone()))
            .with(Arc::new(PartialFileCheck));

        RetentionSweeper::with_check(
            self.pipeline.root_dir(),
            self.config.retention.max_age,
            Arc::new(check),
        )
        .with_listener(Arc::new(self.state.finished.clone()))
    }

    /// Sweep the artifact root once
    ///
    /// Besides what the sweep removes, finished runs whose directory has
    /// vanished some other way are forgotten too.
    pub async fn sweep_retention(&self) -> SweepReport {
        let report = self.retention_sweeper().sweep().await;

        let pruned = self.state.finished.prune_missing().await;
        if pruned > 0 {
            tracing::info!(pruned, "Forgot finished runs without a directory");
        }
        report
    }

    /// Start the periodic retention sweep
    ///
    /// Returns `None` when retention is disabled. The task stops on
    /// [`shutdown`](Self::shutdown).
    pub fn start_retention_sweeper(&self) -> Option<JoinHandle<()>> {
        let retention = &self.config.retention;
        if !retention.enabled {
            tracing::info!("Retention disabled, skipping retention sweeper");
            return None;
        }

        let downloader = self.clone();
        let interval = retention.sweep_interval;
        let cancel = self.state.root_token.child_token();
        let handle = tokio::spawn(async move {
            // first tick completes immediately
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("retention sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        downloader.sweep_retention().await;
                    }
                }
            }
        });

        tracing::info!(
            max_age_secs = retention.max_age.as_secs(),
            interval_secs = retention.sweep_interval.as_secs(),
            "Retention sweeper background task started"
        );

        Some(handle)
    }

    /// Start the periodic cleanup of expired in-process admission counters
    ///
    /// Returns `None` when admission is disabled or its backend keeps no
    /// local state (the shared store expires its own markers).
    pub fn start_admission_sweeper(&self) -> Option<JoinHandle<()>> {
        let handle = self
            .admission
            .spawn_sweeper(self.state.root_token.child_token());

        match &handle {
            Some(_) => tracing::info!("Admission sweeper background task started"),
            None => tracing::info!("Admission needs no local sweeping, skipping sweeper"),
        }

        handle
    }
}
