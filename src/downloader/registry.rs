//! Active and finished run registries

use crate::error::Result;
use crate::retention::{SweepListener, WriterCheck};
use crate::types::{RunId, RunStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct ActiveRun {
    dir: PathBuf,
    token: CancellationToken,
    status: RunStatus,
}

/// Runs that have been admitted and not yet reached a terminal status
///
/// Doubles as a [`WriterCheck`] so the retention sweep never removes the
/// directory of a run that is still executing.
#[derive(Clone, Debug, Default)]
pub(crate) struct ActiveRuns {
    runs: Arc<Mutex<HashMap<RunId, ActiveRun>>>,
}

impl ActiveRuns {
    pub(crate) async fn insert(&self, id: RunId, dir: PathBuf, token: CancellationToken) {
        self.runs.lock().await.insert(
            id,
            ActiveRun {
                dir,
                token,
                status: RunStatus::Pending,
            },
        );
    }

    /// Drop a run, returning its directory
    pub(crate) async fn remove(&self, id: RunId) -> Option<PathBuf> {
        self.runs.lock().await.remove(&id).map(|run| run.dir)
    }

    /// Move a run to `next`; illegal steps are refused and return false
    pub(crate) async fn transition(&self, id: RunId, next: RunStatus) -> bool {
        let mut runs = self.runs.lock().await;
        let Some(run) = runs.get_mut(&id) else {
            return false;
        };
        if !run.status.can_transition_to(next) {
            tracing::warn!(run_id = %id, from = %run.status, to = %next, "illegal status transition refused");
            return false;
        }
        run.status = next;
        true
    }

    pub(crate) async fn status(&self, id: RunId) -> Option<RunStatus> {
        self.runs.lock().await.get(&id).map(|run| run.status)
    }

    pub(crate) async fn contains(&self, id: RunId) -> bool {
        self.runs.lock().await.contains_key(&id)
    }

    /// Fire the cancellation token of one run
    pub(crate) async fn cancel(&self, id: RunId) -> bool {
        match self.runs.lock().await.get(&id) {
            Some(run) => {
                run.token.cancel();
                true
            }
            None => false,
        }
    }

    pub(crate) async fn cancel_all(&self) {
        let runs = self.runs.lock().await;
        tracing::debug!(active_count = runs.len(), "Cancelling all active runs");
        for (id, run) in runs.iter() {
            tracing::debug!(run_id = %id, "Signaling cancellation");
            run.token.cancel();
        }
    }

    /// Snapshot of every active run, oldest first
    pub(crate) async fn snapshot(&self) -> Vec<(RunId, RunStatus)> {
        let mut runs: Vec<_> = self
            .runs
            .lock()
            .await
            .iter()
            .map(|(id, run)| (*id, run.status))
            .collect();
        runs.sort_by_key(|(id, _)| *id);
        runs
    }

    pub(crate) async fn len(&self) -> usize {
        self.runs.lock().await.len()
    }
}

#[async_trait]
impl WriterCheck for ActiveRuns {
    async fn has_active_writers(&self, dir: &Path) -> Result<bool> {
        Ok(self.runs.lock().await.values().any(|run| run.dir == dir))
    }
}

/// Terminal runs not yet released, with their directory
///
/// Listens to the retention sweep: a run whose directory was swept is
/// forgotten, since there is nothing left to release.
#[derive(Clone, Debug, Default)]
pub(crate) struct FinishedRuns {
    runs: Arc<Mutex<HashMap<RunId, (PathBuf, RunStatus)>>>,
}

impl FinishedRuns {
    pub(crate) async fn insert(&self, id: RunId, dir: PathBuf, status: RunStatus) {
        self.runs.lock().await.insert(id, (dir, status));
    }

    pub(crate) async fn remove(&self, id: RunId) -> Option<(PathBuf, RunStatus)> {
        self.runs.lock().await.remove(&id)
    }

    pub(crate) async fn status(&self, id: RunId) -> Option<RunStatus> {
        self.runs.lock().await.get(&id).map(|(_, status)| *status)
    }

    /// Forget runs whose directory no longer exists on disk
    pub(crate) async fn prune_missing(&self) -> usize {
        let mut runs = self.runs.lock().await;
        let before = runs.len();
        runs.retain(|_, (dir, _)| dir.exists());
        before - runs.len()
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.runs.lock().await.len()
    }
}

#[async_trait]
impl SweepListener for FinishedRuns {
    async fn removed(&self, dir: &Path) {
        let mut runs = self.runs.lock().await;
        runs.retain(|id, (run_dir, _)| {
            let keep = run_dir != dir;
            if !keep {
                tracing::debug!(run_id = %id, dir = %dir.display(), "forgetting swept run");
            }
            keep
        });
    }
}
