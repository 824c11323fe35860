//! Core types for clipfetch

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::pipeline::ArtifactBundle;

/// Unique identifier for a pipeline run
///
/// Derived from the creation time in Unix nanoseconds and forced strictly
/// increasing within the process, so two runs started in the same clock
/// tick still get distinct directories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub u64);

static LAST_RUN_ID: AtomicU64 = AtomicU64::new(0);

impl RunId {
    /// Create a RunId from a raw value
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocate the next identifier: `max(now_nanos, last + 1)`
    pub fn next() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(0);

        let mut last = LAST_RUN_ID.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(last.saturating_add(1));
            match LAST_RUN_ID.compare_exchange_weak(
                last,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Self(candidate),
                Err(observed) => last = observed,
            }
        }
    }

    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for RunId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<RunId> for u64 {
    fn from(id: RunId) -> Self {
        id.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Run status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Admitted, waiting for a worker slot
    Pending,
    /// Pipeline stages are executing
    Processing,
    /// Bundle produced
    Completed,
    /// Critical stage failed or the run was cancelled
    Failed,
}

impl RunStatus {
    /// Completed and Failed never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a legal lifecycle step
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        match (self, next) {
            (RunStatus::Pending, RunStatus::Processing) => true,
            // cancelled while still waiting for a permit
            (RunStatus::Pending, RunStatus::Failed) => true,
            (RunStatus::Processing, RunStatus::Completed | RunStatus::Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Processing => "processing",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Event emitted during the run lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A run moved to a new status
    StatusChanged {
        /// Run ID
        id: RunId,
        /// New status
        status: RunStatus,
    },

    /// A run produced its bundle
    Completed {
        /// Run ID
        id: RunId,
        /// Artifacts produced by the run
        bundle: ArtifactBundle,
    },

    /// A run failed
    Failed {
        /// Run ID
        id: RunId,
        /// Error message
        error: String,
    },

    /// The caller released a finished run and its directory was deleted
    Released {
        /// Run ID
        id: RunId,
    },

    /// Graceful shutdown initiated
    Shutdown,
}
