//! Run-directory retention
//!
//! The [`RetentionSweeper`] removes run directories under the artifact root
//! once their modification time is older than the retention window. Before
//! removing anything it asks a [`WriterCheck`] whether the directory is still
//! being written; busy directories and directories whose check fails are left
//! for a later sweep.
//!
//! The sweep runs on its own timer, independent of the runs themselves.

use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Extensions left behind by in-progress transfers and transcodes
const PARTIAL_EXTENSIONS: &[&str] = &["part", "ytdl", "aria2", "temp", "tmp"];

/// Decides whether a run directory still has a writer
#[async_trait]
pub trait WriterCheck: Send + Sync {
    /// `Ok(true)` if something may still be writing into `dir`
    async fn has_active_writers(&self, dir: &Path) -> Result<bool>;
}

/// Told about every directory a sweep deletes
#[async_trait]
pub trait SweepListener: Send + Sync {
    /// `dir` was removed from disk
    async fn removed(&self, dir: &Path);
}

/// Treats a directory holding partial-download files as busy
#[derive(Clone, Copy, Debug, Default)]
pub struct PartialFileCheck;

#[async_trait]
impl WriterCheck for PartialFileCheck {
    async fn has_active_writers(&self, dir: &Path) -> Result<bool> {
        let mut pending = vec![dir.to_path_buf()];
        while let Some(current) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&current).await?;
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                } else if is_partial(&path) {
                    tracing::debug!(path = %path.display(), "partial file found");
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

fn is_partial(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            PARTIAL_EXTENSIONS
                .iter()
                .any(|p| ext.eq_ignore_ascii_case(p))
        })
}

/// Busy if any of the inner checks says so; the first error wins
#[derive(Clone, Default)]
pub struct AnyWriter {
    checks: Vec<Arc<dyn WriterCheck>>,
}

impl AnyWriter {
    /// Empty combination (never busy)
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a check
    pub fn with(mut self, check: Arc<dyn WriterCheck>) -> Self {
        self.checks.push(check);
        self
    }
}

#[async_trait]
impl WriterCheck for AnyWriter {
    async fn has_active_writers(&self, dir: &Path) -> Result<bool> {
        for check in &self.checks {
            if check.has_active_writers(dir).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// What one sweep did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Directories deleted
    pub removed: Vec<PathBuf>,
    /// Expired directories left alone because a writer is active
    pub busy: Vec<PathBuf>,
    /// Expired directories left alone because checking or deleting failed
    pub skipped: Vec<(PathBuf, String)>,
}

/// Deletes run directories older than the retention window
#[derive(Clone)]
pub struct RetentionSweeper {
    root: PathBuf,
    max_age: Duration,
    check: Arc<dyn WriterCheck>,
    listeners: Vec<Arc<dyn SweepListener>>,
}

impl RetentionSweeper {
    /// Sweeper over `root` using [`PartialFileCheck`]
    pub fn new(root: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self::with_check(root, max_age, Arc::new(PartialFileCheck))
    }

    /// Sweeper over `root` with a custom writer check
    pub fn with_check(
        root: impl Into<PathBuf>,
        max_age: Duration,
        check: Arc<dyn WriterCheck>,
    ) -> Self {
        Self {
            root: root.into(),
            max_age,
            check,
            listeners: Vec::new(),
        }
    }

    /// Notify `listener` of each directory this sweeper removes
    pub fn with_listener(mut self, listener: Arc<dyn SweepListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Retention window
    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Scan the root once and remove expired, idle run directories
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(root = %self.root.display(), "artifact root does not exist yet");
                return report;
            }
            Err(e) => {
                tracing::error!(root = %self.root.display(), error = %e, "failed to read artifact root");
                return report;
            }
        };

        let now = SystemTime::now();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "failed to read artifact root entry");
                    break;
                }
            };
            let path = entry.path();

            let metadata = match entry.metadata().await {
                Ok(m) => m,
                Err(e) => {
                    report.skipped.push((path, e.to_string()));
                    continue;
                }
            };
            if !metadata.is_dir() {
                continue;
            }

            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or(Duration::ZERO);
            if age <= self.max_age {
                continue;
            }

            match self.check.has_active_writers(&path).await {
                Ok(true) => {
                    tracing::debug!(dir = %path.display(), "expired run directory still in use");
                    report.busy.push(path);
                }
                Ok(false) => match tokio::fs::remove_dir_all(&path).await {
                    Ok(()) => {
                        tracing::info!(
                            dir = %path.display(),
                            age_secs = age.as_secs(),
                            "removed expired run directory"
                        );
                        for listener in &self.listeners {
                            listener.removed(&path).await;
                        }
                        report.removed.push(path);
                    }
                    Err(e) => {
                        tracing::warn!(dir = %path.display(), error = %e, "failed to remove run directory");
                        report.skipped.push((path, e.to_string()));
                    }
                },
                Err(e) => {
                    tracing::warn!(dir = %path.display(), error = %e, "writer check failed, keeping directory");
                    report.skipped.push((path, e.to_string()));
                }
            }
        }

        if !report.removed.is_empty() || !report.skipped.is_empty() {
            tracing::info!(
                removed = report.removed.len(),
                busy = report.busy.len(),
                skipped = report.skipped.len(),
                "retention sweep finished"
            );
        }
        report
    }

    /// Sweep every `interval` until `cancel` fires
    ///
    /// The first sweep happens immediately.
    pub fn spawn(self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("retention sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.sweep().await;
                    }
                }
            }
        })
    }
}
