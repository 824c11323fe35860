//! Request admission (rate limiting)
//!
//! [`RateAdmission`] decides whether an identifier may start another run
//! within the configured window. The counting itself lives behind the
//! [`AdmissionBackend`] trait, chosen once at construction:
//!
//! - [`MemoryBackend`]: per-process counters with a window start timestamp
//! - [`StoreBackend`]: sliding window of request markers in a shared
//!   [`CounterStore`] (SQLite via [`SqliteCounterStore`]), so several
//!   processes pointed at the same file share one limit
//!
//! Shared-store failures fail open: the request is admitted and the error is
//! handed back alongside the decision.

use crate::config::RateLimitConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

mod memory;
mod store;

pub use memory::MemoryBackend;
pub use store::{CounterStore, SqliteCounterStore, StoreBackend};

/// Identifier every caller shares when per-user limiting is off
pub const GLOBAL_IDENTIFIER: &str = "global";

/// Outcome of one admission check
#[derive(Debug)]
pub struct Admission {
    /// Whether the run may start
    pub allowed: bool,
    /// Set when the backend failed and the request was admitted anyway
    pub backend_error: Option<Error>,
}

impl Admission {
    fn allowed() -> Self {
        Self {
            allowed: true,
            backend_error: None,
        }
    }
}

/// A backend's answer for one key
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request was counted and admitted
    pub allowed: bool,
    /// Requests in the window before this one
    pub count: u32,
}

/// Counting strategy behind [`RateAdmission`]
#[async_trait]
pub trait AdmissionBackend: Send + Sync {
    /// Count a request for `key` if the window still has room
    async fn check(&self, key: &str) -> Result<Decision>;

    /// Drop state whose window has elapsed, returning how many keys went
    async fn sweep_expired(&self) -> usize {
        0
    }

    /// True when this backend keeps state that only a local sweep can free
    fn needs_sweeping(&self) -> bool {
        false
    }

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Rate limiter gating how often runs may start
#[derive(Clone)]
pub struct RateAdmission {
    enabled: bool,
    per_user: bool,
    window: Duration,
    backend: Arc<dyn AdmissionBackend>,
}

impl std::fmt::Debug for RateAdmission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateAdmission")
            .field("enabled", &self.enabled)
            .field("per_user", &self.per_user)
            .field("window", &self.window)
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl RateAdmission {
    /// Build the limiter, opening the shared store when `store_path` is set
    pub async fn from_config(config: &RateLimitConfig) -> Result<Self> {
        let backend: Arc<dyn AdmissionBackend> = match &config.store_path {
            Some(path) => {
                let store = SqliteCounterStore::open(path).await?;
                tracing::info!(path = %path.display(), "using shared admission store");
                Arc::new(StoreBackend::new(
                    Arc::new(store),
                    config.requests_max,
                    config.window,
                ))
            }
            None => Arc::new(MemoryBackend::new(config.requests_max, config.window)),
        };
        Ok(Self::with_backend(config, backend))
    }

    /// Build the limiter around an explicit backend
    pub fn with_backend(config: &RateLimitConfig, backend: Arc<dyn AdmissionBackend>) -> Self {
        Self {
            enabled: config.enabled,
            per_user: config.per_user,
            window: config.window,
            backend,
        }
    }

    /// A limiter that admits everything
    pub fn disabled() -> Self {
        let config = RateLimitConfig {
            enabled: false,
            ..Default::default()
        };
        let backend = Arc::new(MemoryBackend::new(config.requests_max, config.window));
        Self::with_backend(&config, backend)
    }

    /// Whether admission control is active
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Decide whether `identifier` may start another run now
    pub async fn allow(&self, identifier: &str) -> Admission {
        if !self.enabled {
            return Admission::allowed();
        }

        let key = if self.per_user {
            identifier
        } else {
            GLOBAL_IDENTIFIER
        };

        match self.backend.check(key).await {
            Ok(decision) if decision.allowed => Admission::allowed(),
            Ok(decision) => {
                tracing::warn!(
                    identifier = key,
                    count = decision.count,
                    window_secs = self.window.as_secs(),
                    "rate limit exceeded"
                );
                Admission {
                    allowed: false,
                    backend_error: None,
                }
            }
            Err(e) => {
                tracing::error!(
                    identifier = key,
                    backend = self.backend.name(),
                    error = %e,
                    "admission backend failed; allowing request"
                );
                Admission {
                    allowed: true,
                    backend_error: Some(e),
                }
            }
        }
    }

    /// Remove in-process counters whose window has elapsed
    pub async fn sweep_expired(&self) -> usize {
        let removed = self.backend.sweep_expired().await;
        if removed > 0 {
            tracing::debug!(removed, "swept expired admission counters");
        }
        removed
    }

    /// Sweep expired counters every window length until `cancel` fires
    ///
    /// Returns `None` when there is nothing to sweep (admission disabled or
    /// a shared store that expires its own markers) or the window is zero.
    pub fn spawn_sweeper(&self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        if !self.enabled || !self.backend.needs_sweeping() {
            return None;
        }
        if self.window.is_zero() {
            tracing::warn!("admission window is zero, not starting sweeper");
            return None;
        }

        let admission = self.clone();
        let period = self.window;
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("admission sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        admission.sweep_expired().await;
                    }
                }
            }
        }))
    }
}
