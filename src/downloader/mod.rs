//! Run dispatcher split into focused submodules.
//!
//! The `Downloader` struct and its methods are organized by concern:
//! - [`dispatch`] - Admission, run registration and the worker task
//! - [`control`] - Cancel, release and status queries
//! - [`registry`] - Run bookkeeping shared with the retention sweep
//! - [`lifecycle`] - Shutdown coordination
//! - [`services`] - Background service starters

mod control;
mod dispatch;
mod lifecycle;
mod registry;
mod services;


use crate::admission::RateAdmission;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::pipeline::DownloadPipeline;
use crate::tools::{ProcessInvoker, ToolInvoker, ToolPaths};
use crate::types::Event;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::{Semaphore, broadcast};
use tokio_util::sync::CancellationToken;

pub(crate) use registry::{ActiveRuns, FinishedRuns};

/// Run slots and run bookkeeping
#[derive(Clone)]
pub(crate) struct RunState {
    /// Semaphore to limit concurrent runs (respects max_concurrent_runs config)
    pub(crate) concurrent_limit: Arc<Semaphore>,
    /// Runs that have not reached a terminal status
    pub(crate) active: ActiveRuns,
    /// Terminal runs not yet released, with their directory
    pub(crate) finished: FinishedRuns,
    /// Flag to indicate whether new runs are accepted (set to false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Parent of every run token and background service token
    pub(crate) root_token: CancellationToken,
}

/// Main dispatcher instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct Downloader {
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Stage sequence every run goes through
    pub(crate) pipeline: Arc<DownloadPipeline>,
    /// Admission control consulted on submit
    pub(crate) admission: RateAdmission,
    /// Run slots and bookkeeping
    pub(crate) state: RunState,
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("pipeline", &self.pipeline)
            .field("admission", &self.admission)
            .finish_non_exhaustive()
    }
}

impl Downloader {
    /// Create a new Downloader instance
    ///
    /// This initializes all core components:
    /// - Validates the configuration and creates the artifact root
    /// - Resolves the external tools (explicit paths, then PATH)
    /// - Opens the shared admission store when one is configured
    /// - Sets up the event broadcast channel
    pub async fn new(config: Config) -> Result<Self> {
        // before the admission store is opened
        config.validate()?;

        let tools = ToolPaths::discover(&config.tools);
        let invoker: Arc<dyn ToolInvoker> = Arc::new(ProcessInvoker::new(tools.clone()));
        let admission = RateAdmission::from_config(&config.rate_limit).await?;

        Self::from_parts(config, invoker, &tools, admission).await
    }

    /// Create a Downloader around an existing invoker and admission limiter
    ///
    /// `tools` is only consulted for the download accelerator path.
    pub async fn from_parts(
        config: Config,
        invoker: Arc<dyn ToolInvoker>,
        tools: &ToolPaths,
        admission: RateAdmission,
    ) -> Result<Self> {
        config.validate()?;

        tokio::fs::create_dir_all(&config.download.root_dir)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create artifact root '{}': {}",
                        config.download.root_dir.display(),
                        e
                    ),
                ))
            })?;

        // Create broadcast channel with buffer size of 1000 events
        // This allows multiple subscribers to receive all events independently
        let (event_tx, _rx) = broadcast::channel(1000);

        let pipeline = Arc::new(DownloadPipeline::new(&config, invoker, tools));

        let state = RunState {
            concurrent_limit: Arc::new(Semaphore::new(config.download.max_concurrent_runs)),
            active: ActiveRuns::default(),
            finished: FinishedRuns::default(),
            accepting_new: Arc::new(AtomicBool::new(true)),
            root_token: CancellationToken::new(),
        };

        tracing::info!(
            root_dir = %config.download.root_dir.display(),
            max_concurrent_runs = config.download.max_concurrent_runs,
            admission_enabled = admission.is_enabled(),
            "Downloader initialized"
        );

        Ok(Self {
            event_tx,
            config: Arc::new(config),
            pipeline,
            admission,
            state,
        })
    }

    /// Subscribe to run events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events independently.
    /// Events are buffered, but if a subscriber falls behind by more than 1000 events,
    /// it will receive a `RecvError::Lagged` error.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use clipfetch::{Config, Downloader, Event};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let downloader = Downloader::new(Config::default()).await?;
    ///
    ///     let mut events = downloader.subscribe();
    ///     tokio::spawn(async move {
    ///         while let Ok(event) = events.recv().await {
    ///             if let Event::Completed { id, bundle } = event {
    ///                 println!("run {id} finished: {:?}", bundle.video);
    ///             }
    ///         }
    ///     });
    ///
    ///     Ok(())
    /// }
    /// ```
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// The pipeline runs are executed with
    pub fn pipeline(&self) -> &DownloadPipeline {
        &self.pipeline
    }

    /// Emit an event to all subscribers
    ///
    /// If there are no active subscribers, the event is silently dropped.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}
