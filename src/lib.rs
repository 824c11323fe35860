//! # clipfetch
//!
//! Media download orchestration: takes a video URL through an external-tool
//! pipeline (yt-dlp, aria2c, ffmpeg, ffprobe) and hands back a bundle of
//! artifacts.
//!
//! ## Design Philosophy
//!
//! clipfetch is designed to be:
//! - **Resilient** - Every stage retries with deterministic backoff; only the primary video is critical
//! - **Sensible defaults** - Works out of the box with zero configuration
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use clipfetch::{Config, Downloader, Event};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let downloader = Downloader::new(Config::default()).await?;
//!     downloader.start_retention_sweeper();
//!     downloader.start_admission_sweeper();
//!
//!     let mut events = downloader.subscribe();
//!     let id = downloader
//!         .submit("user-42", "https://www.youtube.com/watch?v=dQw4w9WgXcQ", "en")
//!         .await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         match event {
//!             Event::Completed { id: done, bundle } if done == id => {
//!                 println!("video: {:?}, audio: {:?}", bundle.video, bundle.audio);
//!                 downloader.release(id).await?;
//!                 break;
//!             }
//!             Event::Failed { id: done, error } if done == id => {
//!                 eprintln!("run failed: {error}");
//!                 break;
//!             }
//!             _ => {}
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Request admission (rate limiting)
pub mod admission;
/// Configuration types
pub mod config;
/// Per-platform cookie files
pub mod cookies;
/// Run dispatcher (decomposed into focused submodules)
pub mod downloader;
/// Error types
pub mod error;
/// Download orchestration pipeline
pub mod pipeline;
/// Run-directory retention
pub mod retention;
/// Retry logic with exponential backoff
pub mod retry;
/// External tool invocation
pub mod tools;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use admission::{Admission, AdmissionBackend, RateAdmission};
pub use config::Config;
pub use downloader::Downloader;
pub use error::{DatabaseError, Error, Result};
pub use pipeline::{ArtifactBundle, DownloadPipeline, RunDir, Stage};
pub use retention::{RetentionSweeper, SweepListener, SweepReport, WriterCheck};
pub use retry::{IsRetryable, execute_with_retry};
pub use tools::{Invocation, ProcessInvoker, Tool, ToolInvoker, ToolOutput, ToolPaths};
pub use types::{Event, RunId, RunStatus};

/// Helper function to run the downloader with graceful signal handling.
///
/// Waits for a termination signal and then calls the downloader's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use clipfetch::{Config, Downloader, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let downloader = Downloader::new(Config::default()).await?;
///     downloader.start_retention_sweeper();
///
///     // Run with automatic signal handling
///     run_with_shutdown(downloader).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(downloader: Downloader) -> Result<()> {
    wait_for_signal().await;
    downloader.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
