//! Error types for clipfetch
//!
//! This module defines the error taxonomy shared by every layer of the crate:
//! - Tool invocation failures (missing binary, non-zero exit, deadline)
//! - Caller cancellation, kept distinct from exhausted retries
//! - Admission failures (denial and shared-store outages)
//! - Configuration, persistence and I/O errors

use crate::tools::Tool;
use crate::types::RunId;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for clipfetch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for clipfetch
///
/// Every variant carries enough context to be logged on its own. Callers that
/// need to tell cancellation apart from genuine failure should use
/// [`Error::is_cancelled`], which also looks through [`Error::RetriesExhausted`].
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "retry.max_delay")
        key: Option<String>,
    },

    /// The submitted URL is not an http(s) URL
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// A required executable has no resolved path, or the path does not exist
    #[error("{tool} executable not found")]
    ToolNotFound {
        /// The logical tool that could not be resolved
        tool: Tool,
    },

    /// The tool ran but exited non-zero or produced output we could not use
    #[error("{tool} failed: {reason}")]
    ToolExecutionFailed {
        /// The logical tool that failed
        tool: Tool,
        /// Short reason (exit status, missing output file, parse failure)
        reason: String,
        /// Tail of the combined stdout/stderr output
        output: String,
    },

    /// The invocation did not finish before its deadline
    #[error("{tool} exceeded its deadline of {timeout:?}")]
    DeadlineExceeded {
        /// The logical tool that timed out
        tool: Tool,
        /// The deadline that elapsed
        timeout: Duration,
    },

    /// The caller's cancellation signal fired
    #[error("operation cancelled")]
    Cancelled,

    /// The attempt budget was spent; wraps the last underlying failure
    #[error("max retries reached after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Total number of attempts made (initial try included)
        attempts: u32,
        /// The error returned by the final attempt
        #[source]
        source: Box<Error>,
    },

    /// Rate limit exceeded for the identifier
    #[error("rate limit exceeded for {identifier}")]
    AdmissionDenied {
        /// The identifier (or "global") whose window is full
        identifier: String,
    },

    /// Shared admission store unreachable; admission fails open on this
    #[error("admission backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Shutdown in progress - not accepting new runs
    #[error("shutdown in progress: not accepting new runs")]
    ShuttingDown,

    /// Run not known to the downloader
    #[error("run not found: {0}")]
    NotFound(String),

    /// The run has not reached a terminal status yet
    #[error("run {0} is still active")]
    RunActive(RunId),

    /// Counter-store operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Returns true if this error is, or wraps, a caller cancellation
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::RetriesExhausted { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Shorthand for a configuration error tied to a key
    pub(crate) fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

/// Counter-store errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_exhausted_display_includes_last_failure() {
        let err = Error::RetriesExhausted {
            attempts: 4,
            source: Box::new(Error::ToolExecutionFailed {
                tool: Tool::VideoFetcher,
                reason: "exit status 1".to_string(),
                output: String::new(),
            }),
        };

        let msg = err.to_string();
        assert!(msg.contains("4 attempts"), "got: {msg}");
        assert!(msg.contains("yt-dlp failed: exit status 1"), "got: {msg}");
    }

    #[test]
    fn is_cancelled_looks_through_retries_exhausted() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(
            Error::RetriesExhausted {
                attempts: 2,
                source: Box::new(Error::Cancelled),
            }
            .is_cancelled()
        );
        assert!(
            !Error::DeadlineExceeded {
                tool: Tool::Prober,
                timeout: Duration::from_secs(5),
            }
            .is_cancelled(),
            "a tool deadline is not a caller cancellation"
        );
    }

    #[test]
    fn source_chain_exposes_wrapped_error() {
        use std::error::Error as _;

        let err = Error::RetriesExhausted {
            attempts: 1,
            source: Box::new(Error::ToolNotFound {
                tool: Tool::Transcoder,
            }),
        };
        let source = err.source().expect("wrapped error should be the source");
        assert_eq!(source.to_string(), "ffmpeg executable not found");
    }

    #[test]
    fn config_helper_records_key() {
        match Error::config("rate_limit.window", "must be non-zero") {
            Error::Config { message, key } => {
                assert_eq!(message, "must be non-zero");
                assert_eq!(key.as_deref(), Some("rate_limit.window"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
