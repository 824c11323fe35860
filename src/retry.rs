//! Retry logic with exponential backoff
//!
//! Every pipeline stage is wrapped by [`execute_with_retry`]. Backoff is
//! deterministic (no jitter): the wait before retry `k` is
//! `min(initial_delay * backoff_multiplier^(k-1), max_delay)`.
//!
//! Cancellation is checked before every attempt and raced against every
//! wait, and it is always reported as [`Error::Cancelled`], never as
//! [`Error::RetriesExhausted`].
//!
//! # Example
//!
//! ```no_run
//! use clipfetch::config::RetryConfig;
//! use clipfetch::retry::execute_with_retry;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> clipfetch::Result<()> {
//! let config = RetryConfig::default();
//! let cancel = CancellationToken::new();
//! let value = execute_with_retry(&config, &cancel, || async {
//!     Ok::<_, clipfetch::Error>(42)
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (a tool exiting non-zero, a deadline) return `true`.
/// Permanent failures (missing binary, cancellation, bad input) return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // The tool ran and failed; network hiccups on the remote side land here
            Error::ToolExecutionFailed { .. } => true,
            // A slow transfer may finish on the next try
            Error::DeadlineExceeded { .. } => true,
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // Missing binaries need operator action
            Error::ToolNotFound { .. } => false,
            // Caller asked us to stop
            Error::Cancelled => false,
            // Already the result of a retry loop
            Error::RetriesExhausted { .. } => false,
            Error::Config { .. }
            | Error::InvalidUrl(_)
            | Error::AdmissionDenied { .. }
            | Error::BackendUnavailable(_)
            | Error::ShuttingDown
            | Error::NotFound(_)
            | Error::RunActive(_)
            | Error::Database(_)
            | Error::Sqlx(_)
            | Error::Serialization(_) => false,
        }
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// # Arguments
///
/// * `config` - Retry policy (max retries, delays, backoff multiplier)
/// * `cancel` - Caller cancellation; observed before each attempt and during waits
/// * `operation` - Async closure producing one attempt
///
/// # Returns
///
/// - the first successful result
/// - the error unchanged if it is not retryable
/// - [`Error::RetriesExhausted`] wrapping the last failure once
///   `config.max_attempts` retries have been spent (`max_attempts + 1` calls)
/// - [`Error::Cancelled`] if `cancel` fires first
pub async fn execute_with_retry<F, Fut, T>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    let mut delay = config.initial_delay.min(config.max_delay);

    loop {
        if cancel.is_cancelled() {
            tracing::warn!(attempt = attempt + 1, "Cancelled before attempt");
            return Err(Error::Cancelled);
        }

        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if !e.is_retryable() => {
                if e.is_cancelled() {
                    tracing::warn!(attempt = attempt + 1, "Operation cancelled");
                } else {
                    tracing::error!(error = %e, "Operation failed with non-retryable error");
                }
                return Err(e);
            }
            Err(e) if attempt >= config.max_attempts => {
                tracing::error!(
                    error = %e,
                    attempts = attempt + 1,
                    "Operation failed after all retry attempts exhausted"
                );
                return Err(Error::RetriesExhausted {
                    attempts: attempt + 1,
                    source: Box::new(e),
                });
            }
            Err(e) => {
                attempt += 1;

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tracing::warn!(attempt = attempt, "Cancelled during retry wait");
                        return Err(Error::Cancelled);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }

                delay = next_delay(delay, config);
            }
        }
    }
}

/// The waits a policy produces, in order: one entry per retry
pub fn backoff_schedule(config: &RetryConfig) -> Vec<Duration> {
    let mut delay = config.initial_delay.min(config.max_delay);
    let mut schedule = Vec::with_capacity(config.max_attempts as usize);
    for _ in 0..config.max_attempts {
        schedule.push(delay);
        delay = next_delay(delay, config);
    }
    schedule
}

/// Grow `delay` by the multiplier and clamp it to `max_delay`
fn next_delay(delay: Duration, config: &RetryConfig) -> Duration {
    Duration::try_from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier)
        .unwrap_or(config.max_delay)
        .min(config.max_delay)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn transient() -> Error {
        Error::ToolExecutionFailed {
            tool: Tool::VideoFetcher,
            reason: "exit status 1".to_string(),
            output: String::new(),
        }
    }

    fn policy(max_attempts: u32, initial_ms: u64, max_ms: u64, multiplier: f64) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            backoff_multiplier: multiplier,
        }
    }

    #[tokio::test]
    async fn test_success_no_retry() {
        let config = RetryConfig::default();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = execute_with_retry(&config, &CancellationToken::new(), || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1, "should only call once");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_transient_then_succeed() {
        let config = policy(3, 10, 1_000, 2.0);
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = execute_with_retry(&config, &CancellationToken::new(), || {
            let counter = counter_clone.clone();
            async move {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                if count < 2 { Err(transient()) } else { Ok(42) }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(
            counter.load(Ordering::SeqCst),
            3,
            "should retry twice before success"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_operation_runs_max_attempts_plus_one_times() {
        for max_attempts in [0u32, 1, 2, 5] {
            let config = policy(max_attempts, 10, 1_000, 2.0);
            let counter = Arc::new(AtomicU32::new(0));
            let counter_clone = counter.clone();

            let result = execute_with_retry(&config, &CancellationToken::new(), || {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(transient())
                }
            })
            .await;

            assert_eq!(counter.load(Ordering::SeqCst), max_attempts + 1);
            match result {
                Err(Error::RetriesExhausted { attempts, source }) => {
                    assert_eq!(attempts, max_attempts + 1);
                    assert!(matches!(*source, Error::ToolExecutionFailed { .. }));
                }
                other => panic!("expected RetriesExhausted, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_permanent_error_no_retry() {
        let config = RetryConfig::default();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = execute_with_retry(&config, &CancellationToken::new(), || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(Error::ToolNotFound {
                    tool: Tool::Accelerator,
                })
            }
        })
        .await;

        assert!(
            matches!(result, Err(Error::ToolNotFound { .. })),
            "non-retryable errors are returned unchanged"
        );
        assert_eq!(
            counter.load(Ordering::SeqCst),
            1,
            "should not retry permanent error"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn waits_follow_the_clamped_exponential_schedule() {
        // Unclamped: 50, 100, 200, 400. Clamped to 250: 50, 100, 200, 250
        let config = policy(4, 50, 250, 2.0);

        let timestamps = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let ts_clone = timestamps.clone();

        let _ = execute_with_retry(&config, &CancellationToken::new(), || {
            let ts = ts_clone.clone();
            async move {
                ts.lock().await.push(Instant::now());
                Err::<(), _>(transient())
            }
        })
        .await;

        let ts = timestamps.lock().await;
        assert_eq!(ts.len(), 5, "initial + 4 retries = 5 calls");

        let gaps: Vec<Duration> = ts.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(gaps, backoff_schedule(&config));
        assert_eq!(
            gaps,
            vec![
                Duration::from_millis(50),
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(250),
            ]
        );
    }

    #[test]
    fn schedule_matches_closed_form() {
        let config = policy(8, 100, 5_000, 3.0);
        let schedule = backoff_schedule(&config);

        for (i, wait) in schedule.iter().enumerate() {
            let k = i as i32 + 1;
            let expected = Duration::from_secs_f64(
                (config.initial_delay.as_secs_f64() * config.backoff_multiplier.powi(k - 1))
                    .min(config.max_delay.as_secs_f64()),
            );
            let diff = wait.abs_diff(expected);
            assert!(
                diff < Duration::from_micros(1),
                "wait before retry {k} was {wait:?}, expected {expected:?}"
            );
        }
    }

    #[test]
    fn huge_multiplier_converges_instead_of_overflowing() {
        let config = RetryConfig {
            max_attempts: 64,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(u64::MAX / 2),
            backoff_multiplier: 1e300,
        };

        let schedule = backoff_schedule(&config);
        assert_eq!(schedule.len(), 64);
        assert!(schedule[2..].iter().all(|d| *d == config.max_delay));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_wait_is_cancelled_not_exhausted() {
        let config = policy(10, 1_000, 1_000, 1.0);
        let cancel = CancellationToken::new();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result = execute_with_retry(&config, &cancel, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(transient())
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Cancelled)), "got {result:?}");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_before_first_attempt_never_invokes() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = execute_with_retry(&RetryConfig::default(), &cancel, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_reported_by_operation_propagates_immediately() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = execute_with_retry(&RetryConfig::default(), &CancellationToken::new(), || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::Cancelled)
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn tool_failures_and_deadlines_are_retryable() {
        assert!(transient().is_retryable());
        assert!(
            Error::DeadlineExceeded {
                tool: Tool::Transcoder,
                timeout: Duration::from_secs(1),
            }
            .is_retryable()
        );
    }

    #[test]
    fn permanent_errors_are_not_retryable() {
        assert!(!Error::ToolNotFound { tool: Tool::Prober }.is_retryable());
        assert!(!Error::Cancelled.is_retryable());
        assert!(!Error::InvalidUrl("ftp://x".to_string()).is_retryable());
        assert!(!Error::ShuttingDown.is_retryable());
        assert!(
            !Error::RetriesExhausted {
                attempts: 2,
                source: Box::new(transient()),
            }
            .is_retryable()
        );
    }

    #[test]
    fn io_retryability_follows_error_kind() {
        let timeout_err = Error::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "timeout"));
        assert!(timeout_err.is_retryable());

        let not_found = Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "not found",
        ));
        assert!(!not_found.is_retryable());
    }
}
