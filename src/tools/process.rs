//! Process-backed tool invoker

use super::{Invocation, ToolInvoker, ToolOutput, ToolPaths};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Maximum number of output bytes kept in error values and logs
const OUTPUT_TAIL_BYTES: usize = 2048;

/// Runs tools as child processes
///
/// The child is spawned with `kill_on_drop`, so losing the race against the
/// deadline or the cancellation token kills it.
#[derive(Clone, Debug)]
pub struct ProcessInvoker {
    paths: ToolPaths,
}

impl ProcessInvoker {
    /// Create an invoker over resolved tool paths
    pub fn new(paths: ToolPaths) -> Self {
        Self { paths }
    }

    /// The tool paths this invoker resolves against
    pub fn paths(&self) -> &ToolPaths {
        &self.paths
    }
}

#[async_trait]
impl ToolInvoker for ProcessInvoker {
    async fn invoke(
        &self,
        invocation: &Invocation,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput> {
        let tool = invocation.tool;
        let path = self
            .paths
            .get(tool)
            .ok_or(Error::ToolNotFound { tool })?;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        tracing::debug!(
            %tool,
            path = %path.display(),
            args = %invocation.display_args(),
            timeout_secs = invocation.timeout.as_secs(),
            "running external tool"
        );

        let child = Command::new(path)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => Error::ToolNotFound { tool },
                _ => Error::ToolExecutionFailed {
                    tool,
                    reason: format!("failed to start: {e}"),
                    output: String::new(),
                },
            })?;

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(%tool, "tool invocation cancelled");
                return Err(Error::Cancelled);
            }
            result = tokio::time::timeout(invocation.timeout, child.wait_with_output()) => {
                match result {
                    Ok(Ok(output)) => output,
                    Ok(Err(e)) => {
                        return Err(Error::ToolExecutionFailed {
                            tool,
                            reason: format!("failed to collect output: {e}"),
                            output: String::new(),
                        });
                    }
                    Err(_) => {
                        tracing::warn!(%tool, timeout = ?invocation.timeout, "tool exceeded its deadline");
                        return Err(Error::DeadlineExceeded {
                            tool,
                            timeout: invocation.timeout,
                        });
                    }
                }
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = format!("{stdout}{stderr}");

        if !output.status.success() {
            let reason = match output.status.code() {
                Some(code) => format!("exit status {code}"),
                None => "terminated by signal".to_string(),
            };
            return Err(Error::ToolExecutionFailed {
                tool,
                reason,
                output: output_tail(&combined).to_string(),
            });
        }

        Ok(ToolOutput { combined, stdout })
    }
}

/// Last `OUTPUT_TAIL_BYTES` of `text`, cut on a char boundary
fn output_tail(text: &str) -> &str {
    if text.len() <= OUTPUT_TAIL_BYTES {
        return text;
    }
    let mut start = text.len() - OUTPUT_TAIL_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
