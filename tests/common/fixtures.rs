//! Tool fixtures: an invoker that creates the files the real tools would

use async_trait::async_trait;
use clipfetch::{Error, Invocation, Result, Tool, ToolInvoker, ToolOutput};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

/// Duration the fake prober reports
pub const PROBED_DURATION: &str = "42.9\n";

/// Writes placeholder artifacts instead of running tools
///
/// Video-fetcher calls write to their `-o` template, transcoder calls write to
/// their last argument, prober calls print [`PROBED_DURATION`].
#[derive(Default)]
pub struct FileWritingInvoker {
    failing: Mutex<HashSet<Tool>>,
    calls: AtomicUsize,
}

impl FileWritingInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every invocation of `tool` exits non-zero
    pub fn failing(self, tool: Tool) -> Self {
        self.failing.lock().unwrap().insert(tool);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn output_path(inv: &Invocation) -> Option<PathBuf> {
        match inv.tool {
            Tool::VideoFetcher | Tool::Accelerator => {
                let template = inv.value_of("-o")?.to_string_lossy().into_owned();
                let ext = if inv.has_arg("--write-thumbnail") {
                    "jpg".to_string()
                } else if inv.has_arg("--write-subs") {
                    let lang = inv.value_of("--sub-langs")?.to_string_lossy().into_owned();
                    format!("{lang}.srt")
                } else {
                    "mp4".to_string()
                };
                Some(PathBuf::from(template.replace("%(ext)s", &ext)))
            }
            Tool::Transcoder => inv.args.last().map(PathBuf::from),
            Tool::Prober => None,
        }
    }
}

#[async_trait]
impl ToolInvoker for FileWritingInvoker {
    async fn invoke(&self, inv: &Invocation, cancel: &CancellationToken) -> Result<ToolOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        if self.failing.lock().unwrap().contains(&inv.tool) {
            return Err(Error::ToolExecutionFailed {
                tool: inv.tool,
                reason: "exit status 1".to_string(),
                output: String::new(),
            });
        }

        if inv.tool == Tool::Prober {
            return Ok(ToolOutput {
                stdout: PROBED_DURATION.to_string(),
                combined: PROBED_DURATION.to_string(),
            });
        }

        if let Some(path) = Self::output_path(inv) {
            tokio::fs::write(&path, inv.tool.binary_name()).await?;
        }
        Ok(ToolOutput::default())
    }
}
