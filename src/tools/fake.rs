//! Scripted invoker for pipeline tests
//!
//! Recognizes which pipeline step an invocation belongs to from its
//! arguments, then either fails as scripted or writes the file the real tool
//! would have produced.

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::{Invocation, Tool, ToolInvoker, ToolOutput};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// What a single invocation was for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Step {
    ThumbnailFetch,
    VideoAccelerated,
    VideoDirect,
    SubtitleFetch,
    Embed,
    Audio,
    Probe,
    FrameGrab,
}

impl Step {
    pub(crate) fn of(inv: &Invocation) -> Step {
        match inv.tool {
            Tool::VideoFetcher if inv.has_arg("--write-thumbnail") => Step::ThumbnailFetch,
            Tool::VideoFetcher if inv.has_arg("--write-subs") => Step::SubtitleFetch,
            Tool::VideoFetcher if inv.has_arg("--downloader") => Step::VideoAccelerated,
            Tool::VideoFetcher | Tool::Accelerator => Step::VideoDirect,
            Tool::Transcoder if inv.has_arg("-vf") => Step::Embed,
            Tool::Transcoder if inv.has_arg("-vn") => Step::Audio,
            Tool::Transcoder => Step::FrameGrab,
            Tool::Prober => Step::Probe,
        }
    }
}

pub(crate) struct ScriptedInvoker {
    failures: Mutex<HashMap<Step, u32>>,
    silent: Mutex<HashSet<Step>>,
    hanging: Mutex<HashSet<Step>>,
    missing: Mutex<HashSet<Tool>>,
    probe_stdout: Mutex<String>,
    calls: Mutex<Vec<(Step, Invocation)>>,
}

impl ScriptedInvoker {
    pub(crate) fn new() -> Self {
        Self {
            failures: Mutex::new(HashMap::new()),
            silent: Mutex::new(HashSet::new()),
            hanging: Mutex::new(HashSet::new()),
            missing: Mutex::new(HashSet::new()),
            probe_stdout: Mutex::new("125.84\n".to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fail the next `times` invocations of `step`
    pub(crate) fn fail(self, step: Step, times: u32) -> Self {
        self.failures.lock().unwrap().insert(step, times);
        self
    }

    pub(crate) fn fail_always(self, step: Step) -> Self {
        self.fail(step, u32::MAX)
    }

    /// Succeed without writing the output file
    pub(crate) fn silent(self, step: Step) -> Self {
        self.silent.lock().unwrap().insert(step);
        self
    }

    /// Block until cancelled
    pub(crate) fn hang(self, step: Step) -> Self {
        self.hanging.lock().unwrap().insert(step);
        self
    }

    pub(crate) fn missing(self, tool: Tool) -> Self {
        self.missing.lock().unwrap().insert(tool);
        self
    }

    pub(crate) fn probe_output(self, stdout: &str) -> Self {
        *self.probe_stdout.lock().unwrap() = stdout.to_string();
        self
    }

    pub(crate) fn calls(&self) -> Vec<(Step, Invocation)> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, step: Step) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == step)
            .count()
    }

    fn output_path(step: Step, inv: &Invocation) -> Option<PathBuf> {
        match step {
            Step::ThumbnailFetch | Step::VideoAccelerated | Step::VideoDirect | Step::SubtitleFetch => {
                let template = inv.value_of("-o")?.to_string_lossy().into_owned();
                let ext = match step {
                    Step::ThumbnailFetch => "jpg".to_string(),
                    Step::SubtitleFetch => {
                        let lang = inv.value_of("--sub-langs")?.to_string_lossy().into_owned();
                        format!("{lang}.srt")
                    }
                    _ => "mp4".to_string(),
                };
                Some(PathBuf::from(template.replace("%(ext)s", &ext)))
            }
            Step::Embed | Step::Audio | Step::FrameGrab => inv.args.last().map(PathBuf::from),
            Step::Probe => None,
        }
    }
}

#[async_trait]
impl ToolInvoker for ScriptedInvoker {
    async fn invoke(&self, inv: &Invocation, cancel: &CancellationToken) -> Result<ToolOutput> {
        let step = Step::of(inv);
        self.calls.lock().unwrap().push((step, inv.clone()));

        if self.missing.lock().unwrap().contains(&inv.tool) {
            return Err(Error::ToolNotFound { tool: inv.tool });
        }

        if self.hanging.lock().unwrap().contains(&step) {
            cancel.cancelled().await;
            return Err(Error::Cancelled);
        }

        let should_fail = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(&step) {
                Some(remaining) if *remaining > 0 => {
                    if *remaining != u32::MAX {
                        *remaining -= 1;
                    }
                    true
                }
                _ => false,
            }
        };
        if should_fail {
            return Err(Error::ToolExecutionFailed {
                tool: inv.tool,
                reason: "exit status 1".to_string(),
                output: format!("scripted failure for {step:?}"),
            });
        }

        if step == Step::Probe {
            let stdout = self.probe_stdout.lock().unwrap().clone();
            return Ok(ToolOutput {
                combined: stdout.clone(),
                stdout,
            });
        }

        if !self.silent.lock().unwrap().contains(&step)
            && let Some(path) = Self::output_path(step, inv)
        {
            std::fs::write(&path, format!("{step:?}")).unwrap();
        }

        Ok(ToolOutput::default())
    }
}
