//! External tool invocation
//!
//! Every pipeline stage ends up running one of four executables. This module
//! names them ([`Tool`]), records where they live ([`ToolPaths`]) and defines
//! the [`ToolInvoker`] seam the pipeline drives.
//!
//! ## Architecture
//!
//! - [`ProcessInvoker`]: spawns the real binary with a deadline and the
//!   caller's cancellation token
//! - Test code substitutes scripted invokers that create the expected files
//!
//! The invoker never retries and never inspects output files; retry policy
//! lives in [`crate::retry`] and file checks live in the pipeline.

use crate::config::ToolsConfig;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[cfg(test)]
pub(crate) mod fake;
mod process;

pub use process::ProcessInvoker;

/// Logical name of an external executable
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tool {
    /// Video fetcher (yt-dlp)
    VideoFetcher,
    /// Download accelerator used by the fetcher (aria2c)
    Accelerator,
    /// Media toolkit transcoder (ffmpeg)
    Transcoder,
    /// Media toolkit prober (ffprobe)
    Prober,
}

impl Tool {
    /// All tools, in discovery order
    pub const ALL: [Tool; 4] = [
        Tool::VideoFetcher,
        Tool::Accelerator,
        Tool::Transcoder,
        Tool::Prober,
    ];

    /// Executable name searched for in PATH
    pub fn binary_name(&self) -> &'static str {
        match self {
            Tool::VideoFetcher => "yt-dlp",
            Tool::Accelerator => "aria2c",
            Tool::Transcoder => "ffmpeg",
            Tool::Prober => "ffprobe",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary_name())
    }
}

/// Resolved absolute paths, keyed by logical tool
#[derive(Clone, Debug, Default)]
pub struct ToolPaths {
    paths: HashMap<Tool, PathBuf>,
}

impl ToolPaths {
    /// Empty mapping; every invocation fails with `ToolNotFound`
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the path for a tool
    pub fn with(mut self, tool: Tool, path: impl Into<PathBuf>) -> Self {
        self.paths.insert(tool, path.into());
        self
    }

    /// Path for a tool, if resolved
    pub fn get(&self, tool: Tool) -> Option<&Path> {
        self.paths.get(&tool).map(PathBuf::as_path)
    }

    /// Tools that have no resolved path
    pub fn missing(&self) -> Vec<Tool> {
        Tool::ALL
            .into_iter()
            .filter(|tool| !self.paths.contains_key(tool))
            .collect()
    }

    /// Resolve tool paths from configuration, falling back to a PATH search
    ///
    /// Explicit paths always win. With `search_path` enabled, unset tools are
    /// looked up with the `which` crate. Tools that cannot be found are left
    /// unresolved and logged; stages that need them fail fast later.
    pub fn discover(config: &ToolsConfig) -> Self {
        let explicit = [
            (Tool::VideoFetcher, &config.yt_dlp_path),
            (Tool::Accelerator, &config.aria2c_path),
            (Tool::Transcoder, &config.ffmpeg_path),
            (Tool::Prober, &config.ffprobe_path),
        ];

        let mut paths = HashMap::new();
        for (tool, configured) in explicit {
            let resolved = match configured {
                Some(path) => Some(path.clone()),
                None if config.search_path => which::which(tool.binary_name()).ok(),
                None => None,
            };

            match resolved {
                Some(path) => {
                    tracing::debug!(%tool, path = %path.display(), "resolved external tool");
                    paths.insert(tool, path);
                }
                None => {
                    tracing::warn!(%tool, "external tool not found; stages using it will be skipped or fail");
                }
            }
        }

        Self { paths }
    }
}

/// One external-tool call: which tool, its arguments and its deadline
#[derive(Clone, Debug)]
pub struct Invocation {
    /// Tool to run
    pub tool: Tool,
    /// Arguments, in order
    pub args: Vec<OsString>,
    /// Time allowed before the process is killed
    pub timeout: Duration,
}

impl Invocation {
    /// Start an invocation with no arguments
    pub fn new(tool: Tool, timeout: Duration) -> Self {
        Self {
            tool,
            args: Vec::new(),
            timeout,
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// True if any argument equals `needle`
    pub fn has_arg(&self, needle: &str) -> bool {
        self.args.iter().any(|a| a == needle)
    }

    /// Value following the flag `flag`, if present
    pub fn value_of(&self, flag: &str) -> Option<&OsStr> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(OsString::as_os_str)
    }

    /// Arguments joined for logging
    pub fn display_args(&self) -> String {
        self.args
            .iter()
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a successful invocation
#[derive(Clone, Debug, Default)]
pub struct ToolOutput {
    /// Standard output followed by standard error, lossily decoded
    pub combined: String,
    /// Standard output alone, for tools whose answer is printed there
    pub stdout: String,
}

/// Runs external tools on behalf of the pipeline
///
/// Failure modes are reported as distinct error kinds so the retry layer can
/// tell them apart:
/// - [`Error::ToolNotFound`](crate::Error::ToolNotFound): never retried
/// - [`Error::ToolExecutionFailed`](crate::Error::ToolExecutionFailed): retried
/// - [`Error::DeadlineExceeded`](crate::Error::DeadlineExceeded): retried
/// - [`Error::Cancelled`](crate::Error::Cancelled): propagates immediately
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Run the invocation to completion, its deadline, or cancellation
    async fn invoke(
        &self,
        invocation: &Invocation,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput>;
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_paths_win_over_search() {
        let config = ToolsConfig {
            yt_dlp_path: Some(PathBuf::from("/opt/bin/yt-dlp")),
            aria2c_path: None,
            ffmpeg_path: Some(PathBuf::from("/opt/bin/ffmpeg")),
            ffprobe_path: None,
            search_path: false,
        };

        let paths = ToolPaths::discover(&config);

        assert_eq!(
            paths.get(Tool::VideoFetcher),
            Some(Path::new("/opt/bin/yt-dlp"))
        );
        assert_eq!(paths.get(Tool::Transcoder), Some(Path::new("/opt/bin/ffmpeg")));
        assert_eq!(paths.missing(), vec![Tool::Accelerator, Tool::Prober]);
    }

    #[test]
    fn discovery_agrees_with_which() {
        let config = ToolsConfig::default();
        let paths = ToolPaths::discover(&config);

        for tool in Tool::ALL {
            assert_eq!(
                paths.get(tool).is_some(),
                which::which(tool.binary_name()).is_ok(),
                "{tool} resolution should match which::which"
            );
        }
    }

    #[test]
    fn invocation_builder_keeps_argument_order() {
        let inv = Invocation::new(Tool::Transcoder, Duration::from_secs(5))
            .arg("-y")
            .args(["-i", "video.mp4"])
            .arg("out.mp3");

        assert_eq!(inv.display_args(), "-y -i video.mp4 out.mp3");
        assert!(inv.has_arg("-y"));
        assert_eq!(inv.value_of("-i"), Some(OsStr::new("video.mp4")));
        assert_eq!(inv.value_of("out.mp3"), None);
    }

    #[test]
    fn tool_display_is_binary_name() {
        assert_eq!(Tool::VideoFetcher.to_string(), "yt-dlp");
        assert_eq!(Tool::Accelerator.to_string(), "aria2c");
        assert_eq!(Tool::Transcoder.to_string(), "ffmpeg");
        assert_eq!(Tool::Prober.to_string(), "ffprobe");
    }
}
