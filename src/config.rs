//! Configuration types for clipfetch

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::PathBuf, time::Duration};

/// Run directories, concurrency and per-stage deadlines
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Artifact root; each run gets its own subdirectory (default: "./downloads")
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Maximum number of runs executing at once (default: 3)
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,

    /// Deadline for one video-fetcher invocation (default: 30 minutes)
    #[serde(default = "default_long_timeout", with = "duration_serde")]
    pub fetch_timeout: Duration,

    /// Deadline for one transcoder invocation (default: 30 minutes)
    #[serde(default = "default_long_timeout", with = "duration_serde")]
    pub transcode_timeout: Duration,

    /// Deadline for one prober invocation (default: 60 seconds)
    #[serde(default = "default_probe_timeout", with = "duration_serde")]
    pub probe_timeout: Duration,

    /// Caption language used when the caller does not pick one (default: "en")
    #[serde(default = "default_caption_language")]
    pub default_caption_language: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            max_concurrent_runs: default_max_concurrent_runs(),
            fetch_timeout: default_long_timeout(),
            transcode_timeout: default_long_timeout(),
            probe_timeout: default_probe_timeout(),
            default_caption_language: default_caption_language(),
        }
    }
}

/// External tool paths (yt-dlp, aria2c, ffmpeg, ffprobe)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to the yt-dlp executable (auto-detected if None)
    #[serde(default)]
    pub yt_dlp_path: Option<PathBuf>,

    /// Path to the aria2c executable (auto-detected if None)
    #[serde(default)]
    pub aria2c_path: Option<PathBuf>,

    /// Path to the ffmpeg executable (auto-detected if None)
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Path to the ffprobe executable (auto-detected if None)
    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,

    /// Whether to search PATH for binaries whose path is not set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            yt_dlp_path: None,
            aria2c_path: None,
            ffmpeg_path: None,
            ffprobe_path: None,
            search_path: true,
        }
    }
}

/// Retry policy applied to every pipeline stage
///
/// Backoff is deterministic: the wait before retry `k` is
/// `min(initial_delay * backoff_multiplier^(k-1), max_delay)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Number of retries after the initial attempt (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Cap on the delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Growth factor applied to the delay after each failed attempt (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

/// Admission (rate limiting) configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Enable admission control (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum runs admitted per identifier within one window (default: 5)
    #[serde(default = "default_requests_max")]
    pub requests_max: u32,

    /// Window length (default: 60 seconds)
    #[serde(default = "default_window", with = "duration_serde")]
    pub window: Duration,

    /// Limit each identifier separately; when false all callers share one
    /// global window (default: true)
    #[serde(default = "default_true")]
    pub per_user: bool,

    /// SQLite file shared by every process that should see the same counters.
    /// None selects the in-process backend.
    #[serde(default)]
    pub store_path: Option<PathBuf>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_max: default_requests_max(),
            window: default_window(),
            per_user: true,
            store_path: None,
        }
    }
}

/// Run-directory retention
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Enable the periodic sweep (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directories older than this are removed (default: 24 hours)
    #[serde(default = "default_max_age", with = "duration_serde")]
    pub max_age: Duration,

    /// Time between sweeps (default: 1 hour)
    #[serde(default = "default_sweep_interval", with = "duration_serde")]
    pub sweep_interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_age: default_max_age(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

/// Per-platform cookie files passed to the video fetcher
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CookieConfig {
    /// Directory holding `<platform>.txt` cookie files (None disables cookies)
    #[serde(default)]
    pub cookies_dir: Option<PathBuf>,

    /// Platform name to the domain substrings that identify it
    #[serde(default = "default_cookie_platforms")]
    pub platforms: BTreeMap<String, Vec<String>>,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            cookies_dir: None,
            platforms: default_cookie_platforms(),
        }
    }
}

/// Main configuration for the downloader
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Run directories, concurrency and deadlines
    #[serde(default)]
    pub download: DownloadConfig,

    /// External tool paths
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Per-stage retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Admission control
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Run-directory retention
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Cookie files
    #[serde(default)]
    pub cookies: CookieConfig,
}

impl Config {
    /// Parse a JSON document and validate the result
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the pipeline or admission misbehave
    pub fn validate(&self) -> Result<()> {
        if self.download.max_concurrent_runs == 0 {
            return Err(Error::config(
                "download.max_concurrent_runs",
                "at least one concurrent run is required",
            ));
        }
        if self.retry.backoff_multiplier < 1.0 || !self.retry.backoff_multiplier.is_finite() {
            return Err(Error::config(
                "retry.backoff_multiplier",
                "backoff multiplier must be a finite value >= 1.0",
            ));
        }
        if self.retry.max_delay < self.retry.initial_delay {
            return Err(Error::config(
                "retry.max_delay",
                "max_delay must not be smaller than initial_delay",
            ));
        }
        if self.rate_limit.enabled {
            if self.rate_limit.requests_max == 0 {
                return Err(Error::config(
                    "rate_limit.requests_max",
                    "requests_max must be non-zero when rate limiting is enabled",
                ));
            }
            if self.rate_limit.window.is_zero() {
                return Err(Error::config(
                    "rate_limit.window",
                    "window must be non-zero when rate limiting is enabled",
                ));
            }
        }
        if self.retention.enabled && self.retention.sweep_interval.is_zero() {
            return Err(Error::config(
                "retention.sweep_interval",
                "sweep interval must be non-zero",
            ));
        }
        Ok(())
    }
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_max_concurrent_runs() -> usize {
    3
}

fn default_long_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_caption_language() -> String {
    "en".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_requests_max() -> u32 {
    5
}

fn default_window() -> Duration {
    Duration::from_secs(60)
}

fn default_max_age() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_cookie_platforms() -> BTreeMap<String, Vec<String>> {
    [
        ("youtube", &["youtube.com", "youtu.be"][..]),
        ("instagram", &["instagram.com"][..]),
        ("tiktok", &["tiktok.com"][..]),
        ("facebook", &["facebook.com", "fb.watch"][..]),
        ("twitter", &["twitter.com", "x.com"][..]),
    ]
    .into_iter()
    .map(|(platform, domains)| {
        (
            platform.to_string(),
            domains.iter().map(|d| d.to_string()).collect(),
        )
    })
    .collect()
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
