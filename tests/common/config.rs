//! Test configuration helpers for building downloaders over a temp directory

use clipfetch::{Config, Downloader, RateAdmission, ToolPaths};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use super::fixtures::FileWritingInvoker;

/// Default configuration rooted in `temp`, with near-instant retries
pub fn test_config(temp: &TempDir) -> Config {
    let mut config = Config::default();
    config.download.root_dir = temp.path().join("runs");
    config.retry.max_attempts = 1;
    config.retry.initial_delay = Duration::from_millis(1);
    config.retry.max_delay = Duration::from_millis(5);
    config
}

/// Downloader over `invoker`, with admission built from the config
pub async fn create_downloader(config: Config, invoker: Arc<FileWritingInvoker>) -> Downloader {
    let admission = RateAdmission::from_config(&config.rate_limit)
        .await
        .expect("admission backend should open");

    Downloader::from_parts(config, invoker, &ToolPaths::new(), admission)
        .await
        .expect("downloader should build")
}

/// Downloader that resolves the real tools from PATH
pub async fn create_live_downloader(temp: &TempDir) -> Downloader {
    let mut config = test_config(temp);
    config.retry.max_attempts = 2;
    config.retry.initial_delay = Duration::from_secs(1);
    config.retry.max_delay = Duration::from_secs(5);

    Downloader::new(config)
        .await
        .expect("downloader should build")
}

/// True when every external tool the pipeline needs is on PATH
pub fn has_live_tools() -> bool {
    ["yt-dlp", "ffmpeg", "ffprobe"]
        .iter()
        .all(|tool| which::which(tool).is_ok())
}
