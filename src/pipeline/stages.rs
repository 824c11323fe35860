//! Stage names and the tool invocations each stage issues

use super::artifacts::RunDir;
use crate::error::{Error, Result};
use crate::tools::{Invocation, Tool};
use std::ffi::OsString;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Pipeline stages, in execution order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Thumbnail from the source site
    Thumbnail,
    /// Primary video (the only critical stage)
    Video,
    /// Subtitle track in the caption language
    Subtitle,
    /// Subtitles burned into a copy of the video
    Embed,
    /// Audio track extracted from the video
    Audio,
    /// Duration read from the video
    Duration,
    /// Still frame grabbed when no thumbnail was fetched
    ThumbnailFallback,
}

impl Stage {
    /// Stable name used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Thumbnail => "thumbnail",
            Stage::Video => "video",
            Stage::Subtitle => "subtitle",
            Stage::Embed => "embed",
            Stage::Audio => "audio",
            Stage::Duration => "duration",
            Stage::ThumbnailFallback => "thumbnail_fallback",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Video-fetcher call with the shared flags, `flags`, then the URL
fn fetcher(url: &str, cookies: Option<&Path>, timeout: Duration, flags: &[OsString]) -> Invocation {
    let mut inv =
        Invocation::new(Tool::VideoFetcher, timeout).args(["--no-playlist", "--no-progress"]);
    if let Some(cookies) = cookies {
        inv = inv.arg("--cookies").arg(cookies);
    }
    inv.args(flags).arg("--").arg(url)
}

fn os(args: &[&str]) -> Vec<OsString> {
    args.iter().map(|a| OsString::from(*a)).collect()
}

/// Thumbnail from the source site, converted to JPEG
pub(crate) fn thumbnail_fetch(
    url: &str,
    dir: &RunDir,
    cookies: Option<&Path>,
    timeout: Duration,
) -> Invocation {
    let mut flags = os(&[
        "--skip-download",
        "--write-thumbnail",
        "--convert-thumbnails",
        "jpg",
        "-o",
    ]);
    flags.push(dir.template("thumbnail").into_os_string());
    fetcher(url, cookies, timeout, &flags)
}

/// Best video plus best audio merged into MP4
///
/// With `accelerator` set the transfer is handed to that download
/// accelerator with parallel connections.
pub(crate) fn video_fetch(
    url: &str,
    dir: &RunDir,
    cookies: Option<&Path>,
    accelerator: Option<&Path>,
    timeout: Duration,
) -> Invocation {
    // a single pre-merged stream skips the merge, so remux it as well
    let mut flags = os(&[
        "-f",
        "bv*+ba/b",
        "--merge-output-format",
        "mp4",
        "--remux-video",
        "mp4",
    ]);
    if let Some(accelerator) = accelerator {
        flags.push("--downloader".into());
        flags.push(accelerator.as_os_str().to_os_string());
        flags.extend(os(&["--downloader-args", "aria2c:-x 16 -s 16 -k 1M"]));
    }
    flags.push("-o".into());
    flags.push(dir.template("video").into_os_string());
    fetcher(url, cookies, timeout, &flags)
}

/// Manual or automatic subtitles in `language`, converted to SRT
pub(crate) fn subtitle_fetch(
    url: &str,
    dir: &RunDir,
    language: &str,
    cookies: Option<&Path>,
    timeout: Duration,
) -> Invocation {
    let mut flags = os(&[
        "--skip-download",
        "--write-subs",
        "--write-auto-subs",
        "--sub-langs",
        language,
        "--convert-subs",
        "srt",
        "-o",
    ]);
    flags.push(dir.template("subtitle").into_os_string());
    fetcher(url, cookies, timeout, &flags)
}

/// Escape a path for use inside a quoted `subtitles=` filter argument
pub(crate) fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "\\\\")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

/// Burn `subtitle` into a re-encoded copy of `video`
pub(crate) fn embed_subtitles(
    video: &Path,
    subtitle: &Path,
    output: &Path,
    timeout: Duration,
) -> Invocation {
    Invocation::new(Tool::Transcoder, timeout)
        .args(["-hide_banner", "-y", "-i"])
        .arg(video)
        .arg("-vf")
        .arg(format!("subtitles='{}'", escape_filter_path(subtitle)))
        .args(["-c:v", "libx264", "-c:a", "copy", "-preset", "fast"])
        .arg(output)
}

/// Audio track of `video` as MP3
pub(crate) fn extract_audio(video: &Path, output: &Path, timeout: Duration) -> Invocation {
    Invocation::new(Tool::Transcoder, timeout)
        .args(["-hide_banner", "-y", "-i"])
        .arg(video)
        .args(["-vn", "-acodec", "libmp3lame", "-q:a", "2"])
        .arg(output)
}

/// Container duration printed as bare seconds
pub(crate) fn probe_duration(video: &Path, timeout: Duration) -> Invocation {
    Invocation::new(Tool::Prober, timeout)
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(video)
}

/// One frame of `video` at `at_secs` as JPEG
pub(crate) fn grab_frame(video: &Path, output: &Path, at_secs: u64, timeout: Duration) -> Invocation {
    Invocation::new(Tool::Transcoder, timeout)
        .args(["-hide_banner", "-y", "-ss"])
        .arg(at_secs.to_string())
        .arg("-i")
        .arg(video)
        .args(["-vframes", "1", "-q:v", "2"])
        .arg(output)
}

/// Where to grab the fallback frame: one second in, or the start of short clips
pub(crate) fn frame_offset(duration_secs: u64) -> u64 {
    if duration_secs >= 2 { 1 } else { 0 }
}

/// Parse prober output as floating seconds, floored
pub(crate) fn parse_duration(output: &str) -> Result<u64> {
    let text = output.trim();
    match text.parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs >= 0.0 => Ok(secs.floor() as u64),
        _ => Err(Error::ToolExecutionFailed {
            tool: Tool::Prober,
            reason: format!("unparsable duration {text:?}"),
            output: output.to_string(),
        }),
    }
}
