//! Run directory layout and the bundle a run hands back

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Best-quality video with audio
pub const VIDEO_FILE: &str = "video.mp4";
/// Video with subtitles burned in
pub const SUBTITLED_VIDEO_FILE: &str = "video_subtitled.mp4";
/// Extracted audio track
pub const AUDIO_FILE: &str = "audio.mp3";
/// Subtitle track, normalized name
pub const SUBTITLE_FILE: &str = "subtitle.srt";
/// Thumbnail image
pub const THUMBNAIL_FILE: &str = "thumbnail.jpg";

/// Paths inside one run directory
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunDir {
    path: PathBuf,
}

impl RunDir {
    /// Layout rooted at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The directory itself
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `video.mp4`
    pub fn video(&self) -> PathBuf {
        self.path.join(VIDEO_FILE)
    }

    /// `video_subtitled.mp4`
    pub fn subtitled_video(&self) -> PathBuf {
        self.path.join(SUBTITLED_VIDEO_FILE)
    }

    /// `audio.mp3`
    pub fn audio(&self) -> PathBuf {
        self.path.join(AUDIO_FILE)
    }

    /// `subtitle.srt`
    pub fn subtitle(&self) -> PathBuf {
        self.path.join(SUBTITLE_FILE)
    }

    /// `thumbnail.jpg`
    pub fn thumbnail(&self) -> PathBuf {
        self.path.join(THUMBNAIL_FILE)
    }

    /// Output template handed to the video fetcher for a file stem
    pub(crate) fn template(&self, stem: &str) -> PathBuf {
        self.path.join(format!("{stem}.%(ext)s"))
    }

    /// File the video fetcher writes for a subtitle language
    pub(crate) fn fetched_subtitle(&self, language: &str) -> PathBuf {
        self.path.join(format!("subtitle.{language}.srt"))
    }
}

/// Everything one successful run produced
///
/// Optional paths are `None` when their best-effort stage failed. The
/// primary video is always present on a bundle returned by the pipeline.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactBundle {
    /// URL the run was started for
    pub source_url: String,
    /// Directory holding every artifact of the run
    pub run_dir: PathBuf,
    /// Primary video
    pub video: Option<PathBuf>,
    /// Video with subtitles burned in
    pub subtitled_video: Option<PathBuf>,
    /// Audio track
    pub audio: Option<PathBuf>,
    /// Subtitle file
    pub subtitle: Option<PathBuf>,
    /// Thumbnail image
    pub thumbnail: Option<PathBuf>,
    /// True when a subtitle file was produced
    pub has_subtitle: bool,
    /// Size of the primary video in bytes
    pub video_size: u64,
    /// Duration of the primary video in whole seconds (0 if unknown)
    pub duration_secs: u64,
}

impl ArtifactBundle {
    /// Empty bundle for a run
    pub fn new(source_url: impl Into<String>, run_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_url: source_url.into(),
            run_dir: run_dir.into(),
            ..Default::default()
        }
    }

    /// Paths of every artifact that exists, video first
    pub fn files(&self) -> impl Iterator<Item = &Path> {
        [
            &self.video,
            &self.subtitled_video,
            &self.audio,
            &self.subtitle,
            &self.thumbnail,
        ]
        .into_iter()
        .filter_map(|p| p.as_deref())
    }
}
