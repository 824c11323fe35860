//! Download orchestration pipeline
//!
//! [`DownloadPipeline::run`] takes one URL through a fixed sequence of
//! stages, each wrapped independently by [`execute_with_retry`]:
//!
//! 1. thumbnail fetch (best-effort)
//! 2. primary video fetch, accelerated then direct (critical)
//! 3. subtitle fetch in the caption language (best-effort)
//! 4. subtitle embedding (best-effort, needs 3)
//! 5. audio extraction (best-effort)
//! 6. duration probe (0 when it fails)
//! 7. still-frame thumbnail when 1 produced nothing
//!
//! Only the primary video failing, or caller cancellation, turns a run into
//! an error. Every other stage failure is logged and leaves its artifact out
//! of the [`ArtifactBundle`].

use crate::config::{Config, DownloadConfig, RetryConfig};
use crate::cookies::CookieJar;
use crate::error::{Error, Result};
use crate::retry::execute_with_retry;
use crate::tools::{Tool, ToolInvoker, ToolPaths};
use crate::types::RunId;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

mod artifacts;
mod stages;

pub use artifacts::{
    AUDIO_FILE, ArtifactBundle, RunDir, SUBTITLE_FILE, SUBTITLED_VIDEO_FILE, THUMBNAIL_FILE,
    VIDEO_FILE,
};
pub use stages::Stage;

/// Runs the staged external-tool sequence for one URL
pub struct DownloadPipeline {
    invoker: Arc<dyn ToolInvoker>,
    accelerator: Option<PathBuf>,
    cookies: CookieJar,
    retry: RetryConfig,
    settings: DownloadConfig,
}

impl std::fmt::Debug for DownloadPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadPipeline")
            .field("accelerator", &self.accelerator)
            .field("root_dir", &self.settings.root_dir)
            .finish_non_exhaustive()
    }
}

impl DownloadPipeline {
    /// Build a pipeline from configuration
    ///
    /// `tools` is consulted only for the download accelerator, whose path is
    /// passed to the video fetcher; every invocation goes through `invoker`.
    pub fn new(config: &Config, invoker: Arc<dyn ToolInvoker>, tools: &ToolPaths) -> Self {
        Self {
            invoker,
            accelerator: tools.get(Tool::Accelerator).map(Path::to_path_buf),
            cookies: CookieJar::new(&config.cookies),
            retry: config.retry.clone(),
            settings: config.download.clone(),
        }
    }

    /// Artifact root holding one directory per run
    pub fn root_dir(&self) -> &Path {
        &self.settings.root_dir
    }

    /// Layout of the directory a run writes into
    pub fn run_dir(&self, id: RunId) -> RunDir {
        RunDir::new(self.settings.root_dir.join(id.to_string()))
    }

    /// Run every stage for `url` in a fresh run directory
    ///
    /// An empty `caption_language` selects the configured default.
    pub async fn run(
        &self,
        url: &str,
        caption_language: &str,
        cancel: &CancellationToken,
    ) -> Result<ArtifactBundle> {
        self.run_with_id(RunId::next(), url, caption_language, cancel)
            .await
    }

    /// Like [`run`](Self::run), writing into the directory of `id`
    pub async fn run_with_id(
        &self,
        id: RunId,
        url: &str,
        caption_language: &str,
        cancel: &CancellationToken,
    ) -> Result<ArtifactBundle> {
        let span = tracing::info_span!("pipeline", run_id = %id);
        self.execute(id, url, caption_language, cancel)
            .instrument(span)
            .await
    }

    async fn execute(
        &self,
        id: RunId,
        url: &str,
        caption_language: &str,
        cancel: &CancellationToken,
    ) -> Result<ArtifactBundle> {
        let language = match caption_language.trim() {
            "" => self.settings.default_caption_language.as_str(),
            lang => lang,
        };
        let dir = self.run_dir(id);
        tokio::fs::create_dir_all(dir.path()).await?;

        let cookie_file = self.cookies.for_url(url);
        let cookies = cookie_file.as_deref();
        let mut bundle = ArtifactBundle::new(url, dir.path());

        tracing::info!(url, language, dir = %dir.path().display(), "pipeline run started");

        bundle.thumbnail = best_effort(
            Stage::Thumbnail,
            self.fetch_thumbnail(url, &dir, cookies, cancel).await,
        )?;

        bundle.video_size = self.fetch_video(url, &dir, cookies, cancel).await?;
        let video = dir.video();
        bundle.video = Some(video.clone());

        bundle.subtitle = best_effort(
            Stage::Subtitle,
            self.fetch_subtitle(url, &dir, language, cookies, cancel)
                .await,
        )?;
        bundle.has_subtitle = bundle.subtitle.is_some();

        if let Some(subtitle) = bundle.subtitle.clone() {
            bundle.subtitled_video = best_effort(
                Stage::Embed,
                self.embed_subtitles(&video, &subtitle, &dir, cancel).await,
            )?;
        }

        bundle.audio = best_effort(
            Stage::Audio,
            self.extract_audio(&video, &dir, cancel).await,
        )?;

        bundle.duration_secs = best_effort(
            Stage::Duration,
            self.probe_duration(&video, cancel).await.map(Some),
        )?
        .unwrap_or(0);

        if bundle.thumbnail.is_none() {
            bundle.thumbnail = best_effort(
                Stage::ThumbnailFallback,
                self.grab_thumbnail(&video, &dir, bundle.duration_secs, cancel)
                    .await,
            )?;
        }

        tracing::info!(
            video_size = bundle.video_size,
            duration_secs = bundle.duration_secs,
            has_subtitle = bundle.has_subtitle,
            has_audio = bundle.audio.is_some(),
            has_thumbnail = bundle.thumbnail.is_some(),
            "pipeline run complete"
        );

        Ok(bundle)
    }

    async fn retrying<T, F, Fut>(
        &self,
        stage: Stage,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        tracing::debug!(%stage, "stage started");
        execute_with_retry(&self.retry, cancel, operation).await
    }

    async fn fetch_thumbnail(
        &self,
        url: &str,
        dir: &RunDir,
        cookies: Option<&Path>,
        cancel: &CancellationToken,
    ) -> Result<Option<PathBuf>> {
        let invocation =
            stages::thumbnail_fetch(url, dir, cookies, self.settings.fetch_timeout);
        let target = dir.thumbnail();
        let (invoker, inv, target) = (self.invoker.as_ref(), &invocation, target.as_path());

        self.retrying(Stage::Thumbnail, cancel, move || async move {
            invoker.invoke(inv, cancel).await?;
            Ok(existing_file(target).await)
        })
        .await
    }

    /// Returns the size of `video.mp4`
    async fn fetch_video(
        &self,
        url: &str,
        dir: &RunDir,
        cookies: Option<&Path>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        match self.accelerator.as_deref() {
            Some(accelerator) => {
                match self
                    .fetch_video_via(url, dir, cookies, Some(accelerator), cancel)
                    .await
                {
                    Ok(size) => return Ok(size),
                    Err(e) if e.is_cancelled() => return Err(Error::Cancelled),
                    Err(e) => {
                        tracing::warn!(
                            stage = %Stage::Video,
                            error = %e,
                            "accelerated transfer failed, falling back to direct transfer"
                        );
                    }
                }
            }
            None => {
                tracing::info!(
                    stage = %Stage::Video,
                    "download accelerator unavailable, using direct transfer"
                );
            }
        }

        self.fetch_video_via(url, dir, cookies, None, cancel)
            .await
            .inspect_err(|e| {
                if !e.is_cancelled() {
                    tracing::error!(stage = %Stage::Video, error = %e, "primary video fetch failed");
                }
            })
    }

    async fn fetch_video_via(
        &self,
        url: &str,
        dir: &RunDir,
        cookies: Option<&Path>,
        accelerator: Option<&Path>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let invocation =
            stages::video_fetch(url, dir, cookies, accelerator, self.settings.fetch_timeout);
        let target = dir.video();
        let (invoker, inv, target) = (self.invoker.as_ref(), &invocation, target.as_path());

        self.retrying(Stage::Video, cancel, move || async move {
            invoker.invoke(inv, cancel).await?;
            match tokio::fs::metadata(target).await {
                Ok(meta) if meta.is_file() => Ok(meta.len()),
                _ => Err(not_produced(Tool::VideoFetcher, target)),
            }
        })
        .await
    }

    async fn fetch_subtitle(
        &self,
        url: &str,
        dir: &RunDir,
        language: &str,
        cookies: Option<&Path>,
        cancel: &CancellationToken,
    ) -> Result<Option<PathBuf>> {
        let invocation =
            stages::subtitle_fetch(url, dir, language, cookies, self.settings.fetch_timeout);
        let (invoker, inv) = (self.invoker.as_ref(), &invocation);

        let subtitle = self
            .retrying(Stage::Subtitle, cancel, move || async move {
                invoker.invoke(inv, cancel).await?;
                normalize_subtitle(dir, language).await
            })
            .await?;

        if subtitle.is_none() {
            tracing::info!(stage = %Stage::Subtitle, language, "no subtitles available");
        }
        Ok(subtitle)
    }

    async fn embed_subtitles(
        &self,
        video: &Path,
        subtitle: &Path,
        dir: &RunDir,
        cancel: &CancellationToken,
    ) -> Result<Option<PathBuf>> {
        let output = dir.subtitled_video();
        let invocation =
            stages::embed_subtitles(video, subtitle, &output, self.settings.transcode_timeout);

        self.produce(Stage::Embed, &invocation, &output, cancel).await
    }

    async fn extract_audio(
        &self,
        video: &Path,
        dir: &RunDir,
        cancel: &CancellationToken,
    ) -> Result<Option<PathBuf>> {
        let output = dir.audio();
        let invocation = stages::extract_audio(video, &output, self.settings.transcode_timeout);

        self.produce(Stage::Audio, &invocation, &output, cancel).await
    }

    async fn probe_duration(&self, video: &Path, cancel: &CancellationToken) -> Result<u64> {
        let invocation = stages::probe_duration(video, self.settings.probe_timeout);
        let (invoker, inv) = (self.invoker.as_ref(), &invocation);

        self.retrying(Stage::Duration, cancel, move || async move {
            let output = invoker.invoke(inv, cancel).await?;
            stages::parse_duration(&output.stdout)
        })
        .await
    }

    async fn grab_thumbnail(
        &self,
        video: &Path,
        dir: &RunDir,
        duration_secs: u64,
        cancel: &CancellationToken,
    ) -> Result<Option<PathBuf>> {
        let output = dir.thumbnail();
        let invocation = stages::grab_frame(
            video,
            &output,
            stages::frame_offset(duration_secs),
            self.settings.transcode_timeout,
        );

        self.produce(Stage::ThumbnailFallback, &invocation, &output, cancel)
            .await
    }

    /// Run a transcoder step that must leave `output` behind
    ///
    /// A partial output is removed when the step finally fails.
    async fn produce(
        &self,
        stage: Stage,
        invocation: &crate::tools::Invocation,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<Option<PathBuf>> {
        let invoker = self.invoker.as_ref();
        let tool = invocation.tool;

        let result = self
            .retrying(stage, cancel, move || async move {
                invoker.invoke(invocation, cancel).await?;
                existing_file(output)
                    .await
                    .ok_or_else(|| not_produced(tool, output))
                    .map(Some)
            })
            .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(output).await;
        }
        result
    }
}

/// Keep a best-effort stage's failure out of the run, except cancellation
fn best_effort<T>(stage: Stage, result: Result<Option<T>>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(value),
        Err(e) if e.is_cancelled() => Err(Error::Cancelled),
        Err(e) => {
            tracing::warn!(%stage, error = %e, "best-effort stage failed, continuing without it");
            Ok(None)
        }
    }
}

async fn existing_file(path: &Path) -> Option<PathBuf> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Some(path.to_path_buf()),
        _ => None,
    }
}

fn not_produced(tool: Tool, path: &Path) -> Error {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Error::ToolExecutionFailed {
        tool,
        reason: format!("exited successfully but {name} was not produced"),
        output: String::new(),
    }
}

/// Rename the fetched `subtitle.<lang>.srt` to `subtitle.srt`
///
/// The fetcher may tag the file with a variant of the requested language
/// (`en-orig`, `en-US`), so any `subtitle.*.srt` is accepted when the exact
/// name is missing. `None` means the source has no subtitles.
async fn normalize_subtitle(dir: &RunDir, language: &str) -> Result<Option<PathBuf>> {
    let target = dir.subtitle();
    let exact = dir.fetched_subtitle(language);

    let found = if existing_file(&exact).await.is_some() {
        Some(exact)
    } else {
        let mut entries = tokio::fs::read_dir(dir.path()).await?;
        let mut candidate = None;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("subtitle.") && name.ends_with(".srt") && name != SUBTITLE_FILE {
                candidate = Some(entry.path());
                break;
            }
        }
        candidate
    };

    match found {
        Some(path) => {
            tokio::fs::rename(&path, &target).await?;
            Ok(Some(target))
        }
        None => Ok(existing_file(&target).await),
    }
}
