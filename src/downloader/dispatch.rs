//! Run submission and the per-run worker task.

use crate::error::{Error, Result};
use crate::types::{Event, RunId, RunStatus};
use std::sync::atomic::Ordering;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::Downloader;

impl Downloader {
    /// Submit a URL for download
    ///
    /// Checks admission for `identifier`, registers a new run in
    /// [`RunStatus::Pending`] and returns its ID immediately. The run itself
    /// executes in a background task once a run slot is free; follow it with
    /// [`subscribe`](Self::subscribe). An empty `caption_language` selects the
    /// configured default.
    ///
    /// # Errors
    ///
    /// - [`Error::ShuttingDown`] after [`shutdown`](Self::shutdown) started
    /// - [`Error::InvalidUrl`] unless `url` is an absolute http(s) URL
    /// - [`Error::AdmissionDenied`] when the identifier's window is full
    ///
    /// A failing shared admission store does not reject the run; the failure
    /// is logged and the run is admitted.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use clipfetch::*;
    /// # async fn example(downloader: Downloader) -> Result<()> {
    /// let id = downloader
    ///     .submit("user-42", "https://www.youtube.com/watch?v=dQw4w9WgXcQ", "en")
    ///     .await?;
    /// println!("queued run {id}");
    /// # Ok(())
    /// # }
    /// ```
    pub async fn submit(
        &self,
        identifier: &str,
        url: &str,
        caption_language: &str,
    ) -> Result<RunId> {
        if !self.state.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        validate_url(url)?;

        let admission = self.admission.allow(identifier).await;
        if !admission.allowed {
            return Err(Error::AdmissionDenied {
                identifier: identifier.to_string(),
            });
        }
        if let Some(e) = &admission.backend_error {
            tracing::debug!(identifier, error = %e, "run admitted without a counter");
        }

        let id = RunId::next();
        let dir = self.pipeline.run_dir(id).path().to_path_buf();
        let token = self.state.root_token.child_token();
        self.state.active.insert(id, dir, token.clone()).await;

        tracing::info!(run_id = %id, identifier, url, "run submitted");
        self.emit_event(Event::StatusChanged {
            id,
            status: RunStatus::Pending,
        });

        let downloader = self.clone();
        let url = url.to_string();
        let caption_language = caption_language.to_string();
        tokio::spawn(
            async move {
                downloader
                    .execute_run(id, &url, &caption_language, token)
                    .await;
            }
            .instrument(tracing::info_span!("run", run_id = %id)),
        );

        Ok(id)
    }

    /// Wait for a run slot, run the pipeline and publish the outcome
    async fn execute_run(
        &self,
        id: RunId,
        url: &str,
        caption_language: &str,
        token: CancellationToken,
    ) {
        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            permit = self.state.concurrent_limit.clone().acquire_owned() => {
                permit.map_err(|_| Error::ShuttingDown)
            }
        };

        let outcome = match permit {
            Ok(_permit) => {
                self.set_status(id, RunStatus::Processing).await;
                self.pipeline
                    .run_with_id(id, url, caption_language, &token)
                    .await
            }
            Err(e) => Err(e),
        };

        let status = if outcome.is_ok() {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        self.state.active.transition(id, status).await;
        if let Some(dir) = self.state.active.remove(id).await {
            self.state.finished.insert(id, dir, status).await;
        }
        self.emit_event(Event::StatusChanged { id, status });

        match outcome {
            Ok(bundle) => {
                tracing::info!(
                    video_size = bundle.video_size,
                    duration_secs = bundle.duration_secs,
                    has_subtitle = bundle.has_subtitle,
                    "run completed"
                );
                self.emit_event(Event::Completed { id, bundle });
            }
            Err(e) => {
                if e.is_cancelled() {
                    tracing::info!("run cancelled");
                } else {
                    tracing::error!(error = %e, "run failed");
                }
                self.emit_event(Event::Failed {
                    id,
                    error: e.to_string(),
                });
            }
        }
    }

    async fn set_status(&self, id: RunId, status: RunStatus) {
        if self.state.active.transition(id, status).await {
            self.emit_event(Event::StatusChanged { id, status });
        }
    }
}

/// Accept only absolute http(s) URLs with a host
pub(crate) fn validate_url(url: &str) -> Result<()> {
    let parsed = url::Url::parse(url).map_err(|e| Error::InvalidUrl(format!("{url}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some_and(|h| !h.is_empty()) => Ok(()),
        "http" | "https" => Err(Error::InvalidUrl(format!("{url}: missing host"))),
        scheme => Err(Error::InvalidUrl(format!(
            "{url}: unsupported scheme '{scheme}'"
        ))),
    }
}
