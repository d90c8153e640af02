use std::path::Path;

use sha1::{Digest, Sha1};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::classifier::{classify, Classification, MediaKind};
use crate::fetcher::Fetcher;
use crate::image_preview::ImagePreviewer;
use crate::video_preview::VideoPreviewer;
use crate::PreviewError;

/// Fixed name of the downloaded asset inside the scratch directory.
pub const DOWNLOAD_FILE_NAME: &str = "download";

/// Final output of a successful run. Ownership transfers to the caller for
/// transport encoding; the digest is a stable cache-validation token over
/// the output bytes.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PreviewResult {
    #[serde(skip_serializing)]
    pub content: Vec<u8>,
    pub content_type: String,
    pub digest: String,
}

/// One tagged result per pipeline run. Expected negative outcomes are
/// values; processing faults travel the `Err` channel instead.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PipelineOutcome {
    Success(PreviewResult),
    Rejected { status: u16 },
    UpstreamError,
    Unsupported,
    TimedOut,
}

impl PipelineOutcome {
    /// Transport status classification per the output contract: rejected
    /// origin statuses pass through verbatim, upstream and unsupported map
    /// to bad gateway, deadline expiry to gateway timeout.
    pub fn http_status(&self) -> u16 {
        match self {
            PipelineOutcome::Success(_) => 200,
            PipelineOutcome::Rejected { status } => *status,
            PipelineOutcome::UpstreamError | PipelineOutcome::Unsupported => 502,
            PipelineOutcome::TimedOut => 504,
        }
    }
}

/// Configuration for [`PreviewPipeline`]; unset components fall back to
/// their defaults.
#[derive(Default)]
pub struct PipelineConfig {
    fetcher: Option<Fetcher>,
    images: Option<ImagePreviewer>,
    videos: Option<VideoPreviewer>,
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fetcher(mut self, fetcher: Fetcher) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_image_previewer(mut self, images: ImagePreviewer) -> Self {
        self.images = Some(images);
        self
    }

    pub fn with_video_previewer(mut self, videos: VideoPreviewer) -> Self {
        self.videos = Some(videos);
        self
    }
}

/// Orchestrates one fetch -> classify -> extract -> preview pass.
///
/// Each run is a single sequential task over its own scratch directory and
/// cancellation token; no state is shared between runs, and nothing is
/// retried.
#[derive(Clone)]
pub struct PreviewPipeline {
    fetcher: Fetcher,
    images: ImagePreviewer,
    videos: VideoPreviewer,
}

impl Default for PreviewPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl PreviewPipeline {
    pub fn new() -> Self {
        Self::new_with_config(PipelineConfig::new())
    }

    pub fn new_with_config(config: PipelineConfig) -> Self {
        let images = config.images.unwrap_or_default();
        let videos = config
            .videos
            .unwrap_or_else(|| VideoPreviewer::new(images.clone()));

        Self {
            fetcher: config.fetcher.unwrap_or_default(),
            images,
            videos,
        }
    }

    /// Run the pipeline once for `url`, using `scratch_dir` for transient
    /// files. The caller owns the scratch directory and its teardown.
    #[instrument(level = "debug", skip(self, scratch_dir), err)]
    pub async fn run(
        &self,
        url: &str,
        scratch_dir: &Path,
    ) -> Result<PipelineOutcome, PreviewError> {
        let _ = url::Url::parse(url)?;

        // One cancellation signal per run, shared by both fetch phases.
        let cancel = CancellationToken::new();

        let resource = match self.fetcher.fetch(url, &cancel).await {
            Ok(resource) => resource,
            Err(e) => return Self::negative_outcome(e),
        };

        let classification = classify(resource.status, resource.content_type.as_deref());
        debug!(?classification, "Classified response");

        let kind = match classification {
            Classification::Proceed(kind) => kind,
            Classification::Rejected(status) => {
                return Ok(PipelineOutcome::Rejected { status })
            }
            Classification::UpstreamError => return Ok(PipelineOutcome::UpstreamError),
            Classification::Unsupported => return Ok(PipelineOutcome::Unsupported),
        };

        // Proceed implies a content type was present.
        let content_type = resource.content_type.clone().unwrap_or_default();

        let download_path = scratch_dir.join(DOWNLOAD_FILE_NAME);
        if let Err(e) = self
            .fetcher
            .download(resource, &download_path, &cancel)
            .await
        {
            return Self::negative_outcome(e);
        }

        let rendered = match kind {
            MediaKind::Image => self.images.preview(&download_path, &content_type).await,
            MediaKind::Video => self.videos.preview(&download_path).await,
        };

        let rendered = match rendered {
            Ok(rendered) => rendered,
            Err(e) => return Self::negative_outcome(e),
        };

        let digest = content_digest(&rendered.content);
        debug!(
            content_type = %rendered.content_type,
            bytes = rendered.content.len(),
            digest = %digest,
            "Preview generated"
        );

        Ok(PipelineOutcome::Success(PreviewResult {
            content: rendered.content,
            content_type: rendered.content_type,
            digest,
        }))
    }

    /// Fold expected failures into outcomes; anything else is a fault and
    /// propagates to the caller unrecovered.
    fn negative_outcome(error: PreviewError) -> Result<PipelineOutcome, PreviewError> {
        error.log();
        match error {
            PreviewError::TimeoutError(_) => Ok(PipelineOutcome::TimedOut),
            PreviewError::NetworkError(_) => Ok(PipelineOutcome::UpstreamError),
            other => Err(other),
        }
    }
}

/// Stable lowercase-hex SHA-1 digest of the output bytes.
pub fn content_digest(content: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}
