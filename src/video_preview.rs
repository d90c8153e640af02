use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::error::{PreviewError, TimeoutPhase};
use crate::image_preview::{ImagePreviewer, RenderedPreview};

/// Deadline for one frame extraction; the child process is killed on expiry.
pub const EXTRACT_DEADLINE: Duration = Duration::from_secs(10);

/// Fixed name of the extracted frame inside the scratch directory.
pub const FRAME_FILE_NAME: &str = "frame.jpg";

const FRAME_CONTENT_TYPE: &str = "image/jpeg";

/// The video processing capability: write the first decodable frame of
/// `src` to `dest` as a baseline still image.
#[async_trait]
pub trait FrameExtractor: Send + Sync {
    async fn extract_first_frame(&self, src: &Path, dest: &Path) -> Result<(), PreviewError>;
}

/// External-process binding of [`FrameExtractor`] over ffmpeg.
#[derive(Debug, Clone)]
pub struct FfmpegFrameExtractor {
    program: String,
    deadline: Duration,
}

impl Default for FfmpegFrameExtractor {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            deadline: EXTRACT_DEADLINE,
        }
    }
}

impl FfmpegFrameExtractor {
    pub fn new_with_program(program: impl Into<String>, deadline: Duration) -> Self {
        Self {
            program: program.into(),
            deadline,
        }
    }
}

#[async_trait]
impl FrameExtractor for FfmpegFrameExtractor {
    #[instrument(level = "debug", skip(self), err)]
    async fn extract_first_frame(&self, src: &Path, dest: &Path) -> Result<(), PreviewError> {
        let mut command = Command::new(&self.program);
        command
            .args(["-hide_banner", "-loglevel", "warning", "-nostdin"])
            .arg("-i")
            .arg(src)
            .args(["-vframes", "1", "-f", "mjpeg"])
            // No overwrite flag: an existing destination is a hard error.
            .arg(dest)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!(src = %src.display(), dest = %dest.display(), "Extracting first video frame");

        let output = tokio::time::timeout(self.deadline, command.output())
            .await
            .map_err(|_| PreviewError::TimeoutError(TimeoutPhase::Extract))?
            .map_err(|e| PreviewError::ProcessError {
                program: self.program.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PreviewError::ProcessError {
                program: self.program.clone(),
                message: format!("{}: {}", output.status, stderr.trim()),
            });
        }

        Ok(())
    }
}

/// Turns a downloaded video into a still preview: one extracted frame,
/// then the image pipeline unchanged.
#[derive(Clone)]
pub struct VideoPreviewer {
    extractor: Arc<dyn FrameExtractor>,
    images: ImagePreviewer,
}

impl Default for VideoPreviewer {
    fn default() -> Self {
        Self::new(ImagePreviewer::new())
    }
}

impl VideoPreviewer {
    pub fn new(images: ImagePreviewer) -> Self {
        Self::new_with_extractor(Arc::new(FfmpegFrameExtractor::default()), images)
    }

    pub fn new_with_extractor(extractor: Arc<dyn FrameExtractor>, images: ImagePreviewer) -> Self {
        Self { extractor, images }
    }

    #[instrument(level = "debug", skip(self), err)]
    pub async fn preview(&self, asset_path: &Path) -> Result<RenderedPreview, PreviewError> {
        let scratch = asset_path.parent().ok_or_else(|| {
            PreviewError::StorageError(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "asset path has no parent directory",
            ))
        })?;
        let frame_path = scratch.join(FRAME_FILE_NAME);

        self.extractor
            .extract_first_frame(asset_path, &frame_path)
            .await?;

        self.images.preview(&frame_path, FRAME_CONTENT_TYPE).await
    }
}
