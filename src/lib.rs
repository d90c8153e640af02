//! Bounded fetch-to-preview pipeline.
//!
//! Fetches a remote URL under independent connect/transfer deadlines,
//! classifies it by transport content type, and produces a small preview
//! image: resized re-encodes for stills, frame-preserving re-encodes for
//! animations, a single extracted frame for videos. Re-encoded output only
//! replaces the original bytes when it is strictly smaller.

mod classifier;
mod error;
mod fetcher;
mod image_preview;
mod logging;
mod pipeline;
mod scratch;
pub mod signature;
mod video_preview;

pub use classifier::{classify, media_type_essence, Classification, MediaKind};
pub use error::{PreviewError, TimeoutPhase};
pub use fetcher::{Fetcher, FetcherConfig, SourceResource, ACCEPT_MEDIA, USER_AGENT};
pub use image_preview::{
    plan_dimensions, Animation, ImageCodec, ImageMetadata, ImagePreviewer, LibraryCodec,
    LoopCount, RenderedPreview, MAX_HEIGHT, MAX_WIDTH, RENDER_DEADLINE,
};
pub use logging::{setup_logging, LogConfig};
pub use pipeline::{
    content_digest, PipelineConfig, PipelineOutcome, PreviewPipeline, PreviewResult,
    DOWNLOAD_FILE_NAME,
};
pub use scratch::ScratchDir;
pub use video_preview::{
    FfmpegFrameExtractor, FrameExtractor, VideoPreviewer, EXTRACT_DEADLINE, FRAME_FILE_NAME,
};
