use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::codecs::webp::{WebPDecoder, WebPEncoder};
use image::metadata::Orientation;
use image::{
    AnimationDecoder, DynamicImage, Frame, ImageDecoder, ImageFormat, ImageReader,
};
use tracing::{debug, instrument};

use crate::classifier::media_type_essence;
use crate::error::{PreviewError, TimeoutPhase};

/// Bounding box for generated previews.
pub const MAX_WIDTH: u32 = 600;
pub const MAX_HEIGHT: u32 = 600;

/// Deadline for one decode-resize-encode pass.
pub const RENDER_DEADLINE: Duration = Duration::from_secs(10);

const WEBP_CONTENT_TYPE: &str = "image/webp";
const GIF_CONTENT_TYPE: &str = "image/gif";
const SVG_CONTENT_TYPE: &str = "image/svg+xml";

/// How many times an animation plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopCount {
    Infinite,
    Finite(u16),
}

/// Animation facts derived while probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Animation {
    Still,
    /// GIF sources always take the frame-preserving path, single-frame or not.
    AnimatedGif { loop_count: LoopCount },
    AnimatedWebP,
}

/// Read-only facts about a downloaded image, computed once per run.
#[derive(Debug, Clone)]
pub struct ImageMetadata {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub orientation: Orientation,
    pub animation: Animation,
}

/// Encoded preview bytes plus the content type they should be served with.
#[derive(Debug, Clone)]
pub struct RenderedPreview {
    pub content: Vec<u8>,
    pub content_type: String,
}

/// The still-image processing capability: probe metadata, then render a
/// resized re-encode. Implementations are isolated and time-bounded; the
/// previewer never depends on a particular binding.
#[async_trait]
pub trait ImageCodec: Send + Sync {
    async fn probe(&self, data: &[u8]) -> Result<ImageMetadata, PreviewError>;

    /// Rotate to canonical orientation, resize to `target`, re-encode.
    /// `target` is expressed in post-rotation pixels.
    async fn render(
        &self,
        data: Vec<u8>,
        meta: &ImageMetadata,
        target: (u32, u32),
    ) -> Result<RenderedPreview, PreviewError>;
}

/// In-process binding of [`ImageCodec`] on top of the `image` crate.
///
/// Rendering runs on the blocking pool under [`RENDER_DEADLINE`]; stills
/// encode to lossless WebP, GIF animations re-encode frame by frame.
#[derive(Debug, Clone)]
pub struct LibraryCodec {
    render_deadline: Duration,
}

impl Default for LibraryCodec {
    fn default() -> Self {
        Self {
            render_deadline: RENDER_DEADLINE,
        }
    }
}

impl LibraryCodec {
    pub fn new_with_deadline(render_deadline: Duration) -> Self {
        Self { render_deadline }
    }
}

#[async_trait]
impl ImageCodec for LibraryCodec {
    async fn probe(&self, data: &[u8]) -> Result<ImageMetadata, PreviewError> {
        probe_sync(data)
    }

    async fn render(
        &self,
        data: Vec<u8>,
        meta: &ImageMetadata,
        target: (u32, u32),
    ) -> Result<RenderedPreview, PreviewError> {
        let meta = meta.clone();
        let task = tokio::task::spawn_blocking(move || render_sync(&data, &meta, target));

        match tokio::time::timeout(self.render_deadline, task).await {
            Err(_) => Err(PreviewError::TimeoutError(TimeoutPhase::Render)),
            Ok(Err(join)) => Err(PreviewError::EncodeError(join.to_string())),
            Ok(Ok(result)) => result,
        }
    }
}

/// Resizes downloaded images into the preview bounding box.
///
/// Falls back to the original bytes whenever re-encoding cannot produce a
/// strictly smaller payload, so a "preview" is never larger than its source.
#[derive(Clone)]
pub struct ImagePreviewer {
    codec: Arc<dyn ImageCodec>,
}

impl Default for ImagePreviewer {
    fn default() -> Self {
        Self::new()
    }
}

impl ImagePreviewer {
    pub fn new() -> Self {
        Self::new_with_codec(Arc::new(LibraryCodec::default()))
    }

    pub fn new_with_codec(codec: Arc<dyn ImageCodec>) -> Self {
        Self { codec }
    }

    #[instrument(level = "debug", skip(self), err)]
    pub async fn preview(
        &self,
        asset_path: &Path,
        content_type: &str,
    ) -> Result<RenderedPreview, PreviewError> {
        // Vector sources have no bounded intrinsic size to resize against.
        if media_type_essence(content_type) == SVG_CONTENT_TYPE {
            debug!("Vector source, serving original bytes");
            return passthrough(asset_path, content_type).await;
        }

        let data = tokio::fs::read(asset_path).await?;
        let meta = self.codec.probe(&data).await?;
        debug!(
            format = ?meta.format,
            width = meta.width,
            height = meta.height,
            orientation = ?meta.orientation,
            animation = ?meta.animation,
            "Probed image metadata"
        );

        // Animated WebP is already the efficient target format; a GIF
        // transcode would lose color depth and almost never shrink it.
        if meta.animation == Animation::AnimatedWebP {
            debug!("Animated WebP source, serving original bytes");
            return Ok(RenderedPreview {
                content: data,
                content_type: content_type.to_string(),
            });
        }

        let Some(target) = plan_dimensions(&meta) else {
            debug!("Source already fits the preview box, serving original bytes");
            return Ok(RenderedPreview {
                content: data,
                content_type: content_type.to_string(),
            });
        };

        let original_size = data.len();
        let rendered = self.codec.render(data.clone(), &meta, target).await?;
        debug!(
            original_bytes = original_size,
            encoded_bytes = rendered.content.len(),
            "Compared encoded output against source"
        );

        if rendered.content.len() >= original_size {
            // Never serve a preview larger than its source.
            return Ok(RenderedPreview {
                content: data,
                content_type: content_type.to_string(),
            });
        }

        Ok(rendered)
    }
}

async fn passthrough(
    asset_path: &Path,
    content_type: &str,
) -> Result<RenderedPreview, PreviewError> {
    let content = tokio::fs::read(asset_path).await?;
    Ok(RenderedPreview {
        content,
        content_type: content_type.to_string(),
    })
}

/// True when displaying the image upright transposes width and height.
/// Covers EXIF orientation codes 5 through 8.
pub fn orientation_swaps_axes(orientation: Orientation) -> bool {
    matches!(
        orientation,
        Orientation::Rotate90
            | Orientation::Rotate270
            | Orientation::Rotate90FlipH
            | Orientation::Rotate270FlipH
    )
}

/// Compute the post-rotation target dimensions, or `None` when the source
/// already fits the box.
///
/// The axis proportionally closest to its bound is pinned to it and the
/// other follows by uniform scale. The decision runs on orientation-effective
/// dimensions: a 90-degree rotation swaps the apparent aspect ratio, so the
/// stored width/height must be swapped before choosing the pinned axis.
pub fn plan_dimensions(meta: &ImageMetadata) -> Option<(u32, u32)> {
    let (width, height) = if orientation_swaps_axes(meta.orientation) {
        (meta.height, meta.width)
    } else {
        (meta.width, meta.height)
    };

    if width <= MAX_WIDTH && height <= MAX_HEIGHT {
        return None;
    }

    // w/h >= W/H, in integers.
    let pin_width = width as u64 * MAX_HEIGHT as u64 >= height as u64 * MAX_WIDTH as u64;

    let target = if pin_width {
        let scaled = (height as f64 * MAX_WIDTH as f64 / width as f64).round() as u32;
        (MAX_WIDTH, scaled.max(1))
    } else {
        let scaled = (width as f64 * MAX_HEIGHT as f64 / height as f64).round() as u32;
        (scaled.max(1), MAX_HEIGHT)
    };

    Some(target)
}

fn probe_sync(data: &[u8]) -> Result<ImageMetadata, PreviewError> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| PreviewError::MetadataError(e.to_string()))?;

    let format = reader
        .format()
        .ok_or_else(|| PreviewError::MetadataError("unrecognized image format".into()))?;

    let mut decoder = reader
        .into_decoder()
        .map_err(|e| PreviewError::MetadataError(e.to_string()))?;

    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let (width, height) = decoder.dimensions();

    let animation = match format {
        ImageFormat::Gif => Animation::AnimatedGif {
            loop_count: probe_gif_loop_count(data)?,
        },
        ImageFormat::WebP => {
            let webp = WebPDecoder::new(Cursor::new(data))
                .map_err(|e| PreviewError::MetadataError(e.to_string()))?;
            if webp.has_animation() {
                Animation::AnimatedWebP
            } else {
                Animation::Still
            }
        }
        _ => Animation::Still,
    };

    Ok(ImageMetadata {
        format,
        width,
        height,
        orientation,
        animation,
    })
}

/// The `image` crate does not surface the GIF loop count, so probe it with
/// the underlying `gif` decoder.
fn probe_gif_loop_count(data: &[u8]) -> Result<LoopCount, PreviewError> {
    let mut options = gif::DecodeOptions::new();
    options.set_color_output(gif::ColorOutput::RGBA);
    let decoder = options
        .read_info(Cursor::new(data))
        .map_err(|e| PreviewError::MetadataError(e.to_string()))?;

    Ok(match decoder.repeat() {
        gif::Repeat::Infinite => LoopCount::Infinite,
        gif::Repeat::Finite(n) => LoopCount::Finite(n),
    })
}

fn render_sync(
    data: &[u8],
    meta: &ImageMetadata,
    target: (u32, u32),
) -> Result<RenderedPreview, PreviewError> {
    match meta.animation {
        Animation::AnimatedGif { loop_count } => render_animation_sync(data, loop_count, target),
        _ => render_still_sync(data, meta.orientation, target),
    }
}

fn render_still_sync(
    data: &[u8],
    orientation: Orientation,
    (width, height): (u32, u32),
) -> Result<RenderedPreview, PreviewError> {
    let mut img = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| PreviewError::MetadataError(e.to_string()))?
        .decode()
        .map_err(|e| PreviewError::MetadataError(e.to_string()))?;

    img.apply_orientation(orientation);
    let resized = img.resize_exact(width, height, image::imageops::FilterType::Lanczos3);

    // The WebP encoder wants 8-bit buffers.
    let resized = if resized.color().has_alpha() {
        DynamicImage::ImageRgba8(resized.into_rgba8())
    } else {
        DynamicImage::ImageRgb8(resized.into_rgb8())
    };

    let mut out = Cursor::new(Vec::new());
    resized
        .write_with_encoder(WebPEncoder::new_lossless(&mut out))
        .map_err(|e| PreviewError::EncodeError(e.to_string()))?;

    Ok(RenderedPreview {
        content: out.into_inner(),
        content_type: WEBP_CONTENT_TYPE.to_string(),
    })
}

/// Resize every frame, keeping per-frame delays and the loop count.
fn render_animation_sync(
    data: &[u8],
    loop_count: LoopCount,
    (width, height): (u32, u32),
) -> Result<RenderedPreview, PreviewError> {
    let decoder = GifDecoder::new(Cursor::new(data))
        .map_err(|e| PreviewError::MetadataError(e.to_string()))?;
    let frames = decoder
        .into_frames()
        .collect_frames()
        .map_err(|e| PreviewError::MetadataError(e.to_string()))?;

    let mut out = Cursor::new(Vec::new());
    {
        let mut encoder = GifEncoder::new_with_speed(&mut out, 10);
        encoder
            .set_repeat(match loop_count {
                LoopCount::Infinite => Repeat::Infinite,
                LoopCount::Finite(n) => Repeat::Finite(n),
            })
            .map_err(|e| PreviewError::EncodeError(e.to_string()))?;

        for frame in frames {
            let delay = frame.delay();
            let resized = DynamicImage::ImageRgba8(frame.into_buffer())
                .resize_exact(width, height, image::imageops::FilterType::Lanczos3)
                .into_rgba8();
            encoder
                .encode_frame(Frame::from_parts(resized, 0, 0, delay))
                .map_err(|e| PreviewError::EncodeError(e.to_string()))?;
        }
    }

    Ok(RenderedPreview {
        content: out.into_inner(),
        content_type: GIF_CONTENT_TYPE.to_string(),
    })
}
