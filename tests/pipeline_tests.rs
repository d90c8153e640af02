use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, ImageReader, RgbaImage};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use media_preview::{
    content_digest, Fetcher, FetcherConfig, FrameExtractor, ImagePreviewer, PipelineConfig,
    PipelineOutcome, PreviewError, PreviewPipeline, VideoPreviewer,
};

/// Serve one canned HTTP/1.1 response on a fresh local port.
async fn spawn_origin(response: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let _ = socket.write_all(&response).await;
            let _ = socket.shutdown().await;
        }
    });
    format!("http://{addr}/")
}

/// Accept connections but never send response headers.
async fn spawn_stalling_origin() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((socket, _)) = listener.accept().await {
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        }
    });
    format!("http://{addr}/")
}

/// Send headers and a partial body, then hang.
async fn spawn_stalling_body_origin() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let head = "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: 100000\r\n\r\n";
            let _ = socket.write_all(head.as_bytes()).await;
            let _ = socket.write_all(&[0u8; 128]).await;
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        }
    });
    format!("http://{addr}/")
}

/// Answer every connection with a redirect back to itself.
async fn spawn_redirect_loop_origin() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 302 Found\r\nLocation: http://{addr}/\r\nContent-Length: 0\r\n\r\n"
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });
    format!("http://{addr}/")
}

fn http_response(status_line: &str, content_type: Option<&str>, body: &[u8]) -> Vec<u8> {
    let mut head = format!(
        "HTTP/1.1 {status_line}\r\nConnection: close\r\nContent-Length: {}\r\n",
        body.len()
    );
    if let Some(ct) = content_type {
        head.push_str(&format!("Content-Type: {ct}\r\n"));
    }
    head.push_str("\r\n");
    let mut response = head.into_bytes();
    response.extend_from_slice(body);
    response
}

// High-entropy content so the resized re-encode reliably wins the size
// comparison; deterministic so digests are stable across runs.
fn noise_image(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgba8(RgbaImage::from_fn(width, height, |x, y| {
        let v = x.wrapping_mul(0x9E37_79B1) ^ y.wrapping_mul(0x85EB_CA6B);
        let v = v ^ (v >> 15);
        image::Rgba([v as u8, (v >> 8) as u8, (v >> 16) as u8, 255])
    }))
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    noise_image(width, height)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

fn fast_pipeline() -> PreviewPipeline {
    PreviewPipeline::new_with_config(PipelineConfig::new().with_fetcher(fast_fetcher()))
}

fn fast_fetcher() -> Fetcher {
    Fetcher::new_with_config(FetcherConfig {
        connect_timeout: Duration::from_millis(500),
        transfer_timeout: Duration::from_millis(500),
        ..FetcherConfig::default()
    })
}

fn output_dimensions(content: &[u8]) -> (u32, u32) {
    ImageReader::new(Cursor::new(content))
        .with_guessed_format()
        .unwrap()
        .into_dimensions()
        .unwrap()
}

#[tokio::test]
async fn scenario_rejected_404_passes_through() {
    let url = spawn_origin(http_response("404 Not Found", None, b"")).await;
    let scratch = tempfile::tempdir().unwrap();

    let outcome = fast_pipeline().run(&url, scratch.path()).await.unwrap();
    assert!(matches!(outcome, PipelineOutcome::Rejected { status: 404 }));
    assert_eq!(outcome.http_status(), 404);
}

#[tokio::test]
async fn rejected_statuses_are_not_folded_into_bad_gateway() {
    for status_line in ["403 Forbidden", "410 Gone"] {
        let url = spawn_origin(http_response(status_line, Some("image/png"), b"")).await;
        let scratch = tempfile::tempdir().unwrap();

        let outcome = fast_pipeline().run(&url, scratch.path()).await.unwrap();
        let expected: u16 = status_line[..3].parse().unwrap();
        assert!(
            matches!(outcome, PipelineOutcome::Rejected { status } if status == expected),
            "unexpected outcome for {status_line}: {outcome:?}"
        );
    }
}

#[tokio::test]
async fn other_upstream_failures_become_bad_gateway() {
    let url = spawn_origin(http_response("500 Internal Server Error", None, b"oops")).await;
    let scratch = tempfile::tempdir().unwrap();

    let outcome = fast_pipeline().run(&url, scratch.path()).await.unwrap();
    assert!(matches!(outcome, PipelineOutcome::UpstreamError));
    assert_eq!(outcome.http_status(), 502);
}

#[tokio::test]
async fn scenario_large_png_is_resized_to_webp() {
    let body = png_bytes(1200, 800);
    let url = spawn_origin(http_response("200 OK", Some("image/png"), &body)).await;
    let scratch = tempfile::tempdir().unwrap();

    let outcome = fast_pipeline().run(&url, scratch.path()).await.unwrap();
    let PipelineOutcome::Success(preview) = outcome else {
        panic!("expected success, got {outcome:?}");
    };

    assert_eq!(preview.content_type, "image/webp");
    assert_eq!(output_dimensions(&preview.content), (600, 400));
    assert!(preview.content.len() < body.len());
    assert_eq!(preview.digest, content_digest(&preview.content));
}

#[tokio::test]
async fn small_image_is_served_verbatim() {
    let body = png_bytes(300, 200);
    let url = spawn_origin(http_response("200 OK", Some("image/png"), &body)).await;
    let scratch = tempfile::tempdir().unwrap();

    let outcome = fast_pipeline().run(&url, scratch.path()).await.unwrap();
    let PipelineOutcome::Success(preview) = outcome else {
        panic!("expected success, got {outcome:?}");
    };

    assert_eq!(preview.content_type, "image/png");
    assert_eq!(preview.content, body);
}

#[tokio::test]
async fn digest_is_stable_across_runs() {
    let body = png_bytes(1200, 800);

    let mut digests = Vec::new();
    for _ in 0..2 {
        let url = spawn_origin(http_response("200 OK", Some("image/png"), &body)).await;
        let scratch = tempfile::tempdir().unwrap();
        let outcome = fast_pipeline().run(&url, scratch.path()).await.unwrap();
        let PipelineOutcome::Success(preview) = outcome else {
            panic!("expected success");
        };
        digests.push(preview.digest);
    }

    assert_eq!(digests[0], digests[1]);
}

/// Stands in for ffmpeg: writes a JPEG "first frame" to `dest`.
struct StillFrameExtractor;

#[async_trait]
impl FrameExtractor for StillFrameExtractor {
    async fn extract_first_frame(&self, _src: &Path, dest: &Path) -> Result<(), PreviewError> {
        let mut out = Cursor::new(Vec::new());
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 100);
        DynamicImage::ImageRgb8(noise_image(1200, 800).to_rgb8())
            .write_with_encoder(encoder)
            .unwrap();
        tokio::fs::write(dest, out.into_inner()).await?;
        Ok(())
    }
}

#[tokio::test]
async fn scenario_video_extracts_one_frame_then_resizes() {
    let url = spawn_origin(http_response(
        "200 OK",
        Some("video/mp4"),
        b"\x00\x00\x00\x18ftypmp42 not a real video",
    ))
    .await;
    let scratch = tempfile::tempdir().unwrap();

    let images = ImagePreviewer::new();
    let pipeline = PreviewPipeline::new_with_config(
        PipelineConfig::new()
            .with_fetcher(fast_fetcher())
            .with_video_previewer(VideoPreviewer::new_with_extractor(
                Arc::new(StillFrameExtractor),
                images.clone(),
            ))
            .with_image_previewer(images),
    );

    let outcome = pipeline.run(&url, scratch.path()).await.unwrap();
    let PipelineOutcome::Success(preview) = outcome else {
        panic!("expected success, got {outcome:?}");
    };

    assert_eq!(preview.content_type, "image/webp");
    assert_eq!(output_dimensions(&preview.content), (600, 400));
}

#[tokio::test]
async fn scenario_connect_timeout_yields_timed_out() {
    let url = spawn_stalling_origin().await;
    let scratch = tempfile::tempdir().unwrap();

    let outcome = fast_pipeline().run(&url, scratch.path()).await.unwrap();
    assert!(matches!(outcome, PipelineOutcome::TimedOut));
    assert_eq!(outcome.http_status(), 504);
}

#[tokio::test]
async fn stalled_body_yields_timed_out() {
    let url = spawn_stalling_body_origin().await;
    let scratch = tempfile::tempdir().unwrap();

    let outcome = fast_pipeline().run(&url, scratch.path()).await.unwrap();
    assert!(matches!(outcome, PipelineOutcome::TimedOut));
}

#[tokio::test]
async fn scenario_html_is_unsupported() {
    let url = spawn_origin(http_response(
        "200 OK",
        Some("text/html; charset=utf-8"),
        b"<html></html>",
    ))
    .await;
    let scratch = tempfile::tempdir().unwrap();

    let outcome = fast_pipeline().run(&url, scratch.path()).await.unwrap();
    assert!(matches!(outcome, PipelineOutcome::Unsupported));
    assert_eq!(outcome.http_status(), 502);
}

#[tokio::test]
async fn missing_content_type_is_unsupported() {
    let url = spawn_origin(http_response("200 OK", None, b"whatever")).await;
    let scratch = tempfile::tempdir().unwrap();

    let outcome = fast_pipeline().run(&url, scratch.path()).await.unwrap();
    assert!(matches!(outcome, PipelineOutcome::Unsupported));
}

#[tokio::test]
async fn redirect_loop_becomes_bad_gateway() {
    let url = spawn_redirect_loop_origin().await;
    let scratch = tempfile::tempdir().unwrap();

    let outcome = fast_pipeline().run(&url, scratch.path()).await.unwrap();
    assert!(matches!(outcome, PipelineOutcome::UpstreamError));
}

#[tokio::test]
async fn download_name_collision_is_a_fault() {
    let body = png_bytes(100, 100);
    let url = spawn_origin(http_response("200 OK", Some("image/png"), &body)).await;
    let scratch = tempfile::tempdir().unwrap();

    // A leftover file under the fixed name must fail the run loudly instead
    // of being silently overwritten.
    tokio::fs::write(scratch.path().join("download"), b"stale")
        .await
        .unwrap();

    let result = fast_pipeline().run(&url, scratch.path()).await;
    assert!(matches!(result, Err(PreviewError::StorageError(_))));
}

#[tokio::test]
async fn corrupt_image_is_a_fault() {
    let url = spawn_origin(http_response(
        "200 OK",
        Some("image/png"),
        b"not a png at all",
    ))
    .await;
    let scratch = tempfile::tempdir().unwrap();

    let result = fast_pipeline().run(&url, scratch.path()).await;
    assert!(matches!(result, Err(PreviewError::MetadataError(_))));
}

#[tokio::test]
async fn invalid_url_is_a_fault() {
    let scratch = tempfile::tempdir().unwrap();
    let result = fast_pipeline().run("not a url", scratch.path()).await;
    assert!(matches!(result, Err(PreviewError::UrlParseError(_))));
}
