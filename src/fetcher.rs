use std::future::Future;
use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument};

use crate::error::{PreviewError, TimeoutPhase};

/// Identifies this service to origins.
pub const USER_AGENT: &str = "media-preview";

/// Media ranges we are prepared to preview, efficient format first.
pub const ACCEPT_MEDIA: &str = "image/webp,image/*,video/*";

/// Configuration for [`Fetcher`].
///
/// The two timeouts are independent phases sharing one cancellation signal
/// per run: connect covers everything up to response headers, transfer
/// covers streaming the body to scratch storage.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub user_agent: String,
    pub accept: String,
    pub max_redirects: usize,
    pub connect_timeout: Duration,
    pub transfer_timeout: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: USER_AGENT.to_string(),
            accept: ACCEPT_MEDIA.to_string(),
            max_redirects: 5,
            connect_timeout: Duration::from_secs(10),
            transfer_timeout: Duration::from_secs(60),
        }
    }
}

/// The fetched remote object: reported status and content type, plus the
/// not-yet-consumed body stream. Consumed exactly once by
/// [`Fetcher::download`].
#[derive(Debug)]
pub struct SourceResource {
    pub status: StatusCode,
    pub content_type: Option<String>,
    response: reqwest::Response,
}

#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    config: FetcherConfig,
}

impl Default for Fetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetcher {
    pub fn new() -> Self {
        Self::new_with_config(FetcherConfig::default())
    }

    pub fn new_with_config(config: FetcherConfig) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            config
                .accept
                .parse()
                .expect("accept header value is static"),
        );

        let client = Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .unwrap_or_else(|e| {
                error!(error = %e, "Failed to create HTTP client");
                panic!("Failed to initialize HTTP client: {}", e);
            });

        Fetcher { client, config }
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    /// Send the request and wait for response headers under the connect
    /// deadline. Redirects are followed by the client up to the configured
    /// cap; exceeding it surfaces as a network error.
    #[instrument(level = "debug", skip(self, cancel), err)]
    pub async fn fetch(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<SourceResource, PreviewError> {
        debug!(url = %url, "Requesting remote resource");

        let response = with_deadline(
            self.config.connect_timeout,
            TimeoutPhase::Connect,
            cancel,
            self.client.get(url).send(),
        )
        .await?
        .map_err(|e| PreviewError::NetworkError(e.to_string()))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        debug!(
            status = status.as_u16(),
            reason = status.canonical_reason().unwrap_or("unknown"),
            content_type = content_type.as_deref().unwrap_or("none"),
            "Received response headers"
        );

        Ok(SourceResource {
            status,
            content_type,
            response,
        })
    }

    /// Stream the body to `dest` under the transfer deadline.
    ///
    /// The destination is opened create-exclusive: a name collision is a
    /// hard error, never a silent overwrite. The file is fully flushed
    /// before this returns, so callers may read it immediately.
    #[instrument(level = "debug", skip(self, resource, cancel), err)]
    pub async fn download(
        &self,
        resource: SourceResource,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, PreviewError> {
        let body = async {
            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(dest)
                .await?;

            let mut stream = resource.response.bytes_stream();
            let mut written: u64 = 0;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| PreviewError::NetworkError(e.to_string()))?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            Ok::<u64, PreviewError>(written)
        };

        let written = with_deadline(
            self.config.transfer_timeout,
            TimeoutPhase::Transfer,
            cancel,
            body,
        )
        .await??;

        debug!(bytes = written, dest = %dest.display(), "Download complete");
        Ok(written)
    }
}

/// Race `fut` against the phase deadline and the shared cancellation token.
///
/// A firing deadline cancels the token so the rest of the run stops too;
/// dropping `fut` aborts the in-flight network operation.
async fn with_deadline<F, T>(
    duration: Duration,
    phase: TimeoutPhase,
    cancel: &CancellationToken,
    fut: F,
) -> Result<T, PreviewError>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PreviewError::TimeoutError(phase)),
        out = fut => Ok(out),
        _ = tokio::time::sleep(duration) => {
            cancel.cancel();
            Err(PreviewError::TimeoutError(phase))
        }
    }
}
