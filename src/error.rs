use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("Failed to parse URL: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("{0} deadline exceeded")]
    TimeoutError(TimeoutPhase),

    #[error("Scratch storage error: {0}")]
    StorageError(#[from] std::io::Error),

    #[error("Failed to read image metadata: {0}")]
    MetadataError(String),

    #[error("Failed to encode preview: {0}")]
    EncodeError(String),

    #[error("External process error: {program} - {message}")]
    ProcessError { program: String, message: String },

    #[error("Invalid signature")]
    InvalidSignature,
}

/// Which deadline fired. Connect and transfer share one cancellation
/// signal per run; render and extract deadlines are enforced per operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    Connect,
    Transfer,
    Render,
    Extract,
}

impl std::fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutPhase::Connect => write!(f, "Connect"),
            TimeoutPhase::Transfer => write!(f, "Transfer"),
            TimeoutPhase::Render => write!(f, "Render"),
            TimeoutPhase::Extract => write!(f, "Extract"),
        }
    }
}

impl PreviewError {
    /// True for any deadline expiry, regardless of which phase fired.
    pub fn is_timeout(&self) -> bool {
        matches!(self, PreviewError::TimeoutError(_))
    }

    pub fn log(&self) {
        match self {
            PreviewError::UrlParseError(e) => {
                warn!(error = %e, "URL parsing failed");
            }
            PreviewError::NetworkError(e) => {
                warn!(error = %e, "Network operation failed");
            }
            PreviewError::TimeoutError(phase) => {
                warn!(phase = %phase, "Deadline exceeded");
            }
            PreviewError::StorageError(e) => {
                error!(error = %e, "Scratch storage operation failed");
            }
            PreviewError::MetadataError(e) => {
                error!(error = %e, "Image metadata unreadable");
            }
            PreviewError::EncodeError(e) => {
                error!(error = %e, "Preview encoding failed");
            }
            PreviewError::ProcessError { program, message } => {
                error!(
                    program = %program,
                    error = %message,
                    "External process failed"
                );
            }
            PreviewError::InvalidSignature => {
                warn!("Signature verification failed");
            }
        }
    }
}
