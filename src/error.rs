use crate::domain::MediaType;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Bad or missing field in a payload or media record. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// No registered normalizer recognizes the payload shape.
    #[error("no normalizer found for webhook payload")]
    NoNormalizer,

    /// No active channel matches the platform id in provider metadata.
    #[error("no active channel for platform id '{0}'")]
    NoChannel(String),

    /// The payload shape itself is unparseable (not merely an unknown
    /// sub-type, which degrades to a placeholder instead).
    #[error("unsupported message type")]
    UnsupportedMessage,

    /// Truncated MAC mismatch. Fatal for the media: the download is
    /// corrupt or tampered and retrying cannot fix it.
    #[error("media integrity check failed: {0}")]
    Integrity(String),

    /// Decryption engine failure, carrying the media category and cause.
    #[error("decrypt failed for {media_type} media")]
    Decrypt {
        media_type: MediaType,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Upload exhausted its retry allowance; the last attempt's error is
    /// the source.
    #[error("storage upload failed after {attempts} attempts")]
    Storage {
        attempts: u32,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("object store error: {0}")]
    ObjectStore(String),

    #[error("event publish failed: {0}")]
    Publish(String),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Wrap a cause in a decrypt failure for the given category.
    pub fn decrypt(media_type: MediaType, source: PipelineError) -> Self {
        PipelineError::Decrypt {
            media_type,
            source: Box::new(source),
        }
    }

    /// Transient transport failures are worth another attempt; everything
    /// else in the taxonomy is not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Http(_) | PipelineError::ObjectStore(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
