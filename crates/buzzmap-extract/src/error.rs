use thiserror::Error;

/// Errors returned by a text-extraction collaborator.
#[derive(Debug, Error)]
pub enum ExtractorError {
    /// Network or TLS failure from the underlying HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("extraction quota exhausted (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("unexpected HTTP status {status} from extraction service")]
    UnexpectedStatus { status: u16 },

    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// The service answered but produced no text to parse.
    #[error("extraction service returned no content")]
    EmptyResponse,

    #[error("invalid extraction endpoint \"{url}\": {reason}")]
    InvalidBaseUrl { url: String, reason: String },
}

impl ExtractorError {
    /// Timeouts, 429/quota and 5xx are worth another attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            ExtractorError::Http(e) => {
                e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error())
            }
            ExtractorError::RateLimited { .. } => true,
            ExtractorError::UnexpectedStatus { status } => *status >= 500,
            ExtractorError::Deserialize { .. }
            | ExtractorError::EmptyResponse
            | ExtractorError::InvalidBaseUrl { .. } => false,
        }
    }
}

/// Extraction for one post gave up.
#[derive(Debug, Error)]
#[error("extraction failed for post {post_id} (retryable: {retryable}): {source}")]
pub struct ExtractionError {
    pub post_id: String,
    pub retryable: bool,
    #[source]
    pub source: ExtractorError,
}
