use buzzmap_core::Platform;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("rate limited by {platform} (retry after {retry_after_secs}s)")]
    RateLimited {
        platform: Platform,
        retry_after_secs: u64,
    },

    #[error("unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("{platform} API error: {message}")]
    Api { platform: Platform, message: String },

    #[error("{platform} source is not configured: missing {var}")]
    MissingCredential { platform: Platform, var: String },

    #[error("pagination limit reached for {platform}: exceeded {max_pages} pages")]
    PaginationLimit { platform: Platform, max_pages: usize },

    #[error("invalid base URL \"{url}\": {reason}")]
    InvalidBaseUrl { url: String, reason: String },
}

/// A collector failure attributed to the platform it happened on.
#[derive(Debug, Error)]
#[error("collection from {platform} failed: {source}")]
pub struct CollectionError {
    pub platform: Platform,
    #[source]
    pub source: CollectorError,
}

impl CollectionError {
    #[must_use]
    pub fn new(platform: Platform, source: CollectorError) -> Self {
        Self { platform, source }
    }
}
