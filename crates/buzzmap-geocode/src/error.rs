use thiserror::Error;

#[derive(Debug, Error)]
pub enum GeocodeError {
    /// The provider answered definitively that the address has no match.
    #[error("address could not be resolved: {address}")]
    Unresolved { address: String },

    /// Timeout, 429 or 5xx. Never cached.
    #[error("transient geocoding failure for {address}: {reason}")]
    Transient { address: String, reason: String },

    #[error("invalid geocoder base URL \"{url}\": {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("failed to build geocoder HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

impl GeocodeError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, GeocodeError::Transient { .. })
    }
}
