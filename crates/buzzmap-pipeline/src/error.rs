use buzzmap_extract::ExtractorError;
use buzzmap_geocode::GeocodeError;
use thiserror::Error;

/// Failures while assembling a pipeline from configuration.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("missing required credential: {var}")]
    MissingCredential { var: &'static str },

    #[error("invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },

    #[error("failed to build extractor: {0}")]
    Extractor(#[from] ExtractorError),

    #[error("failed to build geocoder: {0}")]
    Geocoder(#[from] GeocodeError),
}
