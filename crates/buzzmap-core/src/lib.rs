//! Domain types and shared contracts for the buzzmap pipeline.

pub mod app_config;
pub mod buzz;
pub mod config;
pub mod geo;
pub mod posts;
pub mod restaurants;
pub mod sources;
pub mod store;

pub use app_config::{AppConfig, Environment};
pub use buzz::{buzz_level, buzz_score, recency_decay, score_post, BuzzWeights};
pub use config::{load_app_config, load_app_config_from_env};
pub use geo::{haversine_km, rank_search_results, BoundingRegion, Coordinates, SearchHit};
pub use posts::{Platform, RawPost, ScoredPost};
pub use restaurants::{
    is_placeholder_address, merge_records, normalize_address, normalize_name,
    restaurant_identity, ExtractedEntity, GeocodeStatus, GeocodedRestaurant, PostRef,
    RestaurantRecord,
};
pub use sources::{load_sources, parse_sources, SourceConfig, SourcesFile};
pub use store::{CachedGeocode, DatasetStore, GeocodeCache, StoreError, UpsertOutcome};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read sources file {path}: {source}")]
    SourcesFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse sources file: {0}")]
    SourcesFileParse(#[from] serde_yaml::Error),

    #[error("sources validation error: {0}")]
    Validation(String),
}
