use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geo::{BoundingRegion, Coordinates};
use crate::restaurants::RestaurantRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A serialized merge for `identity` could not be obtained.
    #[error("conflicting concurrent upsert for restaurant {identity}")]
    Conflict { identity: String },

    #[error("dataset store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Merged,
}

/// Durable keyed storage for restaurant records.
///
/// Implementations must serialize concurrent upserts of the same identity and
/// make `upsert` idempotent under retry.
#[async_trait]
pub trait DatasetStore: Send + Sync {
    async fn upsert(&self, record: &RestaurantRecord) -> Result<UpsertOutcome, StoreError>;

    /// Records whose coordinates fall inside the region's lat/lon box.
    /// Records without coordinates are never returned. Exact radius
    /// filtering and ordering happen in the caller.
    async fn query(&self, region: &BoundingRegion) -> Result<Vec<RestaurantRecord>, StoreError>;
}

/// A memoized geocoding outcome. `coordinates == None` marks an address the
/// provider could not resolve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedGeocode {
    pub address: String,
    pub coordinates: Option<Coordinates>,
}

/// Keyed by normalized address. Entries never expire.
#[async_trait]
pub trait GeocodeCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CachedGeocode>, StoreError>;

    async fn put(&self, key: &str, entry: &CachedGeocode) -> Result<(), StoreError>;
}

#[async_trait]
impl<T: DatasetStore + ?Sized> DatasetStore for Arc<T> {
    async fn upsert(&self, record: &RestaurantRecord) -> Result<UpsertOutcome, StoreError> {
        (**self).upsert(record).await
    }

    async fn query(&self, region: &BoundingRegion) -> Result<Vec<RestaurantRecord>, StoreError> {
        (**self).query(region).await
    }
}

#[async_trait]
impl<T: GeocodeCache + ?Sized> GeocodeCache for Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<CachedGeocode>, StoreError> {
        (**self).get(key).await
    }

    async fn put(&self, key: &str, entry: &CachedGeocode) -> Result<(), StoreError> {
        (**self).put(key, entry).await
    }
}
