use std::collections::HashMap;

use async_trait::async_trait;
use buzzmap_core::{CachedGeocode, GeocodeCache, StoreError};
use tokio::sync::RwLock;

/// Process-local geocode cache.
#[derive(Debug, Default)]
pub struct MemoryGeocodeCache {
    entries: RwLock<HashMap<String, CachedGeocode>>,
}

impl MemoryGeocodeCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl GeocodeCache for MemoryGeocodeCache {
    async fn get(&self, key: &str) -> Result<Option<CachedGeocode>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, entry: &CachedGeocode) -> Result<(), StoreError> {
        self.entries
            .write()
            .await
            .insert(key.to_owned(), entry.clone());
        Ok(())
    }
}
