//! Caching, single-flight geocoder.
//!
//! Lookups are keyed by the normalized address. Resolved and definitively
//! unresolved outcomes are cached forever; transient failures are not, so the
//! next run tries again. At most one provider call is in flight per key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use buzzmap_core::{
    is_placeholder_address, normalize_address, CachedGeocode, Coordinates, ExtractedEntity,
    GeocodeCache, GeocodedRestaurant,
};

use crate::{GeocodeError, GeocodingProvider};

const MAX_DELAY_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeocoderSettings {
    /// Total provider attempts per lookup for transient failures.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
}

impl Default for GeocoderSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 1_000,
        }
    }
}

type KeyLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

pub struct Geocoder<P, C> {
    provider: P,
    cache: C,
    settings: GeocoderSettings,
    in_flight: KeyLocks,
}

impl<P: GeocodingProvider, C: GeocodeCache> Geocoder<P, C> {
    pub fn new(provider: P, cache: C, settings: GeocoderSettings) -> Self {
        Self {
            provider,
            cache,
            settings,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Resolve an extracted entity's address.
    ///
    /// Missing or placeholder addresses and addresses the provider cannot
    /// match come back as unresolved.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::Transient`] when the provider kept failing
    /// transiently for every attempt.
    pub async fn geocode(
        &self,
        entity: ExtractedEntity,
    ) -> Result<GeocodedRestaurant, GeocodeError> {
        let Some(address) = entity
            .raw_address
            .as_deref()
            .filter(|a| !is_placeholder_address(a))
            .map(str::to_owned)
        else {
            tracing::debug!(
                name = %entity.restaurant_name,
                "no usable address, marking unresolved"
            );
            return Ok(GeocodedRestaurant::unresolved(entity));
        };

        match self.resolve(&address).await? {
            Some(coordinates) => Ok(GeocodedRestaurant::resolved(entity, coordinates)),
            None => Ok(GeocodedRestaurant::unresolved(entity)),
        }
    }

    /// Coordinates for `address`, consulting the cache first.
    ///
    /// # Errors
    ///
    /// See [`Geocoder::geocode`].
    pub async fn resolve(&self, address: &str) -> Result<Option<Coordinates>, GeocodeError> {
        let key = normalize_address(address);
        if key.is_empty() {
            return Ok(None);
        }

        let lock = self.key_lock(&key);
        let result = {
            let _guard = lock.lock().await;
            self.resolve_locked(&key, address).await
        };
        self.release_key_lock(&key, &lock);
        result
    }

    async fn resolve_locked(
        &self,
        key: &str,
        address: &str,
    ) -> Result<Option<Coordinates>, GeocodeError> {
        match self.cache.get(key).await {
            Ok(Some(hit)) => {
                tracing::debug!(key, resolved = hit.coordinates.is_some(), "geocode cache hit");
                return Ok(hit.coordinates);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(key, error = %e, "geocode cache read failed, querying provider"),
        }

        let coordinates = match self.lookup_with_retry(address).await {
            Ok(coordinates) => coordinates,
            Err(GeocodeError::Unresolved { .. }) => None,
            Err(e) => return Err(e),
        };

        let entry = CachedGeocode {
            address: address.trim().to_owned(),
            coordinates,
        };
        if let Err(e) = self.cache.put(key, &entry).await {
            tracing::warn!(key, error = %e, "failed to write geocode cache entry");
        }
        if coordinates.is_none() {
            tracing::info!(address, provider = self.provider.name(), "address unresolved");
        }
        Ok(coordinates)
    }

    async fn lookup_with_retry(&self, address: &str) -> Result<Option<Coordinates>, GeocodeError> {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 1u32;
        loop {
            match self.provider.lookup(address).await {
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let computed = self
                        .settings
                        .backoff_base_ms
                        .saturating_mul(1u64 << (attempt - 1).min(10));
                    let capped = computed.min(MAX_DELAY_MS);
                    #[allow(
                        clippy::cast_possible_truncation,
                        clippy::cast_sign_loss,
                        clippy::cast_precision_loss
                    )]
                    let delay_ms = (capped as f64 * (rand::random::<f64>() * 0.5 + 0.75)) as u64;
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        delay_ms,
                        provider = self.provider.name(),
                        error = %err,
                        "geocode lookup failed, retrying after back-off"
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self
            .in_flight
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(map.entry(key.to_owned()).or_default())
    }

    /// Drop the key's lock entry once no other task holds a handle to it.
    fn release_key_lock(&self, key: &str, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut map = self
            .in_flight
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if Arc::strong_count(lock) <= 2 {
            map.remove(key);
        }
    }
}

#[cfg(test)]
#[path = "geocoder_test.rs"]
mod tests;
