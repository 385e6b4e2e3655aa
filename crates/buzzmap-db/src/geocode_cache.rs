//! Database operations for `geocode_cache`.

use async_trait::async_trait;
use buzzmap_core::{CachedGeocode, Coordinates, GeocodeCache, StoreError};
use sqlx::PgPool;

use crate::DbError;

#[derive(Debug, Clone, sqlx::FromRow)]
struct GeocodeCacheRow {
    address: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

/// Postgres-backed [`GeocodeCache`]; entries persist across runs.
#[derive(Debug, Clone)]
pub struct PgGeocodeCache {
    pool: PgPool,
}

impl PgGeocodeCache {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, key: &str) -> Result<Option<CachedGeocode>, DbError> {
        let row = sqlx::query_as::<_, GeocodeCacheRow>(
            "SELECT address, latitude, longitude FROM geocode_cache WHERE address_key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<CachedGeocode, DbError> {
            let coordinates = match (row.latitude, row.longitude) {
                (Some(lat), Some(lon)) => {
                    Some(
                        Coordinates::new(lat, lon).ok_or_else(|| DbError::InvalidRow {
                            table: "geocode_cache",
                            column: "latitude",
                            reason: format!("({lat}, {lon}) out of range"),
                        })?,
                    )
                }
                _ => None,
            };
            Ok(CachedGeocode {
                address: row.address,
                coordinates,
            })
        })
        .transpose()
    }

    async fn store(&self, key: &str, entry: &CachedGeocode) -> Result<(), DbError> {
        // First writer wins; an address key's outcome never changes.
        sqlx::query(
            "INSERT INTO geocode_cache (address_key, address, latitude, longitude) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (address_key) DO NOTHING",
        )
        .bind(key)
        .bind(&entry.address)
        .bind(entry.coordinates.map(|c| c.lat()))
        .bind(entry.coordinates.map(|c| c.lon()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl GeocodeCache for PgGeocodeCache {
    async fn get(&self, key: &str) -> Result<Option<CachedGeocode>, StoreError> {
        Ok(self.fetch(key).await?)
    }

    async fn put(&self, key: &str, entry: &CachedGeocode) -> Result<(), StoreError> {
        Ok(self.store(key, entry).await?)
    }
}
