//! Database operations for `restaurants`.

use async_trait::async_trait;
use buzzmap_core::{
    merge_records, BoundingRegion, Coordinates, DatasetStore, GeocodeStatus, PostRef,
    RestaurantRecord, StoreError, UpsertOutcome,
};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};

use crate::DbError;

const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 3;

const SELECT_COLUMNS: &str = "id, identity, name, address, latitude, longitude, geocode_status, \
     buzz_score, post_refs, first_seen_at, last_seen_at, created_at, updated_at";

/// A row from the `restaurants` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RestaurantRow {
    pub id: i64,
    pub identity: String,
    pub name: String,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub geocode_status: String,
    pub buzz_score: f64,
    pub post_refs: Json<Vec<PostRef>>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RestaurantRow {
    /// Map the row back to a domain record.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidRow`] for an unknown status or coordinates
    /// outside the valid ranges.
    pub fn into_record(self) -> Result<RestaurantRecord, DbError> {
        let geocode_status =
            GeocodeStatus::parse(&self.geocode_status).ok_or_else(|| DbError::InvalidRow {
                table: "restaurants",
                column: "geocode_status",
                reason: format!("unknown status '{}'", self.geocode_status),
            })?;
        let coordinates = match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => {
                Some(Coordinates::new(lat, lon).ok_or_else(|| DbError::InvalidRow {
                    table: "restaurants",
                    column: "latitude",
                    reason: format!("({lat}, {lon}) out of range"),
                })?)
            }
            _ => None,
        };
        Ok(RestaurantRecord {
            identity: self.identity,
            name: self.name,
            address: self.address,
            coordinates,
            geocode_status,
            buzz_score: self.buzz_score,
            post_refs: self.post_refs.0,
            first_seen_at: self.first_seen_at,
            last_seen_at: self.last_seen_at,
        })
    }
}

/// Fetches a single restaurant by identity.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no row exists, or [`DbError::Sqlx`] if
/// the query fails.
pub async fn get_restaurant_by_identity(
    pool: &PgPool,
    identity: &str,
) -> Result<RestaurantRecord, DbError> {
    let row = sqlx::query_as::<_, RestaurantRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM restaurants WHERE identity = $1"
    ))
    .bind(identity)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    row.into_record()
}

/// Resolved restaurants whose coordinates fall inside the region's box.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails or [`DbError::InvalidRow`]
/// if a stored row cannot be decoded.
pub async fn list_restaurants_in_region(
    pool: &PgPool,
    region: &BoundingRegion,
) -> Result<Vec<RestaurantRecord>, DbError> {
    let rows = sqlx::query_as::<_, RestaurantRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM restaurants \
         WHERE geocode_status = 'resolved' \
           AND latitude BETWEEN $1 AND $2 \
           AND longitude BETWEEN $3 AND $4 \
         ORDER BY buzz_score DESC, id"
    ))
    .bind(region.min_lat)
    .bind(region.max_lat)
    .bind(region.min_lon)
    .bind(region.max_lon)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(RestaurantRow::into_record).collect()
}

/// Postgres-backed [`DatasetStore`].
///
/// Each upsert is one transaction: insert-if-absent, otherwise lock the row
/// with `SELECT ... FOR UPDATE`, merge in Rust and write back.
#[derive(Debug, Clone)]
pub struct PgDatasetStore {
    pool: PgPool,
    max_post_refs: usize,
    max_conflict_retries: u32,
}

impl PgDatasetStore {
    #[must_use]
    pub fn new(pool: PgPool, max_post_refs: usize) -> Self {
        Self {
            pool,
            max_post_refs,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn upsert_once(&self, record: &RestaurantRecord) -> Result<UpsertOutcome, DbError> {
        let mut tx = self.pool.begin().await?;

        // Self-merge dedups, orders and bounds the post refs.
        let fresh = merge_records(record, record, self.max_post_refs);
        let inserted = insert_if_absent(&mut tx, &fresh).await?;
        if inserted {
            tx.commit().await?;
            return Ok(UpsertOutcome::Inserted);
        }

        let prior = sqlx::query_as::<_, RestaurantRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM restaurants WHERE identity = $1 FOR UPDATE"
        ))
        .bind(&record.identity)
        .fetch_one(&mut *tx)
        .await?
        .into_record()?;

        let merged = merge_records(&prior, record, self.max_post_refs);
        update_merged(&mut tx, &merged).await?;
        tx.commit().await?;
        Ok(UpsertOutcome::Merged)
    }
}

async fn insert_if_absent(
    tx: &mut Transaction<'_, Postgres>,
    record: &RestaurantRecord,
) -> Result<bool, DbError> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO restaurants \
             (identity, name, address, latitude, longitude, geocode_status, buzz_score, \
              post_refs, first_seen_at, last_seen_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
         ON CONFLICT (identity) DO NOTHING \
         RETURNING id",
    )
    .bind(&record.identity)
    .bind(&record.name)
    .bind(record.address.as_deref())
    .bind(record.coordinates.map(|c| c.lat()))
    .bind(record.coordinates.map(|c| c.lon()))
    .bind(record.geocode_status.as_str())
    .bind(record.buzz_score)
    .bind(Json(&record.post_refs))
    .bind(record.first_seen_at)
    .bind(record.last_seen_at)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(id.is_some())
}

async fn update_merged(
    tx: &mut Transaction<'_, Postgres>,
    merged: &RestaurantRecord,
) -> Result<(), DbError> {
    sqlx::query(
        "UPDATE restaurants SET \
             address = $2, latitude = $3, longitude = $4, geocode_status = $5, \
             buzz_score = $6, post_refs = $7, first_seen_at = $8, last_seen_at = $9, \
             updated_at = NOW() \
         WHERE identity = $1",
    )
    .bind(&merged.identity)
    .bind(merged.address.as_deref())
    .bind(merged.coordinates.map(|c| c.lat()))
    .bind(merged.coordinates.map(|c| c.lon()))
    .bind(merged.geocode_status.as_str())
    .bind(merged.buzz_score)
    .bind(Json(&merged.post_refs))
    .bind(merged.first_seen_at)
    .bind(merged.last_seen_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Serialization failures and deadlocks can succeed on a fresh transaction.
fn is_retryable_conflict(err: &DbError) -> bool {
    match err {
        DbError::Sqlx(sqlx::Error::Database(db)) => {
            matches!(db.code().as_deref(), Some("40001" | "40P01"))
        }
        _ => false,
    }
}

#[async_trait]
impl DatasetStore for PgDatasetStore {
    async fn upsert(&self, record: &RestaurantRecord) -> Result<UpsertOutcome, StoreError> {
        let mut attempt = 0u32;
        loop {
            match self.upsert_once(record).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) if is_retryable_conflict(&err) => {
                    attempt += 1;
                    if attempt > self.max_conflict_retries {
                        tracing::error!(
                            identity = %record.identity,
                            attempts = attempt,
                            error = %err,
                            "giving up on conflicting upsert"
                        );
                        return Err(StoreError::Conflict {
                            identity: record.identity.clone(),
                        });
                    }
                    tracing::warn!(
                        identity = %record.identity,
                        attempt,
                        error = %err,
                        "upsert conflict, retrying"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn query(&self, region: &BoundingRegion) -> Result<Vec<RestaurantRecord>, StoreError> {
        Ok(list_restaurants_in_region(&self.pool, region).await?)
    }
}
