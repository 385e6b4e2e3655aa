//! Database operations for `pipeline_runs`.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

const SELECT_COLUMNS: &str = "id, public_id, trigger_source, status, failed_stage, counts, \
     error_message, started_at, completed_at, created_at";

/// A row from the `pipeline_runs` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PipelineRunRow {
    pub id: i64,
    pub public_id: Uuid,
    pub trigger_source: String,
    pub status: String,
    pub failed_stage: Option<String>,
    /// Per-stage item counts, e.g. `{"collected": 80, "extracted": 12}`.
    pub counts: serde_json::Value,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Creates a new pipeline run in `queued` status.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn create_pipeline_run(
    pool: &PgPool,
    trigger_source: &str,
) -> Result<PipelineRunRow, DbError> {
    let row = sqlx::query_as::<_, PipelineRunRow>(&format!(
        "INSERT INTO pipeline_runs (public_id, trigger_source, status) \
         VALUES ($1, $2, 'queued') \
         RETURNING {SELECT_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(trigger_source)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Marks a run as `running` and sets `started_at = NOW()`.
///
/// # Errors
///
/// Returns [`DbError::InvalidRunTransition`] if the run is not `queued`, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn start_pipeline_run(pool: &PgPool, id: i64) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE pipeline_runs \
         SET status = 'running', started_at = NOW() \
         WHERE id = $1 AND status = 'queued'",
    )
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidRunTransition {
            id,
            expected_status: "queued",
        });
    }
    Ok(())
}

/// Marks a run as `succeeded` with its final counts.
///
/// # Errors
///
/// Returns [`DbError::InvalidRunTransition`] if the run is not `running`, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn complete_pipeline_run(
    pool: &PgPool,
    id: i64,
    counts: &serde_json::Value,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE pipeline_runs \
         SET status = 'succeeded', completed_at = NOW(), counts = $1 \
         WHERE id = $2 AND status = 'running'",
    )
    .bind(counts)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidRunTransition {
            id,
            expected_status: "running",
        });
    }
    Ok(())
}

/// Marks a run as `failed`, recording the stage that could not proceed and
/// the counts reached so far.
///
/// # Errors
///
/// Returns [`DbError::InvalidRunTransition`] if the run is not `running`, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn fail_pipeline_run(
    pool: &PgPool,
    id: i64,
    failed_stage: &str,
    error_message: &str,
    counts: &serde_json::Value,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE pipeline_runs \
         SET status = 'failed', completed_at = NOW(), failed_stage = $1, \
             error_message = $2, counts = $3 \
         WHERE id = $4 AND status = 'running'",
    )
    .bind(failed_stage)
    .bind(error_message)
    .bind(counts)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidRunTransition {
            id,
            expected_status: "running",
        });
    }
    Ok(())
}

/// Fetches a single run by its internal `id`.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no row exists with the given `id`, or
/// [`DbError::Sqlx`] if the query fails.
pub async fn get_pipeline_run(pool: &PgPool, id: i64) -> Result<PipelineRunRow, DbError> {
    sqlx::query_as::<_, PipelineRunRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM pipeline_runs WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Returns the most recent `limit` runs, newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_pipeline_runs(pool: &PgPool, limit: i64) -> Result<Vec<PipelineRunRow>, DbError> {
    let rows = sqlx::query_as::<_, PipelineRunRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM pipeline_runs \
         ORDER BY created_at DESC, id DESC \
         LIMIT $1"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
