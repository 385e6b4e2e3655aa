use axum::{
    extract::{Query, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::middleware::RequestId;

use super::{map_db_error, normalize_limit, ApiError, ApiResponse, AppState, ResponseMeta};

#[derive(Debug, Deserialize)]
pub(super) struct RunsQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub(super) struct RunItem {
    run_id: Uuid,
    trigger_source: String,
    status: String,
    failed_stage: Option<String>,
    counts: serde_json::Value,
    error_message: Option<String>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<buzzmap_db::PipelineRunRow> for RunItem {
    fn from(row: buzzmap_db::PipelineRunRow) -> Self {
        Self {
            run_id: row.public_id,
            trigger_source: row.trigger_source,
            status: row.status,
            failed_stage: row.failed_stage,
            counts: row.counts,
            error_message: row.error_message,
            started_at: row.started_at,
            completed_at: row.completed_at,
            created_at: row.created_at,
        }
    }
}

pub(super) async fn list_runs(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<ApiResponse<Vec<RunItem>>>, ApiError> {
    let rows = buzzmap_db::list_pipeline_runs(&state.pool, normalize_limit(query.limit))
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse {
        data: rows.into_iter().map(RunItem::from).collect(),
        meta: ResponseMeta::new(req_id.0),
    }))
}
