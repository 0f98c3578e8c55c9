use axum::{
    extract::{Query, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::middleware::RequestId;

use super::{map_db_error, normalize_limit, ApiError, ApiResponse, AppState};

#[derive(Debug, Deserialize)]
pub(super) struct CollectionRunsQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub(super) struct CollectionRunItem {
    collection_run_id: Uuid,
    run_type: String,
    trigger_source: String,
    source_platform: Option<String>,
    status: String,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    collected: i64,
    accepted: i64,
    duplicates: i64,
    rejected: i64,
    noise: i64,
    alerts: i64,
    quota_used: i64,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<viralwatch_db::CollectionRunRow> for CollectionRunItem {
    fn from(row: viralwatch_db::CollectionRunRow) -> Self {
        Self {
            collection_run_id: row.public_id,
            run_type: row.run_type,
            trigger_source: row.trigger_source,
            source_platform: row.source_platform,
            status: row.status,
            started_at: row.started_at,
            completed_at: row.completed_at,
            collected: row.collected,
            accepted: row.accepted,
            duplicates: row.duplicates,
            rejected: row.rejected,
            noise: row.noise,
            alerts: row.alerts,
            quota_used: row.quota_used,
            error_message: row.error_message,
            created_at: row.created_at,
        }
    }
}

/// Recent collection runs. Empty when the service runs without a database.
pub(super) async fn list_collection_runs(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<CollectionRunsQuery>,
) -> Result<Json<ApiResponse<Vec<CollectionRunItem>>>, ApiError> {
    let Some(pool) = state.pipeline.store().pool() else {
        return Ok(ApiResponse::ok(req_id.0, Vec::new()));
    };
    let rows = viralwatch_db::list_collection_runs(pool, normalize_limit(query.limit))
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    let data = rows.into_iter().map(CollectionRunItem::from).collect();
    Ok(ApiResponse::ok(req_id.0, data))
}
