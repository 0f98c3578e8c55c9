use axum::{
    extract::{Query, State},
    Extension, Json,
};
use serde::Deserialize;
use viralwatch_core::RecordStore;

use super::{map_store_error, normalize_limit, ApiError, ApiResponse, AppState};
use crate::middleware::RequestId;

#[derive(Debug, Deserialize)]
pub(super) struct AlertsQuery {
    limit: Option<i64>,
}

/// Most recent recorded alerts, newest first.
pub(super) async fn list_alerts(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<AlertsQuery>,
) -> Result<Json<ApiResponse<Vec<viralwatch_core::Alert>>>, ApiError> {
    let limit = usize::try_from(normalize_limit(query.limit)).unwrap_or(50);
    let alerts = state
        .pipeline
        .store()
        .list_alerts(limit)
        .await
        .map_err(|e| map_store_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::ok(req_id.0, alerts))
}
