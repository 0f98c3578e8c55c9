use axum::{
    extract::{Query, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use viralwatch_pipeline::SurgeCycleReport;

use super::{ApiError, ApiResponse, AppState};
use crate::middleware::RequestId;

#[derive(Debug, Deserialize)]
pub(super) struct SurgeQuery {
    /// End of the evaluated window; defaults to now.
    at: Option<DateTime<Utc>>,
}

pub(super) async fn evaluate_surge(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<SurgeQuery>,
) -> Result<Json<ApiResponse<SurgeCycleReport>>, ApiError> {
    let now = Utc::now();
    let at = query.at.unwrap_or(now);
    if at > now {
        return Err(ApiError::new(
            req_id.0,
            "validation_error",
            "`at` must not be in the future",
        ));
    }
    let report = state.pipeline.run_surge_cycle(at).await;
    Ok(ApiResponse::ok(req_id.0, report))
}
