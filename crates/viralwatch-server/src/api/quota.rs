use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::Serialize;
use viralwatch_access::{AccessBudget, AccessError};
use viralwatch_core::SourcePlatform;

use super::{ApiError, ApiResponse, AppState};
use crate::middleware::RequestId;

#[derive(Debug, Serialize)]
pub(super) struct QuotaData {
    source: SourcePlatform,
    /// Units grantable right now across every usable credential.
    remaining: u64,
    credentials: Vec<AccessBudget>,
}

pub(super) async fn get_quota(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(source): Path<String>,
) -> Result<Json<ApiResponse<QuotaData>>, ApiError> {
    let source: SourcePlatform = source.parse().map_err(|e: viralwatch_core::CoreError| {
        ApiError::new(req_id.0.clone(), "validation_error", e.to_string())
    })?;

    let coordinator = state.pipeline.coordinator();
    let result = coordinator
        .remaining_quota(source)
        .and_then(|remaining| coordinator.budgets(source).map(|budgets| (remaining, budgets)));
    match result {
        Ok((remaining, credentials)) => Ok(ApiResponse::ok(
            req_id.0,
            QuotaData {
                source,
                remaining,
                credentials,
            },
        )),
        Err(AccessError::UnknownSource(_)) => Err(ApiError::new(
            req_id.0,
            "not_found",
            format!("no budget registered for {source}"),
        )),
        Err(e) => {
            tracing::error!(source = %source, error = %e, "quota lookup failed");
            Err(ApiError::new(req_id.0, "internal_error", "quota lookup failed"))
        }
    }
}
