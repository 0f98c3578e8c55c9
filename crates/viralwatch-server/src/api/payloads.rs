use axum::{
    extract::State,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use viralwatch_core::{RunStats, SourcePlatform};
use viralwatch_pipeline::{PipelineError, SubmitReport};

use super::{ApiError, ApiResponse, AppState};
use crate::middleware::RequestId;

const MAX_BATCH: usize = 500;

/// One payload under `payload`, or a batch under `payloads`.
#[derive(Debug, Deserialize)]
pub(super) struct SubmitRequest {
    platform: String,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    payloads: Vec<Value>,
    /// Grant the collector fetched the batch with, from
    /// `POST /api/v1/quota/{source}/grants`. Reported as a success once.
    #[serde(default)]
    grant_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub(super) struct SubmitBatch {
    platform: SourcePlatform,
    stats: RunStats,
    reports: Vec<SubmitReport>,
}

pub(super) async fn submit_payloads(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<ApiResponse<SubmitBatch>>, ApiError> {
    let platform: SourcePlatform = request
        .platform
        .parse()
        .map_err(|e: viralwatch_core::CoreError| {
            ApiError::new(req_id.0.clone(), "validation_error", e.to_string())
        })?;

    let mut payloads = request.payloads;
    payloads.extend(request.payload);
    if payloads.is_empty() {
        return Err(ApiError::new(
            req_id.0,
            "validation_error",
            "provide `payload` or a non-empty `payloads` array",
        ));
    }
    if payloads.len() > MAX_BATCH {
        return Err(ApiError::new(
            req_id.0,
            "validation_error",
            format!("at most {MAX_BATCH} payloads per request"),
        ));
    }

    let grant = match request.grant_id {
        None => None,
        Some(id) => {
            let grant = state
                .pipeline
                .coordinator()
                .outstanding_grant(id)
                .ok_or_else(|| {
                    ApiError::new(
                        req_id.0.clone(),
                        "not_found",
                        format!("no outstanding grant {id}"),
                    )
                })?;
            if grant.source != platform {
                return Err(ApiError::new(
                    req_id.0,
                    "validation_error",
                    format!("grant {id} was issued for {}", grant.source),
                ));
            }
            Some(grant)
        }
    };

    let mut stats = RunStats {
        collected: payloads.len() as u64,
        ..RunStats::default()
    };
    let mut reports = Vec::with_capacity(payloads.len());
    for (index, raw) in payloads.iter().enumerate() {
        let used = grant.as_ref().filter(|_| index == 0);
        let report = state
            .pipeline
            .submit_raw_payload(platform, raw, used)
            .await
            .map_err(|e| map_pipeline_error(req_id.0.clone(), &e))?;
        report.tally(&mut stats);
        reports.push(report);
    }

    Ok(ApiResponse::ok(
        req_id.0,
        SubmitBatch {
            platform,
            stats,
            reports,
        },
    ))
}

fn map_pipeline_error(request_id: String, error: &PipelineError) -> ApiError {
    tracing::error!(error = %error, "payload submission failed");
    ApiError::new(request_id, "internal_error", "payload submission failed")
}
