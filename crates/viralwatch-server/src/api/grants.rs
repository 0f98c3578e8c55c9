use axum::{
    extract::{Path, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use viralwatch_access::{
    AccessCoordinator, AccessError, Acquisition, CredentialKind, Grant, Outcome, OutcomeAction,
};
use viralwatch_core::SourcePlatform;

use super::{ApiError, ApiResponse, AppState};
use crate::middleware::RequestId;

#[derive(Debug, Default, Deserialize)]
pub(super) struct AcquireRequest {
    /// Defaults to the source's per-request cost.
    #[serde(default)]
    cost: Option<u64>,
}

/// A grant as seen by remote collectors. The credential is identified by its
/// redacted label and registration index, never by its secret.
#[derive(Debug, Serialize)]
pub(super) struct GrantData {
    grant_id: Uuid,
    source: SourcePlatform,
    credential: String,
    credential_index: Option<usize>,
    credential_kind: CredentialKind,
    cost: u64,
    window_start: DateTime<Utc>,
    attempt: u32,
}

impl GrantData {
    fn new(coordinator: &AccessCoordinator, grant: &Grant) -> Self {
        Self {
            grant_id: grant.id,
            source: grant.source,
            credential: grant.credential.label(),
            credential_index: coordinator.credential_index(grant),
            credential_kind: grant.credential.kind,
            cost: grant.cost,
            window_start: grant.window_start,
            attempt: grant.attempt,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum OutcomeName {
    Success,
    RateLimited,
    Blocked,
    NetworkError,
    Cancelled,
}

impl From<OutcomeName> for Outcome {
    fn from(name: OutcomeName) -> Self {
        match name {
            OutcomeName::Success => Outcome::Success,
            OutcomeName::RateLimited => Outcome::RateLimited,
            OutcomeName::Blocked => Outcome::Blocked,
            OutcomeName::NetworkError => Outcome::NetworkError,
            OutcomeName::Cancelled => Outcome::Cancelled,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct OutcomeRequest {
    outcome: OutcomeName,
}

#[derive(Debug, Serialize)]
pub(super) struct OutcomeData {
    /// `done`, `reacquire`, `retry_with` or `retry_after`.
    action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    grant: Option<GrantData>,
}

fn millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn map_access_error(request_id: String, error: &AccessError) -> ApiError {
    match error {
        AccessError::UnknownSource(_) | AccessError::UnknownCredential { .. } => {
            ApiError::new(request_id, "not_found", error.to_string())
        }
        AccessError::CostExceedsCapacity { .. } => {
            ApiError::new(request_id, "validation_error", error.to_string())
        }
        AccessError::QuotaExhausted { .. } => {
            ApiError::new(request_id, "quota_exhausted", error.to_string())
        }
        AccessError::Blocked { .. } | AccessError::SourceUnavailable { .. } => {
            ApiError::new(request_id, "source_unavailable", error.to_string())
        }
    }
}

/// Reserve quota for a call an external collector is about to make.
pub(super) async fn acquire_grant(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(source): Path<String>,
    body: Option<Json<AcquireRequest>>,
) -> Result<Json<ApiResponse<GrantData>>, ApiError> {
    let source: SourcePlatform = source.parse().map_err(|e: viralwatch_core::CoreError| {
        ApiError::new(req_id.0.clone(), "validation_error", e.to_string())
    })?;
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let cost = request
        .cost
        .unwrap_or_else(|| state.pipeline.request_cost(source));

    let coordinator = state.pipeline.coordinator();
    match coordinator.acquire(source, cost) {
        Ok(Acquisition::Granted(grant)) => {
            tracing::info!(
                source = %source,
                credential = %grant.credential.label(),
                cost,
                "grant issued to remote collector"
            );
            Ok(ApiResponse::ok(req_id.0, GrantData::new(coordinator, &grant)))
        }
        Ok(Acquisition::Wait {
            retry_after,
            reason,
        }) => Err(ApiError::new(
            req_id.0,
            "quota_exhausted",
            format!("{reason}; retry after {} ms", millis(retry_after)),
        )),
        Err(e) => Err(map_access_error(req_id.0, &e)),
    }
}

/// Report how a call made with an outstanding grant went.
pub(super) async fn report_grant_outcome(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(grant_id): Path<Uuid>,
    Json(request): Json<OutcomeRequest>,
) -> Result<Json<ApiResponse<OutcomeData>>, ApiError> {
    let coordinator = state.pipeline.coordinator();
    let grant = coordinator.outstanding_grant(grant_id).ok_or_else(|| {
        ApiError::new(
            req_id.0.clone(),
            "not_found",
            format!("no outstanding grant {grant_id}"),
        )
    })?;

    let action = coordinator
        .report_outcome(&grant, request.outcome.into())
        .map_err(|e| map_access_error(req_id.0.clone(), &e))?;
    let data = match action {
        OutcomeAction::Done => OutcomeData {
            action: "done",
            retry_after_ms: None,
            grant: None,
        },
        OutcomeAction::Reacquire => OutcomeData {
            action: "reacquire",
            retry_after_ms: None,
            grant: None,
        },
        OutcomeAction::RetryWith(fresh) => OutcomeData {
            action: "retry_with",
            retry_after_ms: None,
            grant: Some(GrantData::new(coordinator, &fresh)),
        },
        OutcomeAction::RetryAfter(delay) => OutcomeData {
            action: "retry_after",
            retry_after_ms: Some(millis(delay)),
            grant: None,
        },
    };
    Ok(ApiResponse::ok(req_id.0, data))
}
