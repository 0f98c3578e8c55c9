//! Caller-side scheduling around the coordinator.
//!
//! [`run_guarded`] acquires a grant, sleeps on wait hints, runs the
//! operation, reports the classified outcome, and follows the coordinator's
//! retry and rotation instructions.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use viralwatch_core::SourcePlatform;

use crate::coordinator::{AccessCoordinator, Acquisition, Grant, Outcome, OutcomeAction};
use crate::AccessError;

/// Maps an operation failure to the access outcome it implies.
///
/// Failures unrelated to access (bad payloads, 404s) should report
/// [`Outcome::Success`]: the credential worked, the data did not.
pub trait ClassifyOutcome {
    fn outcome(&self) -> Outcome;
}

#[derive(Debug, Error)]
pub enum LaneError<E>
where
    E: std::error::Error + 'static,
{
    #[error(transparent)]
    Access(#[from] AccessError),

    #[error("guarded operation failed: {0}")]
    Operation(#[source] E),
}

/// Reports `Cancelled` for a grant whose lane was dropped mid-call.
struct GrantGuard<'a> {
    coordinator: &'a AccessCoordinator,
    grant: Option<Grant>,
}

impl GrantGuard<'_> {
    fn disarm(&mut self) {
        self.grant = None;
    }
}

impl Drop for GrantGuard<'_> {
    fn drop(&mut self) {
        if let Some(grant) = self.grant.take() {
            if let Err(e) = self.coordinator.report_outcome(&grant, Outcome::Cancelled) {
                tracing::warn!(
                    source = %grant.source,
                    error = %e,
                    "failed to refund cancelled grant"
                );
            }
        }
    }
}

/// Run `operation` under the coordinator's budget for `source`.
///
/// The total time spent sleeping on quota wait hints never exceeds
/// `max_wait`; back-off sleeps after network errors and blocked calls are
/// bounded by the coordinator's policy.
///
/// # Errors
///
/// - [`LaneError::Access`] with [`AccessError::QuotaExhausted`] when budget
///   will not free up within `max_wait`, or any other coordinator error.
/// - [`LaneError::Operation`] when the operation fails for a reason the
///   coordinator does not retry.
pub async fn run_guarded<T, E, F, Fut>(
    coordinator: &AccessCoordinator,
    source: SourcePlatform,
    cost: u64,
    max_wait: Duration,
    mut operation: F,
) -> Result<T, LaneError<E>>
where
    F: FnMut(Grant) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + ClassifyOutcome + 'static,
{
    let mut waited = Duration::ZERO;
    let mut previous: Option<Grant> = None;
    let mut next = coordinator.acquire(source, cost)?;

    loop {
        let grant = match next {
            Acquisition::Granted(grant) => grant,
            Acquisition::Wait {
                retry_after,
                reason,
            } => {
                if waited + retry_after > max_wait {
                    return Err(LaneError::Access(AccessError::QuotaExhausted {
                        platform: source,
                        retry_after_ms: u64::try_from(retry_after.as_millis())
                            .unwrap_or(u64::MAX),
                    }));
                }
                tracing::warn!(
                    source = %source,
                    reason = %reason,
                    retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
                    "waiting for access budget"
                );
                tokio::time::sleep(retry_after).await;
                waited += retry_after;
                next = match &previous {
                    Some(prev) => coordinator.retry(prev)?,
                    None => coordinator.acquire(source, cost)?,
                };
                continue;
            }
        };

        let mut guard = GrantGuard {
            coordinator,
            grant: Some(grant.clone()),
        };
        let result = operation(grant.clone()).await;
        guard.disarm();

        let error = match result {
            Ok(value) => {
                coordinator.report_outcome(&grant, Outcome::Success)?;
                return Ok(value);
            }
            Err(error) => error,
        };

        let outcome = error.outcome();
        let action = coordinator.report_outcome(&grant, outcome)?;
        let chain = if outcome == Outcome::NetworkError {
            grant.with_network_failure()
        } else {
            grant
        };
        match action {
            OutcomeAction::Done => return Err(LaneError::Operation(error)),
            OutcomeAction::Reacquire => {
                next = coordinator.retry(&chain)?;
            }
            OutcomeAction::RetryWith(fresh) => {
                next = Acquisition::Granted(fresh);
            }
            OutcomeAction::RetryAfter(delay) => {
                tracing::debug!(
                    source = %source,
                    attempt = chain.attempt,
                    network_failures = chain.network_failures,
                    error = %error,
                    "retrying guarded call after back-off"
                );
                tokio::time::sleep(delay).await;
                next = coordinator.retry(&chain)?;
            }
        }
        previous = Some(chain);
    }
}

#[cfg(test)]
#[path = "lane_test.rs"]
mod tests;
