//! Replay of captured traffic from JSON Lines.
//!
//! Each line is `{"platform": ..., "payload": ..., "outcome": ...}`. A line
//! goes through the same acquire, report, submit sequence as a live lane, so
//! replays exercise the access budget as well as ingestion.

use std::io::BufRead;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use viralwatch_access::{Acquisition, Outcome};
use viralwatch_alert::Notifier;
use viralwatch_core::{RecordStore, RunStats, SourcePlatform};

use crate::error::PipelineError;
use crate::pipeline::Pipeline;

/// Recorded result of the source call that produced a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayOutcome {
    Success,
    RateLimited,
    Blocked,
    NetworkError,
    Cancelled,
}

impl From<ReplayOutcome> for Outcome {
    fn from(outcome: ReplayOutcome) -> Self {
        match outcome {
            ReplayOutcome::Success => Outcome::Success,
            ReplayOutcome::RateLimited => Outcome::RateLimited,
            ReplayOutcome::Blocked => Outcome::Blocked,
            ReplayOutcome::NetworkError => Outcome::NetworkError,
            ReplayOutcome::Cancelled => Outcome::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayLine {
    pub platform: SourcePlatform,
    #[serde(default)]
    pub payload: Value,
    /// Missing means the call succeeded.
    #[serde(default)]
    pub outcome: Option<ReplayOutcome>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplaySummary {
    pub lines: u64,
    #[serde(flatten)]
    pub stats: RunStats,
    /// Lines skipped because the budget had no room.
    pub quota_refused: u64,
    /// Lines whose recorded call failed; they carry no payload to ingest.
    pub failed_calls: u64,
    pub errors: Vec<String>,
}

impl<S: RecordStore, N: Notifier> Pipeline<S, N> {
    /// Push every line of `reader` through the pipeline.
    ///
    /// Unparseable lines are counted as rejected and listed in
    /// [`ReplaySummary::errors`]; they never stop the replay. Lines that find
    /// no budget are skipped without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Input`] when the reader fails and
    /// [`PipelineError::Access`] when a line names a platform with no
    /// registered budget.
    pub async fn replay_jsonl<R: BufRead>(
        &self,
        reader: R,
    ) -> Result<ReplaySummary, PipelineError> {
        let mut summary = ReplaySummary::default();

        for (index, line) in reader.lines().enumerate() {
            let number = index + 1;
            let line = line.map_err(|e| PipelineError::Input(format!("line {number}: {e}")))?;
            if line.trim().is_empty() {
                continue;
            }
            summary.lines += 1;

            let entry: ReplayLine = match serde_json::from_str(&line) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(line = number, error = %e, "unreadable replay line");
                    summary.stats.rejected += 1;
                    summary.errors.push(format!("line {number}: {e}"));
                    continue;
                }
            };

            let cost = self.request_cost(entry.platform);
            let grant = match self.coordinator().acquire(entry.platform, cost)? {
                Acquisition::Granted(grant) => grant,
                Acquisition::Wait {
                    retry_after,
                    reason,
                } => {
                    tracing::warn!(
                        line = number,
                        source = %entry.platform,
                        reason = %reason,
                        retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
                        "replay line refused by access budget"
                    );
                    summary.quota_refused += 1;
                    continue;
                }
            };
            summary.stats.quota_used += grant.cost;

            match entry.outcome.unwrap_or(ReplayOutcome::Success) {
                ReplayOutcome::Success => {
                    summary.stats.collected += 1;
                    let report = self
                        .submit_raw_payload(entry.platform, &entry.payload, Some(&grant))
                        .await?;
                    report.tally(&mut summary.stats);
                }
                failed => {
                    let action = self.coordinator().report_outcome(&grant, failed.into())?;
                    tracing::debug!(
                        line = number,
                        source = %entry.platform,
                        ?action,
                        "replayed failed call"
                    );
                    if failed == ReplayOutcome::Cancelled {
                        summary.stats.quota_used =
                            summary.stats.quota_used.saturating_sub(grant.cost);
                    }
                    summary.failed_calls += 1;
                }
            }
        }

        tracing::info!(
            lines = summary.lines,
            accepted = summary.stats.accepted,
            duplicates = summary.stats.duplicates,
            rejected = summary.stats.rejected,
            noise = summary.stats.noise,
            alerts = summary.stats.alerts,
            quota_refused = summary.quota_refused,
            failed_calls = summary.failed_calls,
            "replay finished"
        );
        Ok(summary)
    }
}
