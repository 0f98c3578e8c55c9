use chrono::{DateTime, Utc};
use thiserror::Error;
use viralwatch_core::{EntityKey, SourcePlatform};

/// Why a raw payload could not become a canonical record. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejected {
    /// The payload lacks a natural key or every essential metric.
    #[error("incomplete {platform} payload: {reason}")]
    Incomplete {
        platform: SourcePlatform,
        reason: String,
    },

    /// The payload is not a JSON object or has an unusable field type.
    #[error("malformed {platform} payload: {reason}")]
    Malformed {
        platform: SourcePlatform,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    /// The observation predates the entity's latest stored point.
    #[error("stale observation for {key}: {observed_at} is older than {latest}")]
    StaleObservation {
        key: EntityKey,
        observed_at: DateTime<Utc>,
        latest: DateTime<Utc>,
    },
}
