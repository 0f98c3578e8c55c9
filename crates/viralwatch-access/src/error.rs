use thiserror::Error;
use viralwatch_core::SourcePlatform;

/// Errors returned by the access coordinator and the guarded call lane.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("no budget registered for source {0}")]
    UnknownSource(SourcePlatform),

    /// The request can never fit into a single reset window.
    #[error("cost {cost} exceeds the largest effective capacity ({max_capacity}) of {platform}")]
    CostExceedsCapacity {
        platform: SourcePlatform,
        cost: u64,
        max_capacity: u64,
    },

    /// Budget will not free up inside the caller's wait allowance.
    #[error("quota exhausted for {platform}; next budget in {retry_after_ms} ms")]
    QuotaExhausted {
        platform: SourcePlatform,
        retry_after_ms: u64,
    },

    /// Every credential is blocked and none recovers inside the retry budget.
    #[error("all credentials for {platform} are blocked")]
    Blocked { platform: SourcePlatform },

    #[error("{platform} unavailable after {attempts} network attempts")]
    SourceUnavailable {
        platform: SourcePlatform,
        attempts: u32,
    },

    #[error("credential {credential} is not registered for {platform}")]
    UnknownCredential {
        platform: SourcePlatform,
        credential: String,
    },
}
