use std::time::Duration;

use chrono::TimeDelta;
use viralwatch_core::{SourceConfig, WatchConfig};

/// Coordinator-wide access rules.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessPolicy {
    /// Fraction of each credential's capacity that may be spent per window.
    pub safety_margin: f64,
    /// Longest wait a blocked call may be asked to absorb.
    pub proxy_retry_budget: Duration,
    pub block_cooldown: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub max_network_attempts: u32,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            safety_margin: 0.95,
            proxy_retry_budget: Duration::from_millis(5_000),
            block_cooldown: Duration::from_secs(300),
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(30),
            max_network_attempts: 3,
        }
    }
}

impl AccessPolicy {
    #[must_use]
    pub fn from_watchlist(config: &WatchConfig) -> Self {
        Self {
            safety_margin: config.quota_safety_margin,
            proxy_retry_budget: Duration::from_millis(config.proxy_retry_budget_ms),
            block_cooldown: Duration::from_secs(config.block_cooldown_secs),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_cap: Duration::from_millis(config.backoff_cap_ms),
            max_network_attempts: config.max_network_attempts,
        }
    }

    /// `floor(capacity × safety_margin)`.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn effective_capacity(&self, capacity: u64) -> u64 {
        (capacity as f64 * self.safety_margin).floor() as u64
    }
}

/// Per-credential budget of one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePolicy {
    pub capacity: u64,
    pub reset_window: Duration,
}

impl From<&SourceConfig> for SourcePolicy {
    fn from(config: &SourceConfig) -> Self {
        Self {
            capacity: config.capacity,
            reset_window: Duration::from_secs(config.reset_window_secs),
        }
    }
}

/// Convert a std duration to a chrono delta, saturating on overflow.
pub(crate) fn to_delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX)
}

/// Convert a chrono delta to a std duration; negative deltas become zero.
pub(crate) fn to_std(d: TimeDelta) -> Duration {
    d.to_std().unwrap_or(Duration::ZERO)
}
