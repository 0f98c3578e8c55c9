//! Composite viral score of one entity's clean series.
//!
//! Three sub-signals are normalized to `[0, 1]` and combined with the
//! watchlist weights, which sum to [`SCORE_SCALE`]:
//!
//! - velocity: view gain per hour between the two latest points (rank places
//!   climbed per hour for marketplace listings), squashed as
//!   `v / (v + velocity_reference)`; negative velocity counts as zero
//! - engagement: `(likes + comments) / max(views, 1)` relative to
//!   `engagement_reference`, capped at 1
//! - relevance: share of priority keywords the latest point mentions

use std::collections::BTreeSet;

use viralwatch_core::{metric, CanonicalRecord, ScoreWeights, ViralScore, WatchConfig, SCORE_SCALE};

use crate::error::SignalError;

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreParams {
    pub weights: ScoreWeights,
    pub velocity_reference: f64,
    pub engagement_reference: f64,
    /// Lowercased priority keywords.
    pub priority_keywords: BTreeSet<String>,
}

impl ScoreParams {
    #[must_use]
    pub fn from_watchlist(config: &WatchConfig) -> Self {
        Self {
            weights: config.score_weights,
            velocity_reference: config.velocity_reference,
            engagement_reference: config.engagement_reference,
            priority_keywords: config.priority_set(),
        }
    }
}

/// Score the latest point of `series` (oldest first).
///
/// Deterministic: the same series and parameters always produce the same
/// score, and `computed_at` is the latest point's `observed_at`.
///
/// # Errors
///
/// Returns [`SignalError::InvalidSeries`] when the series is empty, mixes
/// entities, or has decreasing timestamps.
pub fn compute_viral_score(
    series: &[CanonicalRecord],
    params: &ScoreParams,
) -> Result<ViralScore, SignalError> {
    validate_series(series)?;
    let Some(latest) = series.last() else {
        return Err(SignalError::series("series is empty"));
    };
    let previous = series.len().checked_sub(2).map(|i| &series[i]);

    let velocity = previous.map_or(0.0, |prev| growth_velocity(prev, latest));
    let engagement_rate = engagement_rate(latest);
    let keyword_relevance = keyword_relevance(latest, &params.priority_keywords);

    let positive_velocity = velocity.max(0.0);
    let nv = if params.velocity_reference > 0.0 {
        positive_velocity / (positive_velocity + params.velocity_reference)
    } else {
        0.0
    };
    let ne = if params.engagement_reference > 0.0 {
        (engagement_rate / params.engagement_reference).min(1.0)
    } else {
        0.0
    };
    let w = &params.weights;
    let score = (w.velocity * nv + w.engagement * ne + w.relevance * keyword_relevance)
        .clamp(0.0, SCORE_SCALE);

    Ok(ViralScore {
        source_platform: latest.source_platform,
        natural_key: latest.natural_key.clone(),
        observed_at: latest.observed_at,
        score,
        velocity,
        engagement_rate,
        keyword_relevance,
        computed_at: latest.observed_at,
    })
}

fn validate_series(series: &[CanonicalRecord]) -> Result<(), SignalError> {
    let Some(first) = series.first() else {
        return Err(SignalError::series("series is empty"));
    };
    for pair in series.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if b.source_platform != first.source_platform || b.natural_key != first.natural_key {
            return Err(SignalError::series(format!(
                "series mixes entities {} and {}",
                first.entity_key(),
                b.entity_key()
            )));
        }
        if b.observed_at < a.observed_at {
            return Err(SignalError::series(format!(
                "timestamps decrease at {} ({} after {})",
                b.entity_key(),
                b.observed_at,
                a.observed_at
            )));
        }
    }
    Ok(())
}

/// Growth per hour between two points of one entity.
///
/// Views gained per hour for sources that report views. Marketplace listings
/// carry no views, so their growth is best-seller rank places climbed per
/// hour (rank 500 to rank 1 is +499).
#[allow(clippy::cast_precision_loss)]
fn growth_velocity(previous: &CanonicalRecord, latest: &CanonicalRecord) -> f64 {
    let elapsed_ms = (latest.observed_at - previous.observed_at).num_milliseconds();
    if elapsed_ms <= 0 {
        return 0.0;
    }
    let hours = elapsed_ms as f64 / MILLIS_PER_HOUR;
    let reports_views =
        latest.metric(metric::VIEWS).is_some() || previous.metric(metric::VIEWS).is_some();
    if !reports_views {
        if let (Some(before), Some(after)) =
            (previous.metric(metric::RANK), latest.metric(metric::RANK))
        {
            return (before - after) / hours;
        }
    }
    let gained = latest.metric_or_zero(metric::VIEWS) - previous.metric_or_zero(metric::VIEWS);
    gained / hours
}

fn engagement_rate(record: &CanonicalRecord) -> f64 {
    let interactions =
        record.metric_or_zero(metric::LIKES) + record.metric_or_zero(metric::COMMENTS);
    interactions.max(0.0) / record.metric_or_zero(metric::VIEWS).max(1.0)
}

#[allow(clippy::cast_precision_loss)]
pub(crate) fn keyword_relevance(record: &CanonicalRecord, priority: &BTreeSet<String>) -> f64 {
    if priority.is_empty() {
        return 0.0;
    }
    let hits = priority
        .iter()
        .filter(|k| record.detected_keywords.contains(*k))
        .count();
    (hits as f64 / priority.len() as f64).clamp(0.0, 1.0)
}

#[cfg(test)]
#[path = "score_test.rs"]
mod tests;
