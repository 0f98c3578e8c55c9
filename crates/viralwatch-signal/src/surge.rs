//! Cross-platform surge correlation over a bounded window of velocity samples.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, TimeDelta, Utc};
use viralwatch_core::{SourcePlatform, SurgeEvent, VelocitySample, WatchConfig};

#[derive(Debug, Clone, PartialEq)]
pub struct SurgeParams {
    pub window: TimeDelta,
    /// Within `(0, 1]`.
    pub threshold_percentile: f64,
    pub min_velocity: f64,
    pub min_entities: usize,
}

impl SurgeParams {
    #[must_use]
    pub fn from_watchlist(config: &WatchConfig) -> Self {
        Self {
            window: TimeDelta::seconds(i64::try_from(config.surge_window_secs).unwrap_or(i64::MAX)),
            threshold_percentile: config.surge_threshold_percentile,
            min_velocity: config.surge_min_velocity,
            min_entities: config.surge_min_entities.max(1),
        }
    }
}

/// Linearly interpolated percentile of `values`; `None` when empty.
///
/// `p` is clamped to `[0, 1]`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let rank = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - rank.floor();
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

/// Detect a surge of `term` within `[window_start, window_end]`.
///
/// Per platform, the threshold is the configured percentile of every sample
/// velocity of that platform in the window, floored at `min_velocity`. A
/// platform qualifies when at least `min_entities` samples mentioning the
/// term reach the threshold. A surge needs two or more qualifying platforms.
///
/// Severity is the number of qualifying platforms plus the mean, over those
/// platforms, of the best sample's excess ratio over the threshold capped at
/// 1, so it grows with both breadth and intensity.
#[must_use]
pub fn detect_surge(
    term: &str,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    samples: &[VelocitySample],
    params: &SurgeParams,
) -> Option<SurgeEvent> {
    let term = term.trim().to_lowercase();
    let mut by_platform: BTreeMap<SourcePlatform, Vec<&VelocitySample>> = BTreeMap::new();
    for sample in samples {
        if sample.observed_at >= window_start && sample.observed_at <= window_end {
            by_platform.entry(sample.platform).or_default().push(sample);
        }
    }

    let mut qualifying: BTreeMap<SourcePlatform, f64> = BTreeMap::new();
    for (platform, platform_samples) in &by_platform {
        let velocities: Vec<f64> = platform_samples.iter().map(|s| s.velocity).collect();
        let Some(p) = percentile(&velocities, params.threshold_percentile) else {
            continue;
        };
        let threshold = p.max(params.min_velocity);

        let hits: Vec<f64> = platform_samples
            .iter()
            .filter(|s| s.terms.contains(&term) && s.velocity >= threshold)
            .map(|s| s.velocity)
            .collect();
        if hits.len() < params.min_entities {
            continue;
        }
        let best = hits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let excess = if threshold > 0.0 {
            ((best - threshold) / threshold).clamp(0.0, 1.0)
        } else {
            1.0
        };
        qualifying.insert(*platform, excess);
    }

    if qualifying.len() < 2 {
        return None;
    }

    #[allow(clippy::cast_precision_loss)]
    let count = qualifying.len() as f64;
    let mean_excess = qualifying.values().sum::<f64>() / count;
    tracing::debug!(
        term = %term,
        platforms = qualifying.len(),
        severity = count + mean_excess,
        "surge detected"
    );

    Some(SurgeEvent {
        brand_or_keyword: term,
        platforms_involved: qualifying.keys().copied().collect::<BTreeSet<_>>(),
        window_start,
        window_end,
        severity: count + mean_excess,
    })
}
