//! Edge-triggered alert evaluation.
//!
//! Alert ids are the hex SHA-256 of `subject|threshold_id|epoch`. The epoch
//! comes from the data (the crossing observation, the bucketed surge window,
//! or the price observation), never from the wall clock, so replays and
//! restarts reproduce the same ids.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::json;
use sha2::{Digest, Sha256};
use viralwatch_core::{
    Alert, AlertKind, AlertSeverity, ArbitrageSignal, EntityKey, SurgeEvent, ViralScore,
    WatchConfig,
};

use crate::notifier::{DeliveryReport, Notifier};

/// Deterministic alert id.
#[must_use]
pub fn alert_id(subject: &str, threshold_id: &str, epoch: i64) -> String {
    let input = format!("{subject}|{threshold_id}|{epoch}");
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

#[derive(Debug)]
pub enum Dispatch {
    Delivered { alert: Alert, report: DeliveryReport },
    /// The id was already dispatched.
    Suppressed,
}

#[derive(Debug, Clone, Copy)]
struct LastEvaluation {
    observed_at: DateTime<Utc>,
    score: f64,
}

/// Dispatched ids remembered in memory; older ids rely on the store's
/// alert log to stay suppressed.
pub const DISPATCHED_CAPACITY: usize = 10_000;

/// Insertion-ordered id set that forgets its oldest ids past `capacity`.
#[derive(Debug)]
struct DispatchedIds {
    capacity: usize,
    ids: HashSet<String>,
    order: VecDeque<String>,
}

impl DispatchedIds {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ids: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    fn insert(&mut self, id: String) -> bool {
        if !self.ids.insert(id.clone()) {
            return false;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

#[derive(Debug)]
struct EvaluatorState {
    last: HashMap<EntityKey, LastEvaluation>,
    dispatched: DispatchedIds,
}

#[derive(Debug)]
pub struct AlertEvaluator {
    score_threshold: f64,
    surge_window: TimeDelta,
    arbitrage_min_margin: f64,
    state: Mutex<EvaluatorState>,
}

impl AlertEvaluator {
    #[must_use]
    pub fn new(score_threshold: f64, surge_window: TimeDelta, arbitrage_min_margin: f64) -> Self {
        Self::with_dispatch_capacity(
            score_threshold,
            surge_window,
            arbitrage_min_margin,
            DISPATCHED_CAPACITY,
        )
    }

    #[must_use]
    pub fn with_dispatch_capacity(
        score_threshold: f64,
        surge_window: TimeDelta,
        arbitrage_min_margin: f64,
        dispatch_capacity: usize,
    ) -> Self {
        Self {
            score_threshold,
            surge_window,
            arbitrage_min_margin,
            state: Mutex::new(EvaluatorState {
                last: HashMap::new(),
                dispatched: DispatchedIds::new(dispatch_capacity),
            }),
        }
    }

    #[must_use]
    pub fn from_watchlist(config: &WatchConfig) -> Self {
        Self::new(
            config.alert_score_threshold,
            TimeDelta::seconds(i64::try_from(config.surge_window_secs).unwrap_or(i64::MAX)),
            config.arbitrage_min_margin,
        )
    }

    fn lock(&self) -> MutexGuard<'_, EvaluatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fire when `score` reaches the threshold and the entity's previous
    /// evaluated score was below it. Scores not newer than the last evaluated
    /// one for the entity are ignored.
    #[must_use]
    pub fn evaluate(&self, score: &ViralScore) -> Option<Alert> {
        let key = score.entity_key();
        let mut state = self.lock();

        let previous = state.last.get(&key).copied();
        if previous.is_some_and(|p| score.observed_at <= p.observed_at) {
            tracing::debug!(
                entity = %key,
                observed_at = %score.observed_at,
                "ignoring replayed score"
            );
            return None;
        }
        state.last.insert(
            key.clone(),
            LastEvaluation {
                observed_at: score.observed_at,
                score: score.score,
            },
        );

        let was_below = previous.is_none_or(|p| p.score < self.score_threshold);
        if score.score < self.score_threshold || !was_below {
            return None;
        }

        let subject = key.to_string();
        let id = alert_id(
            &subject,
            &format!("score>={:.2}", self.score_threshold),
            score.observed_at.timestamp(),
        );
        if state.dispatched.contains(&id) {
            return None;
        }

        Some(Alert {
            alert_id: id,
            kind: AlertKind::ViralScore,
            severity: AlertSeverity::Warning,
            subject,
            payload: json!({
                "platform": score.source_platform,
                "natural_key": score.natural_key,
                "score": score.score,
                "threshold": self.score_threshold,
                "velocity": score.velocity,
                "engagement_rate": score.engagement_rate,
                "keyword_relevance": score.keyword_relevance,
                "observed_at": score.observed_at,
            }),
            sent_at: None,
        })
    }

    /// Remember `score` as the entity's last evaluation without firing.
    ///
    /// Used for scores rebuilt from persisted history, so the trigger resumes
    /// armed or disarmed as it was before a restart. Older scores are ignored.
    pub fn prime(&self, score: &ViralScore) {
        let mut state = self.lock();
        let key = score.entity_key();
        if state
            .last
            .get(&key)
            .is_some_and(|p| score.observed_at <= p.observed_at)
        {
            return;
        }
        state.last.insert(
            key,
            LastEvaluation {
                observed_at: score.observed_at,
                score: score.score,
            },
        );
    }

    /// Drop the last evaluation of every entity last scored before `cutoff`.
    /// Returns how many were dropped.
    pub fn forget_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut state = self.lock();
        let before = state.last.len();
        state.last.retain(|_, last| last.observed_at >= cutoff);
        before - state.last.len()
    }

    #[must_use]
    pub fn tracked_entities(&self) -> usize {
        self.lock().last.len()
    }

    #[must_use]
    pub fn dispatched_len(&self) -> usize {
        self.lock().dispatched.len()
    }

    /// Surge alerts are always critical. The epoch is the window end rounded
    /// down to a multiple of the surge window, so overlapping evaluations of
    /// the same window share an id.
    #[must_use]
    pub fn evaluate_surge(&self, surge: &SurgeEvent) -> Alert {
        let window_secs = self.surge_window.num_seconds().max(1);
        let epoch = surge.window_end.timestamp().div_euclid(window_secs) * window_secs;
        let subject = format!("surge:{}", surge.brand_or_keyword);
        Alert {
            alert_id: alert_id(&subject, &format!("surge/{window_secs}s"), epoch),
            kind: AlertKind::Surge,
            severity: AlertSeverity::Critical,
            subject,
            payload: json!({
                "term": surge.brand_or_keyword,
                "platforms": surge.platforms_involved,
                "window_start": surge.window_start,
                "window_end": surge.window_end,
                "severity": surge.severity,
            }),
            sent_at: None,
        }
    }

    #[must_use]
    pub fn evaluate_arbitrage(&self, signal: &ArbitrageSignal) -> Alert {
        let subject = format!("arbitrage:{}", signal.natural_key);
        let threshold_id = format!(
            "{}>{:.2}",
            signal.reference_source, self.arbitrage_min_margin
        );
        Alert {
            alert_id: alert_id(&subject, &threshold_id, signal.observed_at.timestamp()),
            kind: AlertKind::Arbitrage,
            severity: AlertSeverity::Warning,
            subject,
            payload: json!({
                "natural_key": signal.natural_key,
                "observed_price": signal.observed_price,
                "reference_price": signal.reference_price,
                "reference_source": signal.reference_source,
                "relative_margin": signal.relative_margin,
                "direction": signal.direction,
                "observed_at": signal.observed_at,
            }),
            sent_at: None,
        }
    }

    /// True when the id has been handed to a notifier by this evaluator.
    #[must_use]
    pub fn is_dispatched(&self, alert_id: &str) -> bool {
        self.lock().dispatched.contains(alert_id)
    }

    /// Mark the id dispatched, then hand the alert to `notifier` once.
    /// `sent_at` is stamped unless the caller already set it.
    ///
    /// Channel failures are logged and reported; nothing is retried.
    pub async fn dispatch<N: Notifier>(&self, mut alert: Alert, notifier: &N) -> Dispatch {
        if !self.lock().dispatched.insert(alert.alert_id.clone()) {
            tracing::debug!(alert_id = %alert.alert_id, "duplicate alert suppressed");
            return Dispatch::Suppressed;
        }
        alert.sent_at.get_or_insert_with(Utc::now);

        let report = notifier.deliver(&alert).await;
        for failure in report.failures() {
            tracing::warn!(
                alert_id = %alert.alert_id,
                channel = %failure.channel,
                error = failure.error.as_deref().unwrap_or("unknown"),
                "alert delivery failed"
            );
        }
        Dispatch::Delivered { alert, report }
    }
}

#[cfg(test)]
#[path = "evaluator_test.rs"]
mod tests;
