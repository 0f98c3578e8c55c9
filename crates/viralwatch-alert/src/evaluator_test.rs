use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::TimeZone;
use viralwatch_core::{PriceDirection, SourcePlatform};

use super::*;
use crate::notifier::ChannelResult;

fn t(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 7, 4, 8, 0, 0).unwrap() + TimeDelta::minutes(minutes)
}

fn evaluator() -> AlertEvaluator {
    AlertEvaluator::new(7.0, TimeDelta::hours(1), 0.2)
}

fn score(key: &str, minutes: i64, value: f64) -> ViralScore {
    ViralScore {
        source_platform: SourcePlatform::Video,
        natural_key: key.to_string(),
        observed_at: t(minutes),
        score: value,
        velocity: 1_200.0,
        engagement_rate: 0.08,
        keyword_relevance: 0.66,
        computed_at: t(minutes),
    }
}

struct CountingNotifier {
    calls: Arc<AtomicU32>,
}

impl Notifier for CountingNotifier {
    async fn deliver(&self, _alert: &Alert) -> DeliveryReport {
        self.calls.fetch_add(1, Ordering::SeqCst);
        DeliveryReport {
            channels: vec![ChannelResult {
                channel: "count".to_string(),
                delivered: false,
                error: Some("offline".to_string()),
            }],
        }
    }
}

#[test]
fn alert_id_is_hex_sha256_of_components() {
    let id = alert_id("video:abc", "score>=7.00", 1_700_000_000);
    assert_eq!(id.len(), 64);
    assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(id, alert_id("video:abc", "score>=7.00", 1_700_000_000));
    assert_ne!(id, alert_id("video:abc", "score>=7.00", 1_700_000_001));
}

#[test]
fn first_score_above_threshold_fires() {
    let alert = evaluator().evaluate(&score("v1", 0, 8.0)).unwrap();
    assert_eq!(alert.kind, AlertKind::ViralScore);
    assert_eq!(alert.subject, "video:v1");
    assert_eq!(alert.payload["score"], 8.0);
    assert!(alert.sent_at.is_none());
}

#[test]
fn score_exactly_at_threshold_fires() {
    assert!(evaluator().evaluate(&score("v1", 0, 7.0)).is_some());
}

#[test]
fn staying_above_threshold_does_not_refire() {
    let eval = evaluator();
    assert!(eval.evaluate(&score("v1", 0, 8.0)).is_some());
    assert!(eval.evaluate(&score("v1", 10, 9.0)).is_none());
}

#[test]
fn dropping_below_rearms_the_trigger() {
    let eval = evaluator();
    let first = eval.evaluate(&score("v1", 0, 8.0)).unwrap();
    assert!(eval.evaluate(&score("v1", 10, 3.0)).is_none());
    let second = eval.evaluate(&score("v1", 20, 7.5)).unwrap();
    assert_ne!(first.alert_id, second.alert_id);
}

#[test]
fn replayed_scores_are_ignored() {
    let eval = evaluator();
    assert!(eval.evaluate(&score("v1", 10, 2.0)).is_none());
    assert!(eval.evaluate(&score("v1", 10, 9.0)).is_none());
    assert!(eval.evaluate(&score("v1", 5, 9.0)).is_none());
}

#[test]
fn ids_are_stable_across_evaluators() {
    let a = evaluator().evaluate(&score("v1", 30, 8.0)).unwrap();
    let b = evaluator().evaluate(&score("v1", 30, 8.0)).unwrap();
    assert_eq!(a.alert_id, b.alert_id);
}

#[tokio::test]
async fn dispatch_hands_off_once_per_id() {
    let eval = evaluator();
    let calls = Arc::new(AtomicU32::new(0));
    let notifier = CountingNotifier {
        calls: Arc::clone(&calls),
    };
    let alert = eval.evaluate(&score("v1", 0, 8.0)).unwrap();

    let first = eval.dispatch(alert.clone(), &notifier).await;
    let Dispatch::Delivered { alert: sent, report } = first else {
        panic!("expected delivery");
    };
    assert!(sent.sent_at.is_some());
    assert_eq!(report.failures().count(), 1);
    assert!(eval.is_dispatched(&alert.alert_id));

    assert!(matches!(
        eval.dispatch(alert, &notifier).await,
        Dispatch::Suppressed
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn dispatched_ids_are_bounded() {
    let eval = AlertEvaluator::with_dispatch_capacity(7.0, TimeDelta::hours(1), 0.2, 2);
    let notifier = CountingNotifier {
        calls: Arc::new(AtomicU32::new(0)),
    };
    let alerts: Vec<Alert> = ["v1", "v2", "v3"]
        .into_iter()
        .map(|key| eval.evaluate(&score(key, 0, 8.0)).unwrap())
        .collect();
    for alert in &alerts {
        eval.dispatch(alert.clone(), &notifier).await;
    }

    assert_eq!(eval.dispatched_len(), 2);
    assert!(!eval.is_dispatched(&alerts[0].alert_id));
    assert!(eval.is_dispatched(&alerts[1].alert_id));
    assert!(eval.is_dispatched(&alerts[2].alert_id));
}

#[test]
fn primed_score_keeps_trigger_disarmed() {
    let eval = evaluator();
    eval.prime(&score("v1", 0, 8.5));
    assert!(eval.evaluate(&score("v1", 10, 9.0)).is_none());
    assert!(eval.evaluate(&score("v1", 20, 5.0)).is_none());
    assert!(eval.evaluate(&score("v1", 30, 7.5)).is_some());
}

#[test]
fn forgetting_idle_entities_frees_their_state() {
    let eval = evaluator();
    let _ = eval.evaluate(&score("old", 0, 3.0));
    let _ = eval.evaluate(&score("fresh", 90, 3.0));
    assert_eq!(eval.forget_before(t(60)), 1);
    assert_eq!(eval.tracked_entities(), 1);
}

#[test]
fn surge_alerts_are_critical_and_bucketed() {
    let eval = evaluator();
    let surge = |end_minutes: i64| SurgeEvent {
        brand_or_keyword: "cosrx".to_string(),
        platforms_involved: BTreeSet::from([SourcePlatform::Video, SourcePlatform::ShortVideo]),
        window_start: t(end_minutes - 60),
        window_end: t(end_minutes),
        severity: 2.4,
    };
    let a = eval.evaluate_surge(&surge(10));
    let b = eval.evaluate_surge(&surge(40));
    let c = eval.evaluate_surge(&surge(70));
    assert_eq!(a.severity, AlertSeverity::Critical);
    assert_eq!(a.subject, "surge:cosrx");
    assert_eq!(a.alert_id, b.alert_id);
    assert_ne!(a.alert_id, c.alert_id);
}

#[test]
fn arbitrage_alerts_are_warnings_keyed_by_observation() {
    let eval = evaluator();
    let signal = ArbitrageSignal {
        natural_key: "B00PBX3L7K".to_string(),
        observed_price: 12.0,
        reference_price: 25.0,
        reference_source: "static_table".to_string(),
        relative_margin: 0.52,
        direction: PriceDirection::BelowReference,
        observed_at: t(0),
    };
    let alert = eval.evaluate_arbitrage(&signal);
    assert_eq!(alert.severity, AlertSeverity::Warning);
    assert_eq!(alert.kind, AlertKind::Arbitrage);
    assert_eq!(alert.payload["direction"], "below_reference");
    assert_eq!(alert.alert_id, eval.evaluate_arbitrage(&signal).alert_id);
}
