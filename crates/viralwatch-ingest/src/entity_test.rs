use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{TimeDelta, TimeZone};
use viralwatch_core::SourcePlatform;

use super::*;

fn t(hour: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 10, 0, 0, 0).unwrap() + TimeDelta::hours(hour)
}

fn record(key: &str, hour: i64, views: f64) -> CanonicalRecord {
    CanonicalRecord {
        source_platform: SourcePlatform::Video,
        natural_key: key.to_string(),
        observed_at: t(hour),
        metrics: BTreeMap::from([("views".to_string(), views)]),
        text_fields: BTreeMap::new(),
        detected_keywords: BTreeSet::from(["glass skin".to_string()]),
        detected_brands: BTreeSet::from(["cosrx".to_string()]),
    }
}

fn score(key: &str, hour: i64, velocity: f64) -> ViralScore {
    ViralScore {
        source_platform: SourcePlatform::Video,
        natural_key: key.to_string(),
        observed_at: t(hour),
        score: 5.0,
        velocity,
        engagement_rate: 0.1,
        keyword_relevance: 1.0,
        computed_at: t(hour),
    }
}

#[test]
fn first_observation_is_new_then_merged() {
    let store = EntityStore::new(16);
    assert_eq!(
        store.ingest(record("v1", 0, 100.0), false).unwrap(),
        IngestOutcome::New
    );
    assert_eq!(
        store.ingest(record("v1", 1, 150.0), false).unwrap(),
        IngestOutcome::Merged
    );
    assert_eq!(store.len(), 1);
}

#[test]
fn identical_observation_is_duplicate_without_side_effects() {
    let store = EntityStore::new(16);
    store.ingest(record("v1", 0, 100.0), false).unwrap();
    let outcome = store.ingest(record("v1", 0, 999.0), false).unwrap();
    assert_eq!(outcome, IngestOutcome::Duplicate);

    let key = EntityKey::new(SourcePlatform::Video, "v1");
    let snapshot = store.snapshot(&key).unwrap();
    assert_eq!(snapshot.metric("views"), Some(100.0));
    assert_eq!(store.clean_series(&key).len(), 1);
}

#[test]
fn older_observation_is_stale() {
    let store = EntityStore::new(16);
    store.ingest(record("v1", 5, 100.0), false).unwrap();
    let err = store.ingest(record("v1", 3, 90.0), false).unwrap_err();
    assert!(matches!(
        err,
        IngestError::StaleObservation { ref key, .. } if key.natural_key == "v1"
    ));
}

#[test]
fn same_key_on_another_platform_is_a_different_entity() {
    let store = EntityStore::new(16);
    store.ingest(record("shared", 0, 1.0), false).unwrap();
    let mut other = record("shared", 0, 1.0);
    other.source_platform = SourcePlatform::ShortVideo;
    assert_eq!(store.ingest(other, false).unwrap(), IngestOutcome::New);
    assert_eq!(store.len(), 2);
}

#[test]
fn snapshot_is_latest_write() {
    let store = EntityStore::new(16);
    store.ingest(record("v1", 0, 100.0), false).unwrap();
    store.ingest(record("v1", 2, 300.0), false).unwrap();
    let key = EntityKey::new(SourcePlatform::Video, "v1");
    assert_eq!(store.snapshot(&key).unwrap().metric("views"), Some(300.0));
}

#[test]
fn series_is_capped_oldest_first() {
    let store = EntityStore::new(3);
    for hour in 0..5 {
        store.ingest(record("v1", hour, 10.0), false).unwrap();
    }
    let key = EntityKey::new(SourcePlatform::Video, "v1");
    let series = store.clean_series(&key);
    assert_eq!(series.len(), 3);
    assert_eq!(series[0].observed_at, t(2));
}

#[test]
fn noise_points_are_excluded_from_clean_series() {
    let store = EntityStore::new(16);
    store.ingest(record("v1", 0, 100.0), false).unwrap();
    store.ingest(record("v1", 1, 200.0), true).unwrap();
    store.ingest(record("v1", 2, 300.0), false).unwrap();
    let key = EntityKey::new(SourcePlatform::Video, "v1");
    let views: Vec<f64> = store
        .clean_series(&key)
        .iter()
        .filter_map(|r| r.metric("views"))
        .collect();
    assert_eq!(views, vec![100.0, 300.0]);
}

#[test]
fn prior_metric_only_looks_back() {
    let store = EntityStore::new(16);
    for hour in 0..3 {
        store.ingest(record("v1", hour, 100.0), false).unwrap();
    }
    let key = EntityKey::new(SourcePlatform::Video, "v1");
    assert_eq!(store.prior_metric(&key, "views", t(2)).len(), 2);
    assert!(store.prior_metric(&key, "price", t(2)).is_empty());
}

#[test]
fn record_score_keeps_newest() {
    let store = EntityStore::new(16);
    store.ingest(record("v1", 0, 100.0), false).unwrap();
    store.ingest(record("v1", 1, 100.0), false).unwrap();
    store.record_score(&score("v1", 1, 50.0));
    store.record_score(&score("v1", 0, 10.0));
    let key = EntityKey::new(SourcePlatform::Video, "v1");
    assert_eq!(store.last_score(&key).unwrap().velocity, 50.0);
}

#[test]
fn recent_samples_cover_scored_entities_inside_window() {
    let store = EntityStore::new(16);
    store.ingest(record("inside", 5, 100.0), false).unwrap();
    store.record_score(&score("inside", 5, 42.0));
    store.ingest(record("outside", 1, 100.0), false).unwrap();
    store.record_score(&score("outside", 1, 99.0));
    store.ingest(record("unscored", 5, 100.0), false).unwrap();

    let samples = store.recent_samples(t(4), t(6));
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].natural_key, "inside");
    assert_eq!(samples[0].velocity, 42.0);
    assert!(samples[0].terms.contains("glass skin"));
    assert!(samples[0].terms.contains("cosrx"));
}

fn point(key: &str, hour: i64, views: f64) -> SeriesPoint {
    SeriesPoint {
        record: record(key, hour, views),
        noise: false,
    }
}

#[test]
fn hydrated_history_drives_dedup_and_staleness() {
    let store = EntityStore::new(16);
    let key = record("v1", 0, 0.0).entity_key();
    assert!(!store.contains(&key));

    let added = store.hydrate(&key, [point("v1", 2, 200.0), point("v1", 1, 100.0)]);
    assert_eq!(added, 2);
    assert!(store.contains(&key));

    assert_eq!(
        store.ingest(record("v1", 2, 200.0), false).unwrap(),
        IngestOutcome::Duplicate
    );
    assert!(matches!(
        store.ingest(record("v1", 0, 50.0), false),
        Err(IngestError::StaleObservation { .. })
    ));
    assert_eq!(
        store.ingest(record("v1", 3, 400.0), false).unwrap(),
        IngestOutcome::Merged
    );
    let hours: Vec<DateTime<Utc>> = store
        .clean_series(&key)
        .iter()
        .map(|r| r.observed_at)
        .collect();
    assert_eq!(hours, vec![t(1), t(2), t(3)]);
}

#[test]
fn hydrate_skips_known_and_foreign_points() {
    let store = EntityStore::new(2);
    let key = record("v1", 0, 0.0).entity_key();
    store.ingest(record("v1", 5, 500.0), false).unwrap();

    let added = store.hydrate(
        &key,
        [point("v1", 5, 500.0), point("other", 4, 1.0), point("v1", 3, 300.0), point("v1", 1, 100.0)],
    );
    assert_eq!(added, 2);
    let series = store.clean_series(&key);
    assert_eq!(series.len(), 2);
    assert_eq!(series[0].observed_at, t(3));
    assert_eq!(series[1].observed_at, t(5));
}

#[test]
fn eviction_drops_entities_idle_before_cutoff() {
    let store = EntityStore::new(16);
    store.ingest(record("old", 1, 10.0), false).unwrap();
    store.ingest(record("fresh", 1, 10.0), false).unwrap();
    store.ingest(record("fresh", 8, 90.0), false).unwrap();

    assert_eq!(store.evict_before(t(5)), 1);
    assert_eq!(store.len(), 1);
    assert!(store.snapshot(&record("old", 0, 0.0).entity_key()).is_none());
    assert!(store.snapshot(&record("fresh", 0, 0.0).entity_key()).is_some());
}

#[test]
fn concurrent_ingest_of_distinct_entities() {
    let store = Arc::new(EntityStore::new(16));
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for hour in 0..10 {
                    store
                        .ingest(record(&format!("v{i}"), hour, 1.0), false)
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(store.len(), 8);
}
