//! Offline tests for viralwatch-db pool configuration and row types.
//! These tests do not require a live database connection.

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::json;
use sqlx::types::Json;
use viralwatch_core::{build_app_config, Alert, AlertKind, StoredRecord};
use viralwatch_db::{AlertRow, DbError, PoolConfig, RecordRow};

#[test]
fn pool_config_from_app_config_uses_core_values() {
    let vars = BTreeMap::from([
        ("VIRALWATCH_DB_MAX_CONNECTIONS", "42"),
        ("VIRALWATCH_DB_MIN_CONNECTIONS", "7"),
        ("VIRALWATCH_DB_ACQUIRE_TIMEOUT_SECS", "9"),
    ]);
    let app_config = build_app_config(|key| {
        vars.get(key)
            .map(|v| (*v).to_string())
            .ok_or(std::env::VarError::NotPresent)
    })
    .expect("config should build");

    let pool_config = PoolConfig::from_app_config(&app_config);
    assert_eq!(pool_config.max_connections, 42);
    assert_eq!(pool_config.min_connections, 7);
    assert_eq!(pool_config.acquire_timeout_secs, 9);
}

fn record_row(platform: &str) -> RecordRow {
    RecordRow {
        id: 1,
        source_platform: platform.to_string(),
        natural_key: "glassskin@tiktok".to_string(),
        observed_at: Utc::now(),
        metrics: Json(BTreeMap::from([("views".to_string(), 1_200_000.0)])),
        text_fields: Json(BTreeMap::from([("hashtag".to_string(), "glassskin".to_string())])),
        detected_keywords: vec!["glass skin".to_string()],
        detected_brands: vec![],
        noise: false,
        scoring_eligible: true,
        ingested_at: Utc::now(),
    }
}

#[test]
fn record_row_converts_to_stored_record() {
    let stored = StoredRecord::try_from(record_row("short_video")).expect("valid row");
    assert_eq!(stored.record.natural_key, "glassskin@tiktok");
    assert_eq!(stored.record.metric("views"), Some(1_200_000.0));
    assert!(stored.record.detected_keywords.contains("glass skin"));
    assert!(stored.scoring_eligible);
}

#[test]
fn record_row_with_unknown_platform_is_invalid() {
    let err = StoredRecord::try_from(record_row("myspace")).unwrap_err();
    assert!(matches!(err, DbError::InvalidRow(_)));
}

#[test]
fn alert_row_round_trips_kind_and_severity() {
    let row = AlertRow {
        id: 3,
        alert_id: "f00d".to_string(),
        kind: "surge".to_string(),
        severity: "critical".to_string(),
        subject: "surge:cosrx".to_string(),
        payload: Json(json!({"platforms": ["video", "short_video"]})),
        sent_at: None,
        created_at: Utc::now(),
    };
    let alert = Alert::try_from(row).expect("valid row");
    assert_eq!(alert.kind, AlertKind::Surge);
    assert_eq!(alert.severity.to_string(), "critical");

    let bad = AlertRow {
        id: 4,
        alert_id: "beef".to_string(),
        kind: "surge".to_string(),
        severity: "loud".to_string(),
        subject: "surge:anua".to_string(),
        payload: Json(json!({})),
        sent_at: None,
        created_at: Utc::now(),
    };
    assert!(matches!(Alert::try_from(bad), Err(DbError::InvalidRow(_))));
}
