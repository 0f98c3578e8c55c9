use std::collections::HashSet;
use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{Alert, CanonicalRecord, EntityKey, SourcePlatform, StoreError, ViralScore};

/// A canonical record as persisted, with its ingestion flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub record: CanonicalRecord,
    /// Set when the record matched a spam pattern or no priority keyword.
    pub noise: bool,
    pub scoring_eligible: bool,
}

/// Append/query collaborator used by the pipeline.
///
/// Implementations must be append-only for records and scores, and must treat
/// a repeated `(platform, natural_key, observed_at)` as a no-op.
pub trait RecordStore: Send + Sync {
    fn append_record(
        &self,
        stored: &StoredRecord,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn append_score(&self, score: &ViralScore)
        -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Persist an alert. Returns `false` when the id was already recorded.
    fn record_alert(&self, alert: &Alert) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Full stored series of one entity, oldest first.
    fn entity_series(
        &self,
        key: &EntityKey,
    ) -> impl Future<Output = Result<Vec<StoredRecord>, StoreError>> + Send;

    /// Records observed in `[since, until]`, oldest first.
    fn recent_records(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<StoredRecord>, StoreError>> + Send;

    /// Most recently recorded alerts, newest first.
    fn list_alerts(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Alert>, StoreError>> + Send;
}

#[derive(Default)]
struct MemoryInner {
    records: Vec<StoredRecord>,
    record_keys: HashSet<(SourcePlatform, String, DateTime<Utc>)>,
    scores: Vec<ViralScore>,
    alerts: Vec<Alert>,
    alert_ids: HashSet<String>,
}

/// In-process [`RecordStore`], used in development and tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_count(&self) -> usize {
        self.inner.lock().await.records.len()
    }

    pub async fn scores(&self) -> Vec<ViralScore> {
        self.inner.lock().await.scores.clone()
    }
}

impl RecordStore for MemoryStore {
    async fn append_record(&self, stored: &StoredRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let key = (
            stored.record.source_platform,
            stored.record.natural_key.clone(),
            stored.record.observed_at,
        );
        if inner.record_keys.insert(key) {
            inner.records.push(stored.clone());
        }
        Ok(())
    }

    async fn append_score(&self, score: &ViralScore) -> Result<(), StoreError> {
        self.inner.lock().await.scores.push(score.clone());
        Ok(())
    }

    async fn record_alert(&self, alert: &Alert) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        if !inner.alert_ids.insert(alert.alert_id.clone()) {
            return Ok(false);
        }
        inner.alerts.push(alert.clone());
        Ok(true)
    }

    async fn entity_series(&self, key: &EntityKey) -> Result<Vec<StoredRecord>, StoreError> {
        let inner = self.inner.lock().await;
        let mut series: Vec<StoredRecord> = inner
            .records
            .iter()
            .filter(|s| {
                s.record.source_platform == key.platform && s.record.natural_key == key.natural_key
            })
            .cloned()
            .collect();
        series.sort_by_key(|s| s.record.observed_at);
        Ok(series)
    }

    async fn recent_records(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let inner = self.inner.lock().await;
        let mut records: Vec<StoredRecord> = inner
            .records
            .iter()
            .filter(|s| s.record.observed_at >= since && s.record.observed_at <= until)
            .cloned()
            .collect();
        records.sort_by_key(|s| s.record.observed_at);
        Ok(records)
    }

    async fn list_alerts(&self, limit: usize) -> Result<Vec<Alert>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.alerts.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use chrono::TimeZone;

    use super::*;
    use crate::{AlertKind, AlertSeverity};

    fn stored(key: &str, hour: u32) -> StoredRecord {
        StoredRecord {
            record: CanonicalRecord {
                source_platform: SourcePlatform::Video,
                natural_key: key.to_string(),
                observed_at: Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).unwrap(),
                metrics: BTreeMap::from([("views".to_string(), 100.0)]),
                text_fields: BTreeMap::new(),
                detected_keywords: BTreeSet::new(),
                detected_brands: BTreeSet::new(),
            },
            noise: false,
            scoring_eligible: true,
        }
    }

    fn alert(id: &str) -> Alert {
        Alert {
            alert_id: id.to_string(),
            kind: AlertKind::ViralScore,
            severity: AlertSeverity::Info,
            subject: "video:abc".to_string(),
            payload: serde_json::json!({}),
            sent_at: None,
        }
    }

    #[tokio::test]
    async fn repeated_record_is_stored_once() {
        let store = MemoryStore::new();
        store.append_record(&stored("abc", 1)).await.unwrap();
        store.append_record(&stored("abc", 1)).await.unwrap();
        store.append_record(&stored("abc", 2)).await.unwrap();
        assert_eq!(store.record_count().await, 2);
    }

    #[tokio::test]
    async fn entity_series_is_filtered_and_ordered() {
        let store = MemoryStore::new();
        store.append_record(&stored("abc", 3)).await.unwrap();
        store.append_record(&stored("other", 2)).await.unwrap();
        store.append_record(&stored("abc", 1)).await.unwrap();

        let series = store
            .entity_series(&EntityKey::new(SourcePlatform::Video, "abc"))
            .await
            .unwrap();
        let hours: Vec<u32> = series
            .iter()
            .map(|s| chrono::Timelike::hour(&s.record.observed_at))
            .collect();
        assert_eq!(hours, vec![1, 3]);
    }

    #[tokio::test]
    async fn recent_records_respects_window_bounds() {
        let store = MemoryStore::new();
        for hour in [1, 2, 3, 4] {
            store.append_record(&stored("abc", hour)).await.unwrap();
        }
        let since = Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 0).unwrap();
        let until = Utc.with_ymd_and_hms(2026, 3, 1, 3, 0, 0).unwrap();
        assert_eq!(store.recent_records(since, until).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn record_alert_reports_duplicates() {
        let store = MemoryStore::new();
        assert!(store.record_alert(&alert("a1")).await.unwrap());
        assert!(!store.record_alert(&alert("a1")).await.unwrap());
        assert!(store.record_alert(&alert("a2")).await.unwrap());

        let listed = store.list_alerts(10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].alert_id, "a2");
        assert_eq!(store.list_alerts(1).await.unwrap().len(), 1);
    }
}
