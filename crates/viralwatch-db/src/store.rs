use chrono::{DateTime, Utc};
use sqlx::PgPool;
use viralwatch_core::{
    Alert, EntityKey, MemoryStore, RecordStore, StoreError, StoredRecord, ViralScore,
};

use crate::DbError;

/// Postgres-backed [`RecordStore`].
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn backend(err: DbError) -> StoreError {
    StoreError::Backend(err.to_string())
}

impl RecordStore for PgStore {
    async fn append_record(&self, stored: &StoredRecord) -> Result<(), StoreError> {
        let inserted = crate::insert_record(&self.pool, stored)
            .await
            .map_err(backend)?;
        if !inserted {
            tracing::debug!(
                platform = %stored.record.source_platform,
                natural_key = %stored.record.natural_key,
                "observation already stored"
            );
        }
        Ok(())
    }

    async fn append_score(&self, score: &ViralScore) -> Result<(), StoreError> {
        crate::insert_score(&self.pool, score)
            .await
            .map(|_| ())
            .map_err(backend)
    }

    async fn record_alert(&self, alert: &Alert) -> Result<bool, StoreError> {
        crate::insert_alert(&self.pool, alert)
            .await
            .map_err(backend)
    }

    async fn entity_series(&self, key: &EntityKey) -> Result<Vec<StoredRecord>, StoreError> {
        crate::list_entity_records(&self.pool, key)
            .await
            .map_err(backend)
    }

    async fn recent_records(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        crate::list_records_between(&self.pool, since, until)
            .await
            .map_err(backend)
    }

    async fn list_alerts(&self, limit: usize) -> Result<Vec<Alert>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        crate::list_alerts(&self.pool, limit)
            .await
            .map_err(backend)
    }
}

/// Store chosen at startup: Postgres when `DATABASE_URL` is set, memory
/// otherwise.
pub enum AnyStore {
    Memory(MemoryStore),
    Postgres(PgStore),
}

impl AnyStore {
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        match self {
            AnyStore::Memory(_) => "memory",
            AnyStore::Postgres(_) => "postgres",
        }
    }

    #[must_use]
    pub fn pool(&self) -> Option<&PgPool> {
        match self {
            AnyStore::Memory(_) => None,
            AnyStore::Postgres(store) => Some(store.pool()),
        }
    }
}

impl RecordStore for AnyStore {
    async fn append_record(&self, stored: &StoredRecord) -> Result<(), StoreError> {
        match self {
            AnyStore::Memory(s) => s.append_record(stored).await,
            AnyStore::Postgres(s) => s.append_record(stored).await,
        }
    }

    async fn append_score(&self, score: &ViralScore) -> Result<(), StoreError> {
        match self {
            AnyStore::Memory(s) => s.append_score(score).await,
            AnyStore::Postgres(s) => s.append_score(score).await,
        }
    }

    async fn record_alert(&self, alert: &Alert) -> Result<bool, StoreError> {
        match self {
            AnyStore::Memory(s) => s.record_alert(alert).await,
            AnyStore::Postgres(s) => s.record_alert(alert).await,
        }
    }

    async fn entity_series(&self, key: &EntityKey) -> Result<Vec<StoredRecord>, StoreError> {
        match self {
            AnyStore::Memory(s) => s.entity_series(key).await,
            AnyStore::Postgres(s) => s.entity_series(key).await,
        }
    }

    async fn recent_records(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        match self {
            AnyStore::Memory(s) => s.recent_records(since, until).await,
            AnyStore::Postgres(s) => s.recent_records(since, until).await,
        }
    }

    async fn list_alerts(&self, limit: usize) -> Result<Vec<Alert>, StoreError> {
        match self {
            AnyStore::Memory(s) => s.list_alerts(limit).await,
            AnyStore::Postgres(s) => s.list_alerts(limit).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_variant_delegates() {
        let store = AnyStore::Memory(MemoryStore::new());
        assert_eq!(store.backend_name(), "memory");
        assert!(store.pool().is_none());
        assert!(store.list_alerts(5).await.unwrap().is_empty());
    }
}
