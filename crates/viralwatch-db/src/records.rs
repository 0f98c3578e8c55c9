//! Database operations for `canonical_records`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use viralwatch_core::{CanonicalRecord, EntityKey, SourcePlatform, StoredRecord};

use crate::DbError;

const RECORD_COLUMNS: &str = "id, source_platform, natural_key, observed_at, metrics, \
     text_fields, detected_keywords, detected_brands, noise, scoring_eligible, ingested_at";

/// A row from the `canonical_records` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RecordRow {
    pub id: i64,
    pub source_platform: String,
    pub natural_key: String,
    pub observed_at: DateTime<Utc>,
    pub metrics: Json<BTreeMap<String, f64>>,
    pub text_fields: Json<BTreeMap<String, String>>,
    pub detected_keywords: Vec<String>,
    pub detected_brands: Vec<String>,
    pub noise: bool,
    pub scoring_eligible: bool,
    pub ingested_at: DateTime<Utc>,
}

impl TryFrom<RecordRow> for StoredRecord {
    type Error = DbError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let source_platform: SourcePlatform = row
            .source_platform
            .parse()
            .map_err(|e| DbError::InvalidRow(format!("canonical_records.id={}: {e}", row.id)))?;
        Ok(StoredRecord {
            record: CanonicalRecord {
                source_platform,
                natural_key: row.natural_key,
                observed_at: row.observed_at,
                metrics: row.metrics.0,
                text_fields: row.text_fields.0,
                detected_keywords: row.detected_keywords.into_iter().collect(),
                detected_brands: row.detected_brands.into_iter().collect(),
            },
            noise: row.noise,
            scoring_eligible: row.scoring_eligible,
        })
    }
}

/// Append one observation. A repeated `(platform, natural_key, observed_at)`
/// is ignored.
///
/// Returns `true` when a row was inserted.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn insert_record(pool: &PgPool, stored: &StoredRecord) -> Result<bool, DbError> {
    let record = &stored.record;
    let result = sqlx::query(
        "INSERT INTO canonical_records \
             (source_platform, natural_key, observed_at, metrics, text_fields, \
              detected_keywords, detected_brands, noise, scoring_eligible) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         ON CONFLICT (source_platform, natural_key, observed_at) DO NOTHING",
    )
    .bind(record.source_platform.as_str())
    .bind(&record.natural_key)
    .bind(record.observed_at)
    .bind(Json(&record.metrics))
    .bind(Json(&record.text_fields))
    .bind(record.detected_keywords.iter().cloned().collect::<Vec<_>>())
    .bind(record.detected_brands.iter().cloned().collect::<Vec<_>>())
    .bind(stored.noise)
    .bind(stored.scoring_eligible)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Full stored series of one entity, oldest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails, or [`DbError::InvalidRow`]
/// if a row carries an unknown platform.
pub async fn list_entity_records(
    pool: &PgPool,
    key: &EntityKey,
) -> Result<Vec<StoredRecord>, DbError> {
    let rows = sqlx::query_as::<_, RecordRow>(&format!(
        "SELECT {RECORD_COLUMNS} FROM canonical_records \
         WHERE source_platform = $1 AND natural_key = $2 \
         ORDER BY observed_at ASC"
    ))
    .bind(key.platform.as_str())
    .bind(&key.natural_key)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(StoredRecord::try_from).collect()
}

/// Records observed in `[since, until]`, oldest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails, or [`DbError::InvalidRow`]
/// if a row carries an unknown platform.
pub async fn list_records_between(
    pool: &PgPool,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<Vec<StoredRecord>, DbError> {
    let rows = sqlx::query_as::<_, RecordRow>(&format!(
        "SELECT {RECORD_COLUMNS} FROM canonical_records \
         WHERE observed_at >= $1 AND observed_at <= $2 \
         ORDER BY observed_at ASC, id ASC"
    ))
    .bind(since)
    .bind(until)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(StoredRecord::try_from).collect()
}
