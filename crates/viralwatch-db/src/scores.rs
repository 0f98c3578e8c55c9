//! Database operations for `viral_scores`.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use viralwatch_core::ViralScore;

use crate::DbError;

/// A row from the `viral_scores` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScoreRow {
    pub id: i64,
    pub source_platform: String,
    pub natural_key: String,
    pub observed_at: DateTime<Utc>,
    pub score: f64,
    pub velocity: f64,
    pub engagement_rate: f64,
    pub keyword_relevance: f64,
    pub computed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Append one score. Rescoring the same observation is a no-op.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn insert_score(pool: &PgPool, score: &ViralScore) -> Result<bool, DbError> {
    let result = sqlx::query(
        "INSERT INTO viral_scores \
             (source_platform, natural_key, observed_at, score, velocity, \
              engagement_rate, keyword_relevance, computed_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         ON CONFLICT (source_platform, natural_key, observed_at) DO NOTHING",
    )
    .bind(score.source_platform.as_str())
    .bind(&score.natural_key)
    .bind(score.observed_at)
    .bind(score.score)
    .bind(score.velocity)
    .bind(score.engagement_rate)
    .bind(score.keyword_relevance)
    .bind(score.computed_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Most recent scores across all entities, newest observation first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn latest_scores(pool: &PgPool, limit: i64) -> Result<Vec<ScoreRow>, DbError> {
    let rows = sqlx::query_as::<_, ScoreRow>(
        "SELECT id, source_platform, natural_key, observed_at, score, velocity, \
                engagement_rate, keyword_relevance, computed_at, created_at \
         FROM viral_scores \
         ORDER BY observed_at DESC, id DESC \
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
