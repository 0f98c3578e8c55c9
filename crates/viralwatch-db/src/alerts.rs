//! Database operations for `alerts`.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use viralwatch_core::{Alert, AlertKind, AlertSeverity};

use crate::DbError;

/// A row from the `alerts` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AlertRow {
    pub id: i64,
    pub alert_id: String,
    pub kind: String,
    pub severity: String,
    pub subject: String,
    pub payload: Json<serde_json::Value>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<AlertRow> for Alert {
    type Error = DbError;

    fn try_from(row: AlertRow) -> Result<Self, Self::Error> {
        let kind = match row.kind.as_str() {
            "viral_score" => AlertKind::ViralScore,
            "surge" => AlertKind::Surge,
            "arbitrage" => AlertKind::Arbitrage,
            other => {
                return Err(DbError::InvalidRow(format!(
                    "alerts.id={}: unknown kind '{other}'",
                    row.id
                )))
            }
        };
        let severity = match row.severity.as_str() {
            "info" => AlertSeverity::Info,
            "warning" => AlertSeverity::Warning,
            "critical" => AlertSeverity::Critical,
            other => {
                return Err(DbError::InvalidRow(format!(
                    "alerts.id={}: unknown severity '{other}'",
                    row.id
                )))
            }
        };
        Ok(Alert {
            alert_id: row.alert_id,
            kind,
            severity,
            subject: row.subject,
            payload: row.payload.0,
            sent_at: row.sent_at,
        })
    }
}

/// Insert an alert unless its id is already stored.
///
/// Returns `true` when the id was new.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn insert_alert(pool: &PgPool, alert: &Alert) -> Result<bool, DbError> {
    let result = sqlx::query(
        "INSERT INTO alerts (alert_id, kind, severity, subject, payload, sent_at) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         ON CONFLICT (alert_id) DO NOTHING",
    )
    .bind(&alert.alert_id)
    .bind(alert.kind.to_string())
    .bind(alert.severity.to_string())
    .bind(&alert.subject)
    .bind(Json(&alert.payload))
    .bind(alert.sent_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Most recently stored alerts, newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails, or [`DbError::InvalidRow`]
/// for a row with an unknown kind or severity.
pub async fn list_alerts(pool: &PgPool, limit: i64) -> Result<Vec<Alert>, DbError> {
    let rows = sqlx::query_as::<_, AlertRow>(
        "SELECT id, alert_id, kind, severity, subject, payload, sent_at, created_at \
         FROM alerts \
         ORDER BY created_at DESC, id DESC \
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Alert::try_from).collect()
}
