//! `replay` command: feeds captured JSON Lines traffic through the same
//! acquire, report, submit sequence the scheduler uses.
//!
//! Runs against Postgres when `DATABASE_URL` is set and against the
//! in-memory store otherwise, so captures can be checked offline.

use std::fmt::Write as _;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use viralwatch_access::AccessCoordinator;
use viralwatch_alert::{Fanout, LogNotifier, WebhookNotifier};
use viralwatch_core::{AppConfig, MemoryStore, WatchConfig};
use viralwatch_db::{AnyStore, PgStore};
use viralwatch_pipeline::{Pipeline, ReplaySummary};

pub(crate) type CliPipeline = Pipeline<AnyStore, Fanout<LogNotifier, WebhookNotifier>>;

pub(crate) fn build_pipeline(
    watch: &WatchConfig,
    config: &AppConfig,
    store: AnyStore,
) -> anyhow::Result<CliPipeline> {
    let coordinator = Arc::new(AccessCoordinator::from_config(watch, config, Utc::now()));
    let notifier = Fanout(
        LogNotifier,
        WebhookNotifier::new(
            config.webhook_urls.clone(),
            config.collector_request_timeout_secs,
        )?,
    );
    Ok(Pipeline::new(watch, coordinator, store, notifier)?)
}

async fn open_store(config: &AppConfig) -> anyhow::Result<AnyStore> {
    if config.database_url.is_none() {
        tracing::info!("DATABASE_URL not set; replaying into the in-memory store");
        return Ok(AnyStore::Memory(MemoryStore::new()));
    }
    let pool = viralwatch_db::connect_pool_from_config(config).await?;
    Ok(AnyStore::Postgres(PgStore::new(pool)))
}

/// Replay `path` and print the run summary.
///
/// # Errors
///
/// Returns an error if the watchlist or file cannot be read, the store cannot
/// be opened, or the replay aborts on a read failure or unregistered source.
/// Malformed lines are reported in the summary, not propagated.
pub(crate) async fn run_replay(
    config: &AppConfig,
    path: &Path,
    json: bool,
    record: bool,
) -> anyhow::Result<()> {
    let watch = viralwatch_core::load_watchlist(&config.watchlist_path)?;
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;

    let store = open_store(config).await?;
    let pool = if record { store.pool().cloned() } else { None };
    let pipeline = build_pipeline(&watch, config, store)?;

    let run_id = match &pool {
        Some(pool) => {
            let run = viralwatch_db::create_collection_run(pool, "replay", "cli", None).await?;
            if let Err(e) = viralwatch_db::start_collection_run(pool, run.id).await {
                fail_run_best_effort(pool, run.id, format!("{e:#}")).await;
                return Err(e.into());
            }
            Some(run.id)
        }
        None => None,
    };

    let result = pipeline.replay_jsonl(BufReader::new(file)).await;

    if let (Some(pool), Some(id)) = (&pool, run_id) {
        match &result {
            Ok(summary) => {
                viralwatch_db::complete_collection_run(pool, id, &summary.stats).await?;
            }
            Err(e) => fail_run_best_effort(pool, id, format!("{e:#}")).await,
        }
    }

    let summary = result?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", render_summary(&summary));
    }
    Ok(())
}

async fn fail_run_best_effort(pool: &sqlx::PgPool, run_id: i64, message: String) {
    if let Err(mark_err) = viralwatch_db::fail_collection_run(pool, run_id, &message).await {
        tracing::error!(run_id, error = %mark_err, "failed to mark replay run as failed");
    }
}

pub(crate) fn render_summary(summary: &ReplaySummary) -> String {
    let stats = &summary.stats;
    let mut out = String::new();
    let rows: [(&str, u64); 10] = [
        ("lines", summary.lines),
        ("collected", stats.collected),
        ("accepted", stats.accepted),
        ("noise", stats.noise),
        ("duplicates", stats.duplicates),
        ("rejected", stats.rejected),
        ("alerts", stats.alerts),
        ("quota used", stats.quota_used),
        ("quota refused", summary.quota_refused),
        ("failed calls", summary.failed_calls),
    ];
    for (label, value) in rows {
        let _ = writeln!(out, "{label:<14} {value:>8}");
    }
    if !summary.errors.is_empty() {
        let _ = writeln!(out, "errors:");
        for error in &summary.errors {
            let _ = writeln!(out, "  {error}");
        }
    }
    out
}
