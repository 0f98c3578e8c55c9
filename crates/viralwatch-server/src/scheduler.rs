//! Background job scheduler.
//!
//! Registers one repeated poll job per source that has an endpoint in the
//! watchlist, plus the cross-platform surge job. Every run is recorded in
//! `collection_runs` when the service has a database.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tokio_cron_scheduler::{Job, JobScheduler};
use viralwatch_core::{AppConfig, RunStats, SourcePlatform, WatchConfig};
use viralwatch_pipeline::{Collector, HttpJsonCollector};

use crate::api::AppState;

/// A source the scheduler polls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTarget {
    pub source: SourcePlatform,
    pub endpoint: String,
    pub interval: Duration,
    pub request_cost: u64,
}

/// Sources with a configured endpoint, in platform order.
#[must_use]
pub fn poll_targets(watch: &WatchConfig) -> Vec<PollTarget> {
    SourcePlatform::ALL
        .into_iter()
        .filter_map(|source| {
            let config = watch.sources.get(source);
            let endpoint = config.endpoint.as_deref()?.trim();
            if endpoint.is_empty() {
                return None;
            }
            Some(PollTarget {
                source,
                endpoint: endpoint.to_string(),
                interval: Duration::from_secs(config.poll_interval_secs.max(1)),
                request_cost: config.request_cost,
            })
        })
        .collect()
}

/// A quarter of the surge window, so each window is evaluated several times.
#[must_use]
pub fn surge_interval(watch: &WatchConfig) -> Duration {
    Duration::from_secs((watch.surge_window_secs / 4).max(1))
}

/// Builds and starts the background job scheduler.
///
/// Returns the running [`JobScheduler`] handle, which must be kept alive for
/// the lifetime of the process. Dropping it shuts down all scheduled jobs.
///
/// # Errors
///
/// Returns an error if a collector cannot be built, a job cannot be
/// registered, or the scheduler fails to start.
pub async fn build_scheduler(
    state: AppState,
    watch: &WatchConfig,
    config: Arc<AppConfig>,
) -> anyhow::Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;
    let max_wait = Duration::from_secs(config.collector_max_wait_secs);

    for target in poll_targets(watch) {
        let collector = HttpJsonCollector::new(
            target.source,
            target.endpoint.clone(),
            target.request_cost,
            config.collector_request_timeout_secs,
            config.collector_user_agent.clone(),
        )?;
        register_poll_job(&scheduler, state.clone(), Arc::new(collector), target.interval, max_wait)
            .await?;
    }
    register_surge_job(&scheduler, state, surge_interval(watch)).await?;

    scheduler.start().await?;
    Ok(scheduler)
}

async fn register_poll_job(
    scheduler: &JobScheduler,
    state: AppState,
    collector: Arc<HttpJsonCollector>,
    interval: Duration,
    max_wait: Duration,
) -> anyhow::Result<()> {
    let source = collector.platform();
    let job = Job::new_repeated_async(interval, move |_uuid, _lock| {
        let state = state.clone();
        let collector = Arc::clone(&collector);

        Box::pin(async move {
            run_poll_job(&state, collector.as_ref(), max_wait).await;
        })
    })?;

    scheduler.add(job).await?;
    tracing::info!(
        source = %source,
        interval_secs = interval.as_secs(),
        "scheduler: registered poll job"
    );
    Ok(())
}

async fn run_poll_job(state: &AppState, collector: &HttpJsonCollector, max_wait: Duration) {
    let source = collector.platform();
    let pool = state.pipeline.store().pool().cloned();
    let run_id = match &pool {
        Some(pool) => begin_run(pool, "poll", Some(source)).await,
        None => None,
    };

    tracing::info!(source = %source, "scheduler: starting poll run");
    let result = state.pipeline.collect(collector, max_wait).await;
    match &result {
        Ok(stats) => tracing::info!(
            source = %source,
            collected = stats.collected,
            accepted = stats.accepted,
            alerts = stats.alerts,
            "scheduler: poll run complete"
        ),
        Err(e) => tracing::warn!(source = %source, error = %e, "scheduler: poll run failed"),
    }

    if let (Some(pool), Some(id)) = (pool, run_id) {
        finish_run(&pool, id, result.as_ref().map_err(ToString::to_string)).await;
    }
}

async fn register_surge_job(
    scheduler: &JobScheduler,
    state: AppState,
    interval: Duration,
) -> anyhow::Result<()> {
    let job = Job::new_repeated_async(interval, move |_uuid, _lock| {
        let state = state.clone();

        Box::pin(async move {
            run_surge_job(&state).await;
        })
    })?;

    scheduler.add(job).await?;
    tracing::info!(
        interval_secs = interval.as_secs(),
        "scheduler: registered surge job"
    );
    Ok(())
}

async fn run_surge_job(state: &AppState) {
    let pool = state.pipeline.store().pool().cloned();
    let run_id = match &pool {
        Some(pool) => begin_run(pool, "surge", None).await,
        None => None,
    };

    let report = state.pipeline.run_surge_cycle(Utc::now()).await;
    tracing::info!(
        surges = report.surges.len(),
        alerts = report.alerts.len(),
        "scheduler: surge evaluation complete"
    );

    if let (Some(pool), Some(id)) = (pool, run_id) {
        let stats = RunStats {
            alerts: report.alerts.len() as u64,
            ..RunStats::default()
        };
        finish_run(&pool, id, Ok(&stats)).await;
    }
}

/// Create and start a collection run. Returns `None` (after logging) when
/// the run cannot be recorded; the job itself still runs.
async fn begin_run(pool: &PgPool, run_type: &str, source: Option<SourcePlatform>) -> Option<i64> {
    let run = match viralwatch_db::create_collection_run(pool, run_type, "scheduler", source).await
    {
        Ok(run) => run,
        Err(e) => {
            tracing::error!(run_type, error = %e, "scheduler: failed to create collection run");
            return None;
        }
    };
    if let Err(e) = viralwatch_db::start_collection_run(pool, run.id).await {
        tracing::error!(run_id = run.id, error = %e, "scheduler: failed to start collection run");
        return None;
    }
    Some(run.id)
}

async fn finish_run(pool: &PgPool, id: i64, result: Result<&RunStats, String>) {
    let outcome = match result {
        Ok(stats) => viralwatch_db::complete_collection_run(pool, id, stats).await,
        Err(message) => viralwatch_db::fail_collection_run(pool, id, &message).await,
    };
    if let Err(e) = outcome {
        tracing::error!(run_id = id, error = %e, "scheduler: failed to finalize collection run");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watch(yaml_sources: &str) -> WatchConfig {
        WatchConfig::from_yaml_str(&format!(
            "keywords: [glass skin]\npriority_keywords: [glass skin]\nsurge_window_secs: 3600\n{yaml_sources}"
        ))
        .unwrap()
    }

    #[test]
    fn only_sources_with_endpoints_are_polled() {
        let watch = watch(
            "sources:\n  marketplace:\n    capacity: 60\n    reset_window_secs: 3600\n    poll_interval_secs: 600\n    endpoint: http://scraper.local/bestsellers\n",
        );
        let targets = poll_targets(&watch);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].source, SourcePlatform::Marketplace);
        assert_eq!(targets[0].interval, Duration::from_secs(600));
        assert_eq!(targets[0].request_cost, 1);
    }

    #[test]
    fn no_endpoints_means_no_poll_jobs() {
        assert!(poll_targets(&watch("")).is_empty());
    }

    #[test]
    fn surge_runs_four_times_per_window() {
        assert_eq!(surge_interval(&watch("")), Duration::from_secs(900));
    }
}
