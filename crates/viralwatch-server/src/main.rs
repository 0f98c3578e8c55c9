mod api;
mod middleware;
mod scheduler;

use std::sync::Arc;

use chrono::Utc;
use tracing_subscriber::EnvFilter;
use viralwatch_access::AccessCoordinator;
use viralwatch_alert::{Fanout, LogNotifier, WebhookNotifier};
use viralwatch_core::{AppConfig, Environment, MemoryStore};
use viralwatch_db::{AnyStore, PgStore};
use viralwatch_pipeline::Pipeline;

use crate::{
    api::{build_app, default_rate_limit_state, AppState},
    middleware::AuthState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(viralwatch_core::load_app_config()?);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let watch = viralwatch_core::load_watchlist(&config.watchlist_path)?;
    tracing::info!(
        path = %config.watchlist_path.display(),
        keywords = watch.keyword_set().len(),
        brands = watch.brand_set().len(),
        "watchlist loaded"
    );

    let store = open_store(&config).await?;
    let coordinator = Arc::new(AccessCoordinator::from_config(&watch, &config, Utc::now()));
    let notifier = Fanout(
        LogNotifier,
        WebhookNotifier::new(
            config.webhook_urls.clone(),
            config.collector_request_timeout_secs,
        )?,
    );
    let pipeline = Arc::new(Pipeline::new(&watch, coordinator, store, notifier)?);
    let state = AppState { pipeline };

    let _scheduler =
        scheduler::build_scheduler(state.clone(), &watch, Arc::clone(&config)).await?;

    let auth = AuthState::from_env(matches!(config.env, Environment::Development))?;
    let app = build_app(state, auth, default_rate_limit_state());

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, env = %config.env, "viralwatch-server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Postgres when `DATABASE_URL` is set; the in-memory store is only allowed
/// in development.
async fn open_store(config: &AppConfig) -> anyhow::Result<AnyStore> {
    if config.database_url.is_none() {
        if config.env != Environment::Development {
            anyhow::bail!("DATABASE_URL is required outside development");
        }
        tracing::warn!("DATABASE_URL not set; using the in-memory store");
        return Ok(AnyStore::Memory(MemoryStore::new()));
    }

    let pool = viralwatch_db::connect_pool_from_config(config).await?;
    let applied = viralwatch_db::run_migrations(&pool).await?;
    tracing::info!(applied, "database migrations up to date");
    Ok(AnyStore::Postgres(PgStore::new(pool)))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
