use std::net::SocketAddr;
use std::path::PathBuf;

use crate::SourcePlatform;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Process-level settings read from `VIRALWATCH_*` environment variables.
///
/// Tuning that operators edit alongside the keyword lists lives in the
/// watchlist YAML instead; see [`crate::WatchConfig`].
#[derive(Clone)]
pub struct AppConfig {
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub watchlist_path: PathBuf,
    /// `None` runs the service against the in-memory store.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub video_api_keys: Vec<String>,
    pub marketplace_proxies: Vec<String>,
    pub short_video_proxies: Vec<String>,
    pub webhook_urls: Vec<String>,
    pub collector_request_timeout_secs: u64,
    pub collector_user_agent: String,
    pub collector_max_wait_secs: u64,
}

impl AppConfig {
    /// Credential identifiers registered for `platform`: API keys for the
    /// video source, proxy endpoints for the scraped sources.
    #[must_use]
    pub fn credentials_for(&self, platform: SourcePlatform) -> &[String] {
        match platform {
            SourcePlatform::Video => &self.video_api_keys,
            SourcePlatform::Marketplace => &self.marketplace_proxies,
            SourcePlatform::ShortVideo => &self.short_video_proxies,
        }
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redacted_count = |items: &[String]| format!("[{} redacted]", items.len());
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("watchlist_path", &self.watchlist_path)
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[redacted]"),
            )
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("video_api_keys", &redacted_count(&self.video_api_keys))
            .field(
                "marketplace_proxies",
                &redacted_count(&self.marketplace_proxies),
            )
            .field(
                "short_video_proxies",
                &redacted_count(&self.short_video_proxies),
            )
            .field("webhook_urls", &redacted_count(&self.webhook_urls))
            .field(
                "collector_request_timeout_secs",
                &self.collector_request_timeout_secs,
            )
            .field("collector_user_agent", &self.collector_user_agent)
            .field("collector_max_wait_secs", &self.collector_max_wait_secs)
            .finish()
    }
}
