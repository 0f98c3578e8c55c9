use crate::app_config::{AppConfig, Environment};
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if values are present but invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Does not read `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if values are present but invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Split a comma-separated list, dropping blanks.
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Build the config from an arbitrary variable lookup.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidEnvVar`] when a variable cannot be parsed.
pub fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::net::SocketAddr;
    use std::path::PathBuf;

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let invalid = |var: &str, reason: String| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason,
    };

    let parse_addr = |var: &str, default: &str| -> Result<SocketAddr, ConfigError> {
        or_default(var, default)
            .parse::<SocketAddr>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        or_default(var, default)
            .parse::<u32>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        or_default(var, default)
            .parse::<u64>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let list = |var: &str| -> Vec<String> {
        lookup(var)
            .map(|v| split_list(&v))
            .unwrap_or_default()
    };

    let env = parse_environment(&or_default("VIRALWATCH_ENV", "development"))
        .map_err(|reason| invalid("VIRALWATCH_ENV", reason))?;

    let bind_addr = parse_addr("VIRALWATCH_BIND_ADDR", "0.0.0.0:3000")?;
    let log_level = or_default("VIRALWATCH_LOG_LEVEL", "info");
    let watchlist_path = PathBuf::from(or_default(
        "VIRALWATCH_WATCHLIST_PATH",
        "./config/watchlist.yaml",
    ));

    let database_url = lookup("DATABASE_URL").ok().filter(|v| !v.trim().is_empty());
    let db_max_connections = parse_u32("VIRALWATCH_DB_MAX_CONNECTIONS", "10")?;
    let db_min_connections = parse_u32("VIRALWATCH_DB_MIN_CONNECTIONS", "1")?;
    let db_acquire_timeout_secs = parse_u64("VIRALWATCH_DB_ACQUIRE_TIMEOUT_SECS", "10")?;
    if db_min_connections > db_max_connections {
        return Err(invalid(
            "VIRALWATCH_DB_MIN_CONNECTIONS",
            format!("must not exceed VIRALWATCH_DB_MAX_CONNECTIONS ({db_max_connections})"),
        ));
    }

    let video_api_keys = list("VIRALWATCH_VIDEO_API_KEYS");
    let marketplace_proxies = list("VIRALWATCH_MARKETPLACE_PROXIES");
    let short_video_proxies = list("VIRALWATCH_SHORT_VIDEO_PROXIES");
    let webhook_urls = list("VIRALWATCH_WEBHOOK_URLS");

    let collector_request_timeout_secs = parse_u64("VIRALWATCH_COLLECTOR_TIMEOUT_SECS", "30")?;
    let collector_user_agent = or_default(
        "VIRALWATCH_COLLECTOR_USER_AGENT",
        "viralwatch/0.1 (trend-monitor)",
    );
    let collector_max_wait_secs = parse_u64("VIRALWATCH_COLLECTOR_MAX_WAIT_SECS", "120")?;

    Ok(AppConfig {
        env,
        bind_addr,
        log_level,
        watchlist_path,
        database_url,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        video_api_keys,
        marketplace_proxies,
        short_video_proxies,
        webhook_urls,
        collector_request_timeout_secs,
        collector_user_agent,
        collector_max_wait_secs,
    })
}

fn parse_environment(s: &str) -> Result<Environment, String> {
    match s.trim().to_lowercase().as_str() {
        "development" | "dev" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" | "prod" => Ok(Environment::Production),
        other => Err(format!(
            "unknown environment '{other}', expected development, test, or production"
        )),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
