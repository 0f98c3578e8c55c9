use std::fmt::Write as _;

use viralwatch_core::{AppConfig, SourcePlatform, WatchConfig};

/// Load the watchlist and print what the service would run with.
///
/// Environment errors surface before this is reached, when `main` loads
/// [`AppConfig`]; watchlist validation errors name the offending field.
///
/// # Errors
///
/// Returns an error if the watchlist cannot be read or fails validation.
pub(crate) fn run_config_check(config: &AppConfig) -> anyhow::Result<()> {
    let watch = viralwatch_core::load_watchlist(&config.watchlist_path)?;
    print!("{}", render_check(config, &watch));
    println!("configuration ok");
    Ok(())
}

/// Secrets are reported as counts only.
pub(crate) fn render_check(config: &AppConfig, watch: &WatchConfig) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "environment:     {}", config.env);
    let _ = writeln!(out, "bind address:    {}", config.bind_addr);
    let _ = writeln!(out, "watchlist:       {}", config.watchlist_path.display());
    let _ = writeln!(
        out,
        "database:        {}",
        if config.database_url.is_some() {
            "configured"
        } else {
            "not configured (in-memory store)"
        }
    );
    let _ = writeln!(out, "webhooks:        {}", config.webhook_urls.len());
    let _ = writeln!(
        out,
        "keywords:        {} ({} priority), brands: {}, spam patterns: {}",
        watch.keyword_set().len(),
        watch.priority_set().len(),
        watch.brand_set().len(),
        watch.spam_patterns.len()
    );
    let _ = writeln!(
        out,
        "alert threshold: {}, surge window: {}s",
        watch.alert_score_threshold, watch.surge_window_secs
    );
    for platform in SourcePlatform::ALL {
        let source = watch.sources.get(platform);
        let _ = writeln!(
            out,
            "source {:<12} capacity {} per {}s, poll every {}s, credentials {}, endpoint {}",
            platform.as_str(),
            source.capacity,
            source.reset_window_secs,
            source.poll_interval_secs,
            config.credentials_for(platform).len(),
            source.endpoint.as_deref().unwrap_or("none"),
        );
    }
    out
}
