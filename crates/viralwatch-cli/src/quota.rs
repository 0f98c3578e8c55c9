use std::fmt::Write as _;
use std::str::FromStr;

use chrono::Utc;
use viralwatch_access::{AccessBudget, AccessCoordinator, CredentialKind};
use viralwatch_core::{AppConfig, SourcePlatform};

/// Print the budget table for every source, or just `source`.
///
/// The coordinator is built fresh from the watchlist, so the table shows
/// configured capacity rather than a running server's usage.
///
/// # Errors
///
/// Returns an error if the watchlist cannot be loaded or `source` is not a
/// known platform.
pub(crate) fn run_quota(config: &AppConfig, source: Option<&str>) -> anyhow::Result<()> {
    let watch = viralwatch_core::load_watchlist(&config.watchlist_path)?;
    let sources = match source {
        Some(raw) => vec![SourcePlatform::from_str(raw)?],
        None => SourcePlatform::ALL.to_vec(),
    };

    let coordinator = AccessCoordinator::from_config(&watch, config, Utc::now());
    let mut rows = Vec::new();
    for platform in sources {
        for budget in coordinator.budgets(platform)? {
            rows.push((platform, budget));
        }
    }
    print!("{}", render_budgets(&rows));
    Ok(())
}

pub(crate) fn render_budgets(rows: &[(SourcePlatform, AccessBudget)]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<12} {:<10} {:<8} {:>9} {:>9} {:<13} RESETS",
        "SOURCE", "CREDENTIAL", "KIND", "REMAINING", "CAPACITY", "STATUS"
    );
    for (platform, budget) in rows {
        let kind = match budget.kind {
            CredentialKind::ApiKey => "api_key",
            CredentialKind::Proxy => "proxy",
            CredentialKind::Direct => "direct",
        };
        let _ = writeln!(
            out,
            "{:<12} {:<10} {:<8} {:>9} {:>9} {:<13} {}",
            platform.as_str(),
            budget.identifier,
            kind,
            budget.remaining,
            budget.capacity,
            budget.status.to_string(),
            budget.reset_at.format("%Y-%m-%d %H:%M:%SZ"),
        );
    }
    out
}
