use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, SourcePlatform};

/// Upper bound of the viral score; the score weights must sum to this.
pub const SCORE_SCALE: f64 = 10.0;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub velocity: f64,
    pub engagement: f64,
    pub relevance: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            velocity: 4.0,
            engagement: 3.0,
            relevance: 3.0,
        }
    }
}

impl ScoreWeights {
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.velocity + self.engagement + self.relevance
    }
}

/// Budget and polling settings for one source platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Units each credential may spend per reset window.
    pub capacity: u64,
    pub reset_window_secs: u64,
    pub poll_interval_secs: u64,
    /// Units charged per collector request.
    #[serde(default = "default_request_cost")]
    pub request_cost: u64,
    /// Polling endpoint; sources without one are fed only by pushed payloads.
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_request_cost() -> u64 {
    1
}

impl SourceConfig {
    fn video_default() -> Self {
        Self {
            capacity: 10_000,
            reset_window_secs: 86_400,
            poll_interval_secs: 3_600,
            request_cost: 1,
            endpoint: None,
        }
    }

    fn scraped_default() -> Self {
        Self {
            capacity: 60,
            reset_window_secs: 3_600,
            poll_interval_secs: 600,
            request_cost: 1,
            endpoint: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default = "SourceConfig::video_default")]
    pub video: SourceConfig,
    #[serde(default = "SourceConfig::scraped_default")]
    pub marketplace: SourceConfig,
    #[serde(default = "SourceConfig::scraped_default")]
    pub short_video: SourceConfig,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            video: SourceConfig::video_default(),
            marketplace: SourceConfig::scraped_default(),
            short_video: SourceConfig::scraped_default(),
        }
    }
}

impl SourcesConfig {
    #[must_use]
    pub fn get(&self, platform: SourcePlatform) -> &SourceConfig {
        match platform {
            SourcePlatform::Video => &self.video,
            SourcePlatform::Marketplace => &self.marketplace,
            SourcePlatform::ShortVideo => &self.short_video,
        }
    }
}

/// Operator-edited watchlist: tracked terms plus every scoring, surge,
/// arbitrage, and access-control tunable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    pub keywords: Vec<String>,
    pub priority_keywords: Vec<String>,
    #[serde(default)]
    pub brands: Vec<String>,
    #[serde(default)]
    pub spam_patterns: Vec<String>,

    #[serde(default)]
    pub score_weights: ScoreWeights,
    #[serde(default = "defaults::velocity_reference")]
    pub velocity_reference: f64,
    #[serde(default = "defaults::engagement_reference")]
    pub engagement_reference: f64,
    #[serde(default = "defaults::alert_score_threshold")]
    pub alert_score_threshold: f64,

    #[serde(default = "defaults::surge_window_secs")]
    pub surge_window_secs: u64,
    #[serde(default = "defaults::surge_threshold_percentile")]
    pub surge_threshold_percentile: f64,
    #[serde(default = "defaults::surge_min_velocity")]
    pub surge_min_velocity: f64,
    #[serde(default = "defaults::surge_min_entities")]
    pub surge_min_entities: usize,

    #[serde(default = "defaults::arbitrage_min_margin")]
    pub arbitrage_min_margin: f64,
    #[serde(default)]
    pub reference_prices: BTreeMap<String, f64>,

    #[serde(default = "defaults::quota_safety_margin")]
    pub quota_safety_margin: f64,
    #[serde(default = "defaults::proxy_retry_budget_ms")]
    pub proxy_retry_budget_ms: u64,
    #[serde(default = "defaults::block_cooldown_secs")]
    pub block_cooldown_secs: u64,
    #[serde(default = "defaults::backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "defaults::backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    #[serde(default = "defaults::max_network_attempts")]
    pub max_network_attempts: u32,

    #[serde(default = "defaults::series_max_points")]
    pub series_max_points: usize,

    #[serde(default)]
    pub sources: SourcesConfig,
}

mod defaults {
    pub(super) fn velocity_reference() -> f64 {
        1_000.0
    }
    pub(super) fn engagement_reference() -> f64 {
        0.1
    }
    pub(super) fn alert_score_threshold() -> f64 {
        7.0
    }
    pub(super) fn surge_window_secs() -> u64 {
        3_600
    }
    pub(super) fn surge_threshold_percentile() -> f64 {
        0.9
    }
    pub(super) fn surge_min_velocity() -> f64 {
        100.0
    }
    pub(super) fn surge_min_entities() -> usize {
        1
    }
    pub(super) fn arbitrage_min_margin() -> f64 {
        0.2
    }
    pub(super) fn quota_safety_margin() -> f64 {
        0.95
    }
    pub(super) fn proxy_retry_budget_ms() -> u64 {
        5_000
    }
    pub(super) fn block_cooldown_secs() -> u64 {
        300
    }
    pub(super) fn backoff_base_ms() -> u64 {
        500
    }
    pub(super) fn backoff_cap_ms() -> u64 {
        30_000
    }
    pub(super) fn max_network_attempts() -> u32 {
        3
    }
    pub(super) fn series_max_points() -> usize {
        256
    }
}

impl WatchConfig {
    /// Parse and validate a watchlist from YAML text.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::WatchlistParse` on malformed YAML and
    /// `ConfigError::Validation` when a field is out of range.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: WatchConfig = serde_yaml::from_str(content)?;
        validate_watchlist(&config)?;
        Ok(config)
    }

    /// Lowercased keyword set, including priority keywords.
    #[must_use]
    pub fn keyword_set(&self) -> BTreeSet<String> {
        normalize_terms(self.keywords.iter().chain(&self.priority_keywords))
    }

    #[must_use]
    pub fn priority_set(&self) -> BTreeSet<String> {
        normalize_terms(&self.priority_keywords)
    }

    #[must_use]
    pub fn brand_set(&self) -> BTreeSet<String> {
        normalize_terms(&self.brands)
    }

    /// Every tracked term (keywords and brands), the domain of surge detection.
    #[must_use]
    pub fn tracked_terms(&self) -> BTreeSet<String> {
        let mut terms = self.keyword_set();
        terms.extend(self.brand_set());
        terms
    }
}

fn normalize_terms<'a, I>(terms: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a String>,
{
    terms
        .into_iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Load and validate the watchlist from a YAML file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_watchlist(path: &Path) -> Result<WatchConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::WatchlistIo {
        path: path.display().to_string(),
        source: e,
    })?;

    WatchConfig::from_yaml_str(&content)
}

fn require_positive(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!(
            "{field} must be a positive number, got {value}"
        )))
    }
}

fn require_nonzero(field: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::Validation(format!("{field} must be > 0")))
    } else {
        Ok(())
    }
}

fn validate_terms(field: &str, terms: &[String]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for term in terms {
        let normalized = term.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(ConfigError::Validation(format!(
                "{field} entries must be non-empty"
            )));
        }
        if !seen.insert(normalized) {
            return Err(ConfigError::Validation(format!(
                "duplicate entry in {field}: '{term}'"
            )));
        }
    }
    Ok(())
}

#[allow(clippy::too_many_lines)]
fn validate_watchlist(config: &WatchConfig) -> Result<(), ConfigError> {
    if config.keywords.is_empty() {
        return Err(ConfigError::Validation(
            "keywords must list at least one term".to_string(),
        ));
    }
    if config.priority_keywords.is_empty() {
        return Err(ConfigError::Validation(
            "priority_keywords must list at least one term".to_string(),
        ));
    }
    validate_terms("keywords", &config.keywords)?;
    validate_terms("priority_keywords", &config.priority_keywords)?;
    validate_terms("brands", &config.brands)?;

    for pattern in &config.spam_patterns {
        if pattern.trim().is_empty() {
            return Err(ConfigError::Validation(
                "spam_patterns entries must be non-empty".to_string(),
            ));
        }
    }

    let weights = &config.score_weights;
    for (field, value) in [
        ("score_weights.velocity", weights.velocity),
        ("score_weights.engagement", weights.engagement),
        ("score_weights.relevance", weights.relevance),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(ConfigError::Validation(format!(
                "{field} must be a non-negative number, got {value}"
            )));
        }
    }
    if (weights.sum() - SCORE_SCALE).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(ConfigError::Validation(format!(
            "score_weights must sum to {SCORE_SCALE}, got {}",
            weights.sum()
        )));
    }

    require_positive("velocity_reference", config.velocity_reference)?;
    require_positive("engagement_reference", config.engagement_reference)?;

    if !(0.0..=SCORE_SCALE).contains(&config.alert_score_threshold) {
        return Err(ConfigError::Validation(format!(
            "alert_score_threshold must be within [0, {SCORE_SCALE}], got {}",
            config.alert_score_threshold
        )));
    }

    require_nonzero("surge_window_secs", config.surge_window_secs)?;
    if !(config.surge_threshold_percentile > 0.0 && config.surge_threshold_percentile <= 1.0) {
        return Err(ConfigError::Validation(format!(
            "surge_threshold_percentile must be within (0, 1], got {}",
            config.surge_threshold_percentile
        )));
    }
    if !config.surge_min_velocity.is_finite() || config.surge_min_velocity < 0.0 {
        return Err(ConfigError::Validation(format!(
            "surge_min_velocity must be a non-negative number, got {}",
            config.surge_min_velocity
        )));
    }
    if config.surge_min_entities == 0 {
        return Err(ConfigError::Validation(
            "surge_min_entities must be >= 1".to_string(),
        ));
    }

    if !config.arbitrage_min_margin.is_finite() || config.arbitrage_min_margin < 0.0 {
        return Err(ConfigError::Validation(format!(
            "arbitrage_min_margin must be a non-negative number, got {}",
            config.arbitrage_min_margin
        )));
    }
    for (key, price) in &config.reference_prices {
        if !price.is_finite() || *price <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "reference_prices['{key}'] must be a positive price, got {price}"
            )));
        }
    }

    if !(config.quota_safety_margin > 0.0 && config.quota_safety_margin <= 1.0) {
        return Err(ConfigError::Validation(format!(
            "quota_safety_margin must be within (0, 1], got {}",
            config.quota_safety_margin
        )));
    }
    require_nonzero("proxy_retry_budget_ms", config.proxy_retry_budget_ms)?;
    require_nonzero("backoff_base_ms", config.backoff_base_ms)?;
    if config.backoff_cap_ms < config.backoff_base_ms {
        return Err(ConfigError::Validation(format!(
            "backoff_cap_ms ({}) must be >= backoff_base_ms ({})",
            config.backoff_cap_ms, config.backoff_base_ms
        )));
    }
    if config.max_network_attempts == 0 {
        return Err(ConfigError::Validation(
            "max_network_attempts must be >= 1".to_string(),
        ));
    }
    if config.series_max_points < 2 {
        return Err(ConfigError::Validation(
            "series_max_points must be >= 2 to compute velocity".to_string(),
        ));
    }

    for platform in SourcePlatform::ALL {
        let source = config.sources.get(platform);
        let prefix = format!("sources.{platform}");
        require_nonzero(&format!("{prefix}.capacity"), source.capacity)?;
        require_nonzero(
            &format!("{prefix}.reset_window_secs"),
            source.reset_window_secs,
        )?;
        require_nonzero(
            &format!("{prefix}.poll_interval_secs"),
            source.poll_interval_secs,
        )?;
        require_nonzero(&format!("{prefix}.request_cost"), source.request_cost)?;
        if source.request_cost > source.capacity {
            return Err(ConfigError::Validation(format!(
                "{prefix}.request_cost ({}) exceeds capacity ({})",
                source.request_cost, source.capacity
            )));
        }
        if let Some(endpoint) = &source.endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(ConfigError::Validation(format!(
                    "{prefix}.endpoint must be an http(s) URL, got '{endpoint}'"
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
#[path = "watchlist_test.rs"]
mod tests;
