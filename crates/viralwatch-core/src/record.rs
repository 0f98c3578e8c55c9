use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{EntityKey, SourcePlatform};

/// Well-known metric names. Other names are preserved but never scored.
pub mod metric {
    pub const VIEWS: &str = "views";
    pub const LIKES: &str = "likes";
    pub const COMMENTS: &str = "comments";
    pub const RANK: &str = "rank";
    pub const RANK_CHANGE: &str = "rank_change";
    pub const PRICE: &str = "price";
    pub const POSTS: &str = "posts";
}

/// Well-known text field names.
pub mod text {
    pub const TITLE: &str = "title";
    pub const DESCRIPTION: &str = "description";
    pub const TOP_COMMENTS: &str = "top_comments";
    pub const BRAND: &str = "brand";
    pub const HASHTAG: &str = "hashtag";
    pub const CHANNEL: &str = "channel";
}

/// One platform-agnostic observation of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub source_platform: SourcePlatform,
    pub natural_key: String,
    pub observed_at: DateTime<Utc>,
    pub metrics: BTreeMap<String, f64>,
    pub text_fields: BTreeMap<String, String>,
    #[serde(default)]
    pub detected_keywords: BTreeSet<String>,
    #[serde(default)]
    pub detected_brands: BTreeSet<String>,
}

impl CanonicalRecord {
    #[must_use]
    pub fn entity_key(&self) -> EntityKey {
        EntityKey::new(self.source_platform, self.natural_key.clone())
    }

    #[must_use]
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    /// Metric value with missing entries counted as zero.
    #[must_use]
    pub fn metric_or_zero(&self, name: &str) -> f64 {
        self.metric(name).unwrap_or(0.0)
    }

    #[must_use]
    pub fn text(&self, name: &str) -> Option<&str> {
        self.text_fields.get(name).map(String::as_str)
    }

    /// True when the record mentions `term` as a keyword or a brand.
    #[must_use]
    pub fn mentions(&self, term: &str) -> bool {
        self.detected_keywords.contains(term) || self.detected_brands.contains(term)
    }
}

/// Composite score derived from one entity's series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViralScore {
    pub source_platform: SourcePlatform,
    pub natural_key: String,
    pub observed_at: DateTime<Utc>,
    /// Within `[0, SCORE_SCALE]`.
    pub score: f64,
    /// View gain per hour between the two latest points.
    pub velocity: f64,
    pub engagement_rate: f64,
    pub keyword_relevance: f64,
    /// Equal to the latest point's `observed_at`.
    pub computed_at: DateTime<Utc>,
}

impl ViralScore {
    #[must_use]
    pub fn entity_key(&self) -> EntityKey {
        EntityKey::new(self.source_platform, self.natural_key.clone())
    }
}

/// A term gaining velocity on two or more platforms in the same window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurgeEvent {
    pub brand_or_keyword: String,
    pub platforms_involved: BTreeSet<SourcePlatform>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub severity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceDirection {
    BelowReference,
    AboveReference,
}

impl std::fmt::Display for PriceDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PriceDirection::BelowReference => write!(f, "below_reference"),
            PriceDirection::AboveReference => write!(f, "above_reference"),
        }
    }
}

/// Observed marketplace price diverging from a reference price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrageSignal {
    pub natural_key: String,
    pub observed_price: f64,
    pub reference_price: f64,
    pub reference_source: String,
    pub relative_margin: f64,
    pub direction: PriceDirection,
    pub observed_at: DateTime<Utc>,
}

/// Latest clean scored observation of one entity, as seen by surge detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VelocitySample {
    pub platform: SourcePlatform,
    pub natural_key: String,
    /// Detected keywords and brands of the sampled observation.
    pub terms: BTreeSet<String>,
    pub velocity: f64,
    pub observed_at: DateTime<Utc>,
}
