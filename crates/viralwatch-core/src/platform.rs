use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// External platform family an observation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourcePlatform {
    /// Video platform statistics API (view/like/comment counters).
    Video,
    /// E-commerce ranking pages (rank, price).
    Marketplace,
    /// Short-video trend pages (hashtag views/posts).
    ShortVideo,
}

impl SourcePlatform {
    pub const ALL: [SourcePlatform; 3] = [
        SourcePlatform::Video,
        SourcePlatform::Marketplace,
        SourcePlatform::ShortVideo,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SourcePlatform::Video => "video",
            SourcePlatform::Marketplace => "marketplace",
            SourcePlatform::ShortVideo => "short_video",
        }
    }
}

impl std::fmt::Display for SourcePlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourcePlatform {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "video" => Ok(SourcePlatform::Video),
            "marketplace" => Ok(SourcePlatform::Marketplace),
            "short_video" => Ok(SourcePlatform::ShortVideo),
            other => Err(CoreError::UnknownPlatform(other.to_string())),
        }
    }
}

/// Identity of a tracked entity: its platform plus the platform's own id.
///
/// Two records with the same key describe the same entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub platform: SourcePlatform,
    pub natural_key: String,
}

impl EntityKey {
    #[must_use]
    pub fn new(platform: SourcePlatform, natural_key: impl Into<String>) -> Self {
        Self {
            platform,
            natural_key: natural_key.into(),
        }
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.platform, self.natural_key)
    }
}
