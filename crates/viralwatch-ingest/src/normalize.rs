//! Conversion from raw platform payloads to [`CanonicalRecord`].
//!
//! Value parsing lives in [`crate::parse`]; this module only knows where
//! each platform keeps its identity, counters, and text.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use viralwatch_core::{metric, text, CanonicalRecord, SourcePlatform};

use crate::error::Rejected;
use crate::parse::{
    count_from_value, extract_asin, parse_compact_count, price_from_value, string_from_value,
};

const DEFAULT_SHORT_VIDEO_PLATFORM: &str = "tiktok";

/// Canonicalize one raw payload.
///
/// `observed_at` in the payload (RFC 3339) wins over `received_at`.
///
/// # Errors
///
/// - [`Rejected::Malformed`] for non-object payloads or an unparseable
///   `observed_at`.
/// - [`Rejected::Incomplete`] when the natural key or every essential metric
///   is missing.
pub fn normalize(
    raw: &Value,
    platform: SourcePlatform,
    received_at: DateTime<Utc>,
) -> Result<CanonicalRecord, Rejected> {
    let Value::Object(obj) = raw else {
        return Err(Rejected::Malformed {
            platform,
            reason: format!("expected a JSON object, got {}", json_kind(raw)),
        });
    };

    let observed_at = observed_at(obj, platform)?.unwrap_or(received_at);

    let mut draft = if is_canonical_shape(obj) {
        canonical_draft(obj)
    } else {
        match platform {
            SourcePlatform::Video => video_draft(obj),
            SourcePlatform::Marketplace => marketplace_draft(obj),
            SourcePlatform::ShortVideo => short_video_draft(obj),
        }
    };

    if let Some(Value::Object(extra)) = obj.get("metrics") {
        for (name, value) in extra {
            if let Some(v) = count_from_value(value) {
                draft.metrics.entry(name.clone()).or_insert(v);
            }
        }
    }

    let Some(natural_key) = draft.natural_key else {
        return Err(Rejected::Incomplete {
            platform,
            reason: "missing natural key".to_string(),
        });
    };

    let essential = essential_metrics(platform);
    if !draft.metrics.keys().any(|k| essential.contains(&k.as_str())) {
        return Err(Rejected::Incomplete {
            platform,
            reason: format!("none of the essential metrics present: {}", essential.join(", ")),
        });
    }

    Ok(CanonicalRecord {
        source_platform: platform,
        natural_key,
        observed_at,
        metrics: draft.metrics,
        text_fields: draft.text_fields,
        detected_keywords: BTreeSet::new(),
        detected_brands: BTreeSet::new(),
    })
}

#[derive(Default)]
struct Draft {
    natural_key: Option<String>,
    metrics: BTreeMap<String, f64>,
    text_fields: BTreeMap<String, String>,
}

impl Draft {
    fn count(&mut self, name: &str, value: Option<&Value>) {
        if let Some(v) = value.and_then(count_from_value) {
            self.metrics.insert(name.to_string(), v);
        }
    }

    fn text(&mut self, name: &str, value: Option<&Value>) {
        if let Some(s) = value.and_then(string_from_value) {
            self.text_fields.insert(name.to_string(), s);
        }
    }
}

fn essential_metrics(platform: SourcePlatform) -> &'static [&'static str] {
    match platform {
        SourcePlatform::Video => &[metric::VIEWS, metric::LIKES, metric::COMMENTS],
        SourcePlatform::Marketplace => &[metric::RANK, metric::PRICE],
        SourcePlatform::ShortVideo => &[metric::VIEWS, metric::POSTS],
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn observed_at(
    obj: &Map<String, Value>,
    platform: SourcePlatform,
) -> Result<Option<DateTime<Utc>>, Rejected> {
    match obj.get("observed_at") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| Rejected::Malformed {
                platform,
                reason: format!("observed_at '{s}' is not RFC 3339: {e}"),
            }),
        Some(other) => Err(Rejected::Malformed {
            platform,
            reason: format!("observed_at must be a string, got {}", json_kind(other)),
        }),
    }
}

fn is_canonical_shape(obj: &Map<String, Value>) -> bool {
    obj.contains_key("natural_key") && matches!(obj.get("metrics"), Some(Value::Object(_)))
}

fn canonical_draft(obj: &Map<String, Value>) -> Draft {
    let mut draft = Draft {
        natural_key: obj.get("natural_key").and_then(string_from_value),
        ..Draft::default()
    };
    if let Some(Value::Object(fields)) = obj.get("text_fields") {
        for (name, value) in fields {
            draft.text(name, Some(value));
        }
    }
    draft
}

fn video_draft(obj: &Map<String, Value>) -> Draft {
    // Search results nest the id as {"kind": ..., "videoId": ...}.
    let natural_key = match obj.get("id") {
        Some(Value::Object(id)) => id.get("videoId").and_then(string_from_value),
        other => other.and_then(string_from_value),
    };
    let mut draft = Draft {
        natural_key,
        ..Draft::default()
    };

    if let Some(Value::Object(stats)) = obj.get("statistics") {
        draft.count(metric::VIEWS, stats.get("viewCount"));
        draft.count(metric::LIKES, stats.get("likeCount"));
        draft.count(metric::COMMENTS, stats.get("commentCount"));
    }

    if let Some(Value::Object(snippet)) = obj.get("snippet") {
        draft.text(text::TITLE, snippet.get("title"));
        draft.text(text::DESCRIPTION, snippet.get("description"));
        draft.text(text::CHANNEL, snippet.get("channelTitle"));
    }

    if let Some(Value::Array(comments)) = obj.get("top_comments") {
        let joined = comments
            .iter()
            .filter_map(string_from_value)
            .collect::<Vec<_>>()
            .join("\n");
        if !joined.is_empty() {
            draft.text_fields.insert(text::TOP_COMMENTS.to_string(), joined);
        }
    }

    draft
}

fn marketplace_draft(obj: &Map<String, Value>) -> Draft {
    let natural_key = obj
        .get("asin")
        .and_then(string_from_value)
        .or_else(|| obj.get("product_id").and_then(string_from_value))
        .or_else(|| {
            obj.get("url")
                .and_then(Value::as_str)
                .and_then(extract_asin)
        });
    let mut draft = Draft {
        natural_key,
        ..Draft::default()
    };

    if let Some(rank) = obj.get("rank").and_then(rank_from_value) {
        draft.metrics.insert(metric::RANK.to_string(), rank);
    }
    if let Some(price) = obj.get("price").and_then(price_from_value) {
        draft.metrics.insert(metric::PRICE.to_string(), price);
    }
    if let Some(change) = obj.get("rank_change").and_then(signed_from_value) {
        draft.metrics.insert(metric::RANK_CHANGE.to_string(), change);
    }

    draft.text(text::TITLE, obj.get("title"));
    draft.text(text::BRAND, obj.get("brand"));
    draft
}

fn short_video_draft(obj: &Map<String, Value>) -> Draft {
    let hashtag = obj
        .get("hashtag")
        .and_then(Value::as_str)
        .map(|h| h.replace('#', "").trim().to_lowercase())
        .filter(|h| !h.is_empty());
    let source = obj
        .get("platform")
        .and_then(Value::as_str)
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| DEFAULT_SHORT_VIDEO_PLATFORM.to_string());

    let mut draft = Draft {
        natural_key: hashtag.as_ref().map(|h| format!("{h}@{source}")),
        ..Draft::default()
    };
    draft.count(metric::VIEWS, obj.get("views"));
    draft.count(metric::POSTS, obj.get("posts"));
    if let Some(h) = hashtag {
        draft.text_fields.insert(text::HASHTAG.to_string(), h);
    }
    draft.text(text::DESCRIPTION, obj.get("description"));
    draft
}

/// Ranks arrive as numbers or as `"#12"`.
fn rank_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => parse_compact_count(s.trim().trim_start_matches('#')),
        other => count_from_value(other),
    }
}

/// Rank movement such as `-5`, `"+15"`, or `"-3"`.
fn signed_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => s
            .trim()
            .trim_start_matches('+')
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite()),
        _ => None,
    }
}

#[cfg(test)]
#[path = "normalize_test.rs"]
mod tests;
