use std::collections::BTreeSet;

use viralwatch_core::{text, CanonicalRecord, WatchConfig};

/// Case-insensitive keyword and brand detection over a record's title,
/// description, and hashtag.
///
/// Hashtags carry no spaces, so they are also matched against each term with
/// spaces and hyphens removed (`"glass skin"` matches `#glassskin`).
#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    keywords: Vec<Term>,
    brands: Vec<Term>,
}

#[derive(Debug, Clone)]
struct Term {
    name: String,
    compact: String,
}

impl Term {
    fn new(name: String) -> Self {
        let compact = name.chars().filter(|c| !matches!(c, ' ' | '-')).collect();
        Self { name, compact }
    }

    fn found_in(&self, haystack: &str, hashtag: Option<&str>) -> bool {
        haystack.contains(&self.name)
            || hashtag.is_some_and(|h| h.contains(&self.name) || h.contains(&self.compact))
    }
}

impl KeywordMatcher {
    /// Terms are lowercased and trimmed; blanks are dropped.
    pub fn new<K, B>(keywords: K, brands: B) -> Self
    where
        K: IntoIterator<Item = String>,
        B: IntoIterator<Item = String>,
    {
        let prepare =
            |terms: BTreeSet<String>| -> Vec<Term> { terms.into_iter().map(Term::new).collect() };
        let normalize = |t: String| t.trim().to_lowercase();
        Self {
            keywords: prepare(
                keywords
                    .into_iter()
                    .map(normalize)
                    .filter(|t| !t.is_empty())
                    .collect(),
            ),
            brands: prepare(
                brands
                    .into_iter()
                    .map(normalize)
                    .filter(|t| !t.is_empty())
                    .collect(),
            ),
        }
    }

    /// Keyword set plus priority keywords, and the brand list.
    #[must_use]
    pub fn from_watchlist(config: &WatchConfig) -> Self {
        Self::new(config.keyword_set(), config.brand_set())
    }

    /// Fill `detected_keywords` and `detected_brands`.
    ///
    /// Returns whether the record is scoring-eligible, i.e. mentions at least
    /// one tracked keyword or brand.
    pub fn annotate(&self, record: &mut CanonicalRecord) -> bool {
        let haystack = [text::TITLE, text::DESCRIPTION]
            .iter()
            .filter_map(|name| record.text(name))
            .collect::<Vec<_>>()
            .join("\n")
            .to_lowercase();
        let hashtag = record.text(text::HASHTAG).map(str::to_lowercase);

        let detect = |terms: &[Term]| -> BTreeSet<String> {
            terms
                .iter()
                .filter(|t| t.found_in(&haystack, hashtag.as_deref()))
                .map(|t| t.name.clone())
                .collect()
        };
        record.detected_keywords = detect(&self.keywords);
        record.detected_brands = detect(&self.brands);

        !(record.detected_keywords.is_empty() && record.detected_brands.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;
    use viralwatch_core::SourcePlatform;

    use super::*;

    fn matcher() -> KeywordMatcher {
        KeywordMatcher::new(
            ["Glass Skin".to_string(), "snail mucin".to_string(), " ".to_string()],
            ["COSRX".to_string(), "Beauty of Joseon".to_string()],
        )
    }

    fn record(fields: &[(&str, &str)]) -> CanonicalRecord {
        CanonicalRecord {
            source_platform: SourcePlatform::Video,
            natural_key: "k".to_string(),
            observed_at: Utc::now(),
            metrics: BTreeMap::new(),
            text_fields: fields
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            detected_keywords: BTreeSet::new(),
            detected_brands: BTreeSet::new(),
        }
    }

    #[test]
    fn detects_keywords_and_brands_case_insensitively() {
        let mut rec = record(&[
            (text::TITLE, "GLASS SKIN in 3 steps"),
            (text::DESCRIPTION, "using cosrx Snail Mucin"),
        ]);
        assert!(matcher().annotate(&mut rec));
        assert_eq!(
            rec.detected_keywords.iter().collect::<Vec<_>>(),
            vec!["glass skin", "snail mucin"]
        );
        assert_eq!(rec.detected_brands.iter().collect::<Vec<_>>(), vec!["cosrx"]);
    }

    #[test]
    fn comments_are_not_matched() {
        let mut rec = record(&[
            (text::TITLE, "morning vlog"),
            (text::TOP_COMMENTS, "glass skin goals"),
        ]);
        assert!(!matcher().annotate(&mut rec));
        assert!(rec.detected_keywords.is_empty());
    }

    #[test]
    fn hashtags_match_compacted_terms() {
        let mut rec = record(&[(text::HASHTAG, "glassskin")]);
        assert!(matcher().annotate(&mut rec));
        assert!(rec.detected_keywords.contains("glass skin"));

        let mut rec = record(&[(text::HASHTAG, "beautyofjoseonsunscreen")]);
        assert!(matcher().annotate(&mut rec));
        assert!(rec.detected_brands.contains("beauty of joseon"));
    }

    #[test]
    fn reannotation_replaces_previous_detection() {
        let mut rec = record(&[(text::TITLE, "glass skin")]);
        rec.detected_keywords.insert("stale".to_string());
        matcher().annotate(&mut rec);
        assert!(!rec.detected_keywords.contains("stale"));
    }
}
