//! Value parsers for the loosely-typed fields scraped pages and APIs return.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static COMPACT_COUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*([0-9][0-9,]*(?:\.[0-9]+)?)\s*([kmb])?\b").expect("valid count regex")
});

static PRICE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9][0-9,]*(?:\.[0-9]+)?)").expect("valid price regex"));

static ASIN_IN_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/dp/([A-Za-z0-9]{10})(?:[/?#]|$)").expect("valid asin regex"));

/// Parse counts like `"1.2M views"`, `"15K"`, `"3,400"`, or `"2b"`.
///
/// Returns `None` when the text does not start with a number.
#[must_use]
pub fn parse_compact_count(text: &str) -> Option<f64> {
    let caps = COMPACT_COUNT.captures(text)?;
    let number: f64 = caps.get(1)?.as_str().replace(',', "").parse().ok()?;
    let multiplier = match caps.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
        Some(suffix) if suffix == "k" => 1_000.0,
        Some(suffix) if suffix == "m" => 1_000_000.0,
        Some(suffix) if suffix == "b" => 1_000_000_000.0,
        _ => 1.0,
    };
    Some(number * multiplier)
}

/// Parse a price such as `"$1,299.99"` or `"USD 19.50"`.
#[must_use]
pub fn parse_price(text: &str) -> Option<f64> {
    let caps = PRICE.captures(text)?;
    caps.get(1)?.as_str().replace(',', "").parse().ok()
}

/// Extract the ASIN from a product URL's `/dp/<asin>` segment.
#[must_use]
pub fn extract_asin(url: &str) -> Option<String> {
    ASIN_IN_URL
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Numeric value of a JSON field that may be a number or a count string.
#[must_use]
pub fn count_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => parse_compact_count(s),
        _ => None,
    }
}

/// Numeric value of a JSON field that may be a number or a price string.
#[must_use]
pub fn price_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => parse_price(s),
        _ => None,
    }
}

/// Non-empty trimmed string from a JSON string or number.
#[must_use]
pub fn string_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_count_suffixes() {
        assert_eq!(parse_compact_count("1.2M views"), Some(1_200_000.0));
        assert_eq!(parse_compact_count("15K"), Some(15_000.0));
        assert_eq!(parse_compact_count("2b"), Some(2_000_000_000.0));
        assert_eq!(parse_compact_count("3,400"), Some(3_400.0));
        assert_eq!(parse_compact_count("  812 "), Some(812.0));
    }

    #[test]
    fn compact_count_rejects_non_numeric() {
        assert_eq!(parse_compact_count("views: many"), None);
        assert_eq!(parse_compact_count(""), None);
    }

    #[test]
    fn compact_count_ignores_unrelated_words() {
        assert_eq!(parse_compact_count("12 Mio"), Some(12.0));
    }

    #[test]
    fn price_strips_currency_and_separators() {
        assert_eq!(parse_price("$1,299.99"), Some(1_299.99));
        assert_eq!(parse_price("USD 19.50"), Some(19.5));
        assert_eq!(parse_price("$12"), Some(12.0));
        assert_eq!(parse_price("free"), None);
    }

    #[test]
    fn asin_from_product_url() {
        assert_eq!(
            extract_asin("https://www.amazon.com/COSRX-Snail-Mucin/dp/B00PBX3L7K/ref=zg_bs"),
            Some("B00PBX3L7K".to_string())
        );
        assert_eq!(
            extract_asin("https://www.amazon.com/dp/B0BNQ7ZKLN?th=1"),
            Some("B0BNQ7ZKLN".to_string())
        );
        assert_eq!(extract_asin("https://www.amazon.com/gp/bestsellers"), None);
    }

    #[test]
    fn count_from_value_accepts_strings_and_numbers() {
        assert_eq!(count_from_value(&serde_json::json!("12345")), Some(12_345.0));
        assert_eq!(count_from_value(&serde_json::json!(42)), Some(42.0));
        assert_eq!(count_from_value(&serde_json::json!(null)), None);
        assert_eq!(count_from_value(&serde_json::json!(["1"])), None);
    }

    #[test]
    fn string_from_value_trims_and_drops_blank() {
        assert_eq!(
            string_from_value(&serde_json::json!("  abc ")),
            Some("abc".to_string())
        );
        assert_eq!(string_from_value(&serde_json::json!("   ")), None);
        assert_eq!(string_from_value(&serde_json::json!(17)), Some("17".to_string()));
    }
}
