use std::collections::BTreeMap;

use viralwatch_core::{metric, ArbitrageSignal, CanonicalRecord, PriceDirection, WatchConfig};
use viralwatch_ingest::EntityStore;

/// A price the observed marketplace price is compared against.
pub trait ReferencePriceSource {
    /// Label stored on the signal, e.g. `historical_baseline`.
    fn name(&self) -> &str;

    fn reference_price(&self, observation: &CanonicalRecord) -> Option<f64>;
}

/// Mean of the entity's prior clean prices.
pub struct HistoricalBaseline<'a> {
    entities: &'a EntityStore,
}

impl<'a> HistoricalBaseline<'a> {
    #[must_use]
    pub fn new(entities: &'a EntityStore) -> Self {
        Self { entities }
    }
}

impl ReferencePriceSource for HistoricalBaseline<'_> {
    fn name(&self) -> &str {
        "historical_baseline"
    }

    fn reference_price(&self, observation: &CanonicalRecord) -> Option<f64> {
        let prices: Vec<f64> = self
            .entities
            .prior_metric(&observation.entity_key(), metric::PRICE, observation.observed_at)
            .into_iter()
            .filter(|p| p.is_finite() && *p > 0.0)
            .collect();
        if prices.is_empty() {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let mean = prices.iter().sum::<f64>() / prices.len() as f64;
        Some(mean)
    }
}

/// Cross-market prices keyed by natural key, from the watchlist.
#[derive(Debug, Clone, Default)]
pub struct StaticPriceTable {
    prices: BTreeMap<String, f64>,
}

impl StaticPriceTable {
    #[must_use]
    pub fn new(prices: BTreeMap<String, f64>) -> Self {
        Self { prices }
    }

    #[must_use]
    pub fn from_watchlist(config: &WatchConfig) -> Self {
        Self::new(config.reference_prices.clone())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

impl ReferencePriceSource for StaticPriceTable {
    fn name(&self) -> &str {
        "static_table"
    }

    fn reference_price(&self, observation: &CanonicalRecord) -> Option<f64> {
        self.prices.get(&observation.natural_key).copied()
    }
}

/// Compare the observation's price with the reference.
///
/// Returns a signal only when `|observed - reference| / reference` is
/// strictly above `min_margin`. Observations without a positive price and
/// sources without a positive reference yield `None`.
#[must_use]
pub fn detect_arbitrage(
    observation: &CanonicalRecord,
    reference: &dyn ReferencePriceSource,
    min_margin: f64,
) -> Option<ArbitrageSignal> {
    let observed_price = observation
        .metric(metric::PRICE)
        .filter(|p| p.is_finite() && *p > 0.0)?;
    let reference_price = reference
        .reference_price(observation)
        .filter(|p| p.is_finite() && *p > 0.0)?;

    let relative_margin = (observed_price - reference_price).abs() / reference_price;
    if relative_margin <= min_margin {
        return None;
    }
    let direction = if observed_price < reference_price {
        PriceDirection::BelowReference
    } else {
        PriceDirection::AboveReference
    };

    Some(ArbitrageSignal {
        natural_key: observation.natural_key.clone(),
        observed_price,
        reference_price,
        reference_source: reference.name().to_string(),
        relative_margin,
        direction,
        observed_at: observation.observed_at,
    })
}
