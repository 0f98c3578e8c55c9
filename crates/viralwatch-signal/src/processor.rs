use chrono::{DateTime, Utc};
use viralwatch_core::{
    ArbitrageSignal, CanonicalRecord, SurgeEvent, VelocitySample, ViralScore, WatchConfig,
};

use crate::arbitrage::{detect_arbitrage, ReferencePriceSource};
use crate::error::SignalError;
use crate::noise::{NoiseFilter, NoiseVerdict, QualityCounters, QualitySnapshot};
use crate::score::{compute_viral_score, ScoreParams};
use crate::surge::{detect_surge, SurgeParams};

/// Watchlist-configured signal computations plus the shared quality counters.
#[derive(Debug)]
pub struct SignalProcessor {
    score: ScoreParams,
    surge: SurgeParams,
    noise: NoiseFilter,
    arbitrage_min_margin: f64,
    counters: QualityCounters,
}

impl SignalProcessor {
    /// # Errors
    ///
    /// Returns [`SignalError::InvalidPattern`] when a spam pattern does not
    /// compile.
    pub fn from_watchlist(config: &WatchConfig) -> Result<Self, SignalError> {
        Ok(Self {
            score: ScoreParams::from_watchlist(config),
            surge: SurgeParams::from_watchlist(config),
            noise: NoiseFilter::from_watchlist(config)?,
            arbitrage_min_margin: config.arbitrage_min_margin,
            counters: QualityCounters::default(),
        })
    }

    #[must_use]
    pub fn surge_params(&self) -> &SurgeParams {
        &self.surge
    }

    /// # Errors
    ///
    /// See [`compute_viral_score`].
    pub fn compute_viral_score(
        &self,
        series: &[CanonicalRecord],
    ) -> Result<ViralScore, SignalError> {
        compute_viral_score(series, &self.score)
    }

    /// Classify without touching the counters.
    #[must_use]
    pub fn classify_noise(&self, record: &CanonicalRecord) -> NoiseVerdict {
        self.noise.classify(record)
    }

    /// Classify and count.
    #[must_use]
    pub fn detect_noise(&self, record: &CanonicalRecord) -> NoiseVerdict {
        let verdict = self.classify_noise(record);
        self.counters.record(&verdict);
        verdict
    }

    pub fn count_verdict(&self, verdict: &NoiseVerdict) {
        self.counters.record(verdict);
    }

    #[must_use]
    pub fn quality(&self) -> QualitySnapshot {
        self.counters.snapshot()
    }

    #[must_use]
    pub fn detect_surge(
        &self,
        term: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        samples: &[VelocitySample],
    ) -> Option<SurgeEvent> {
        detect_surge(term, window_start, window_end, samples, &self.surge)
    }

    #[must_use]
    pub fn detect_arbitrage(
        &self,
        observation: &CanonicalRecord,
        reference: &dyn ReferencePriceSource,
    ) -> Option<ArbitrageSignal> {
        detect_arbitrage(observation, reference, self.arbitrage_min_margin)
    }
}
