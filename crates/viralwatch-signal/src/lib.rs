//! Signal processing: viral scores, noise filtering, cross-platform surge
//! correlation, and price arbitrage.

pub mod arbitrage;
pub mod error;
pub mod noise;
pub mod processor;
pub mod score;
pub mod surge;

pub use arbitrage::{detect_arbitrage, HistoricalBaseline, ReferencePriceSource, StaticPriceTable};
pub use error::SignalError;
pub use noise::{NoiseFilter, NoiseReason, NoiseVerdict, QualityCounters, QualitySnapshot};
pub use processor::SignalProcessor;
pub use score::{compute_viral_score, ScoreParams};
pub use surge::{detect_surge, percentile, SurgeParams};
