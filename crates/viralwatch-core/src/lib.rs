//! Shared domain model and configuration for the viralwatch workspace.
//!
//! Every other crate depends on the types defined here: the canonical
//! observation record, derived scores and surge events, alerts, the
//! environment/watchlist configuration, and the storage collaborator trait.

pub mod alert;
pub mod app_config;
pub mod config;
pub mod error;
pub mod platform;
pub mod record;
pub mod run;
pub mod store;
pub mod watchlist;

pub use alert::{Alert, AlertKind, AlertSeverity};
pub use app_config::{AppConfig, Environment};
pub use config::{build_app_config, load_app_config, load_app_config_from_env};
pub use error::{ConfigError, CoreError, StoreError};
pub use platform::{EntityKey, SourcePlatform};
pub use record::{
    metric, text, ArbitrageSignal, CanonicalRecord, PriceDirection, SurgeEvent, VelocitySample,
    ViralScore,
};
pub use run::RunStats;
pub use store::{MemoryStore, RecordStore, StoredRecord};
pub use watchlist::{
    load_watchlist, ScoreWeights, SourceConfig, SourcesConfig, WatchConfig, SCORE_SCALE,
};
