//! End-to-end processing: access-guarded collection, ingestion, scoring,
//! surge correlation, and alert dispatch.

pub mod collector;
pub mod error;
pub mod pipeline;
pub mod replay;

pub use collector::{Collector, CollectorError, HttpJsonCollector};
pub use error::PipelineError;
pub use pipeline::{Pipeline, SubmitReport, SubmitStatus, SurgeCycleReport};
pub use replay::{ReplayLine, ReplayOutcome, ReplaySummary};
