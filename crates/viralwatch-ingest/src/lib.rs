//! Ingestion: raw platform payloads to deduplicated canonical records.

pub mod entity;
pub mod error;
pub mod keywords;
pub mod normalize;
pub mod parse;

pub use entity::{EntityStore, IngestOutcome, SeriesPoint};
pub use error::{IngestError, Rejected};
pub use keywords::KeywordMatcher;
pub use normalize::normalize;
