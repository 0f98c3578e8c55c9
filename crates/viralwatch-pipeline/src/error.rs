use thiserror::Error;
use viralwatch_access::{AccessError, LaneError};
use viralwatch_alert::AlertError;
use viralwatch_signal::SignalError;

use crate::collector::CollectorError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Access(#[from] AccessError),

    #[error("collector failed: {0}")]
    Collector(#[from] CollectorError),

    #[error("signal configuration error: {0}")]
    Signal(#[from] SignalError),

    #[error("notifier setup failed: {0}")]
    Alert(#[from] AlertError),

    #[error("replay input error: {0}")]
    Input(String),
}

impl From<LaneError<CollectorError>> for PipelineError {
    fn from(err: LaneError<CollectorError>) -> Self {
        match err {
            LaneError::Access(e) => PipelineError::Access(e),
            LaneError::Operation(e) => PipelineError::Collector(e),
        }
    }
}
