use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("invalid series: {reason}")]
    InvalidSeries { reason: String },

    #[error("invalid spam pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

impl SignalError {
    pub(crate) fn series(reason: impl Into<String>) -> Self {
        Self::InvalidSeries {
            reason: reason.into(),
        }
    }
}
