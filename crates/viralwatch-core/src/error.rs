use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown source platform: {0}")]
    UnknownPlatform(String),
}

/// Errors raised while loading environment or watchlist configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read watchlist file {path}: {source}")]
    WatchlistIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse watchlist YAML: {0}")]
    WatchlistParse(#[from] serde_yaml::Error),

    #[error("watchlist validation failed: {0}")]
    Validation(String),
}

/// Failure reported by a storage collaborator.
///
/// Backends flatten their native errors into a message; callers only need to
/// log the failure and keep the pipeline running.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
}
