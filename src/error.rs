use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no snapshot available yet: the first refresh has not completed")]
    NotYetAvailable,

    #[error("provider '{provider}' is unreachable: {message}")]
    ProviderUnreachable { provider: String, message: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Refresh(#[from] RefreshError),

    #[error(transparent)]
    Settings(#[from] ::config::ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),
}

/// A single provider sub-fetch failed. `target` names the dataset
/// (`compute-instance`, ..., `cost-and-usage`).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{target} fetch failed: {message}")]
pub struct FetchError {
    pub target: String,
    pub message: String,
}

impl FetchError {
    pub fn new(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            message: message.into(),
        }
    }
}

/// Why a refresh cycle installed nothing. Clonable so requests that waited on
/// an in-flight cycle can share its outcome.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefreshError {
    #[error("refresh aborted: {0}")]
    CostAborted(FetchError),

    #[error("refresh exceeded its {0:?} deadline")]
    DeadlineExceeded(Duration),
}
