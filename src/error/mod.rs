//! Client error types.

use thiserror::Error;

use crate::config::ConfigLoadError;

/// Client-level errors. Frame decoding never produces one of these: bad frames are dropped.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {detail}")]
    Api { status: u16, detail: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Link closed: {0}")]
    LinkClosed(String),

    #[error("Invalid channel context: {0}")]
    InvalidContext(String),
}

impl From<ConfigLoadError> for SyncError {
    fn from(e: ConfigLoadError) -> Self {
        SyncError::Config(e.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
