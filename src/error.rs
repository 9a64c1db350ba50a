//! Error types for the session and notification core.

use crate::types::UserId;
use thiserror::Error;

/// Main error type for core operations.
///
/// Every variant carries owned strings so errors can be cloned into
/// published [`SyncEvent`](crate::notifications::SyncEvent)s.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("Session is not valid")]
    SessionInvalid,

    #[error("Profile not found for user {0}")]
    ProfileMissing(UserId),

    #[error("Profile lookup failed: {0}")]
    ProfileLookupFailed(String),

    #[error("Channel open failed: {0}")]
    ChannelOpenFailed(String),

    #[error("Channel subscribe error: {0}")]
    ChannelSubscribeError(String),

    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Deserialization(e.to_string())
    }
}

impl From<url::ParseError> for CoreError {
    fn from(e: url::ParseError) -> Self {
        CoreError::Backend(format!("invalid url: {e}"))
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
