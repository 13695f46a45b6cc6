//! Error types for real-time state

use clowdr_core::{ChatId, StoreError};
use thiserror::Error;

/// Errors raised by the real-time state layer
///
/// Most of these are logged rather than surfaced: view state keeps working
/// when persistence or a backend lookup fails.
#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Chat not found: {0}")]
    ChatNotFound(ChatId),

    #[error("Registrant search failed: {0}")]
    Search(String),

    #[error("State has been torn down")]
    TornDown,
}

impl From<std::io::Error> for RealtimeError {
    fn from(err: std::io::Error) -> Self {
        RealtimeError::Storage(err.into())
    }
}

impl From<serde_json::Error> for RealtimeError {
    fn from(err: serde_json::Error) -> Self {
        RealtimeError::Storage(err.into())
    }
}

/// Result type alias for real-time operations
pub type RealtimeResult<T> = Result<T, RealtimeError>;
