//! Error types shared across Clowdr crates

use thiserror::Error;

/// Top-level error type for core operations
#[derive(Debug, Error)]
pub enum ClowdrError {
    #[error("Identifier error: {0}")]
    Id(#[from] IdError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Layout error: {0}")]
    Layout(#[from] LayoutError),
}

/// Errors related to parsing identifiers
#[derive(Debug, Error)]
pub enum IdError {
    #[error("Invalid {kind} identifier: {value}")]
    InvalidFormat { kind: &'static str, value: String },

    #[error("Empty {0} identifier")]
    Empty(&'static str),
}

/// Errors raised by data stores (GraphQL backend, local storage, in-memory)
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage I/O error: {0}")]
    Io(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Record already exists: {0}")]
    Conflict(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Errors related to content layout data
#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("Invalid layout data: {0}")]
    Invalid(String),
}

/// Result type alias for core operations
pub type ClowdrResult<T> = Result<T, ClowdrError>;
