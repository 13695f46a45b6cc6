//! Error types for the playout service

use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum PlayoutError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Stack could not be created or updated
    #[error("Deployment failed: {0}")]
    Deploy(String),

    /// SNS message that could not be understood
    #[error("Invalid notification: {0}")]
    InvalidNotification(String),

    /// SNS refused or could not be reached for a topic subscription
    #[error("Subscription failed: {0}")]
    Subscribe(String),

    #[error("Refusing to confirm subscription at {0}")]
    UntrustedUrl(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type PlayoutResult<T> = Result<T, PlayoutError>;
