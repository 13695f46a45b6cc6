//! Error types for the actions service

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use clowdr_core::StoreError;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum ActionsError {
    /// Malformed request payload
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Missing or invalid bearer token
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Missing or invalid event secret
    #[error("Forbidden")]
    Forbidden,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Meeting provider error: {0}")]
    Provider(String),

    #[error("Email error: {0}")]
    Email(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A domain rule was violated (unknown room, wrong conference, ...)
    #[error("{0}")]
    Failed(String),
}

impl ActionsError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ActionsError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ActionsError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ActionsError::Forbidden => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ActionsError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ActionsError::BadRequest(message) => message.clone(),
            ActionsError::Unauthorized(_) => "Unauthorized".to_string(),
            ActionsError::Forbidden => "Forbidden".to_string(),
            other => {
                tracing::error!(error = %other, "Action failed");
                "Internal server error".to_string()
            }
        };
        (status, Json(body)).into_response()
    }
}

pub type ActionsResult<T> = Result<T, ActionsError>;
