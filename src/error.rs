//! Error types for the LLM broker.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Broker error types
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Malformed request body or parameters
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No queue exists for any of the requested provider/model targets
    #[error("No available provider for the requested model")]
    NoAvailableProvider,

    /// The upstream provider call failed
    #[error("Provider error: {0}")]
    Provider(String),

    /// Usage persistence failed (logged and swallowed inside the engine;
    /// only surfaced from administrative paths)
    #[error("Usage store error: {0}")]
    Persistence(String),

    /// The broker could not resolve at least one key at startup
    #[error("Bootstrap error: {0}")]
    Bootstrap(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            BrokerError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            BrokerError::NoAvailableProvider => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            BrokerError::Provider(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            BrokerError::Http(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            BrokerError::Serialization(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            BrokerError::Persistence(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            BrokerError::Bootstrap(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            BrokerError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "type": format!("{:?}", self).split('(').next().unwrap_or("Unknown"),
            }
        }));

        (status, body).into_response()
    }
}
