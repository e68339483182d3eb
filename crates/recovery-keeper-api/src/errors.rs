//! Error types for the HTTP service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use recovery_keeper_core::{DeadLetterError, ParseError};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// Structured error body returned by every endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code, e.g. `WEBHOOK_VALIDATION_FAILED`
    pub code: String,

    /// Failing area, e.g. `signature`
    pub category: String,

    pub errors: Vec<String>,
}

fn error_response(status: StatusCode, code: &str, category: &str, errors: Vec<String>) -> Response {
    let body = ErrorBody {
        code: code.to_string(),
        category: category.to_string(),
        errors,
    };
    (status, Json(body)).into_response()
}

/// Webhook handler errors with HTTP status code mapping
///
/// Every variant is a permanent rejection from the sender's point of view:
/// the platform owns its redelivery policy, so nothing here asks it to retry.
///
/// # Security Considerations
///
/// Validation messages describe what failed but never echo the secret, the
/// expected signature or the raw body.
#[derive(Debug, thiserror::Error)]
pub enum WebhookHandlerError {
    /// Body is not JSON
    ///
    /// Maps to: `400 Bad Request`, code `INVALID_JSON`
    #[error("Invalid JSON payload: {message}")]
    InvalidJson { message: String },

    /// Signature, timestamp or schema validation failed
    ///
    /// Maps to: `400 Bad Request`, code `WEBHOOK_VALIDATION_FAILED`
    #[error("Webhook validation failed ({category}): {}", .errors.join("; "))]
    ValidationFailed {
        category: &'static str,
        errors: Vec<String>,
    },

    /// Payload too large
    ///
    /// Maps to: `413 Payload Too Large`
    #[error("Payload too large (max: {max_size} bytes)")]
    PayloadTooLarge { max_size: usize },

    /// Unexpected internal server error
    ///
    /// Maps to: `500 Internal Server Error`. Details are logged; the client
    /// gets a generic message.
    #[error("Internal server error: {message}")]
    InternalError { message: String },
}

impl IntoResponse for WebhookHandlerError {
    fn into_response(self) -> Response {
        match self {
            Self::InvalidJson { message } => {
                warn!(error = %message, "Rejected webhook with invalid JSON");
                error_response(
                    StatusCode::BAD_REQUEST,
                    "INVALID_JSON",
                    "payload",
                    vec![format!("Invalid JSON payload: {}", message)],
                )
            }
            Self::ValidationFailed { category, errors } => error_response(
                StatusCode::BAD_REQUEST,
                "WEBHOOK_VALIDATION_FAILED",
                category,
                errors,
            ),
            Self::PayloadTooLarge { max_size } => {
                warn!(max_size = max_size, "Payload too large");
                error_response(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "PAYLOAD_TOO_LARGE",
                    "payload",
                    vec![format!("Payload exceeds {} bytes", max_size)],
                )
            }
            Self::InternalError { message } => {
                error!(error = %message, "Internal server error occurred");
                error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "internal",
                    vec!["Internal server error occurred. Please try again later.".to_string()],
                )
            }
        }
    }
}

/// Errors from the operator endpoints
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    /// Maps to: `400 Bad Request`
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Maps to: `404 Not Found`
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// Maps to: `409 Conflict`
    #[error("{message}")]
    Conflict { message: String },

    /// Maps to: `500 Internal Server Error`, or `503` when transient
    #[error("Dead-letter store failure: {0}")]
    Storage(DeadLetterError),
}

impl From<DeadLetterError> for AdminError {
    fn from(error: DeadLetterError) -> Self {
        match error {
            DeadLetterError::NotFound { job_id } => Self::NotFound {
                resource: format!("Dead-letter job {}", job_id),
            },
            DeadLetterError::InvalidState { .. } => Self::Conflict {
                message: error.to_string(),
            },
            other => Self::Storage(other),
        }
    }
}

impl From<ParseError> for AdminError {
    fn from(error: ParseError) -> Self {
        Self::InvalidRequest {
            message: error.to_string(),
        }
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        match self {
            Self::InvalidRequest { message } => error_response(
                StatusCode::BAD_REQUEST,
                "INVALID_REQUEST",
                "request",
                vec![message],
            ),
            Self::NotFound { ref resource } => error_response(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                "request",
                vec![format!("{} not found", resource)],
            ),
            Self::Conflict { message } => {
                error_response(StatusCode::CONFLICT, "INVALID_STATE", "dead_letter", vec![message])
            }
            Self::Storage(e) => {
                error!(error = %e, "Dead-letter store failure");
                let status = if e.is_transient() {
                    StatusCode::SERVICE_UNAVAILABLE
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                };
                error_response(
                    status,
                    "STORAGE_ERROR",
                    "dead_letter",
                    vec!["Dead-letter store is unavailable".to_string()],
                )
            }
        }
    }
}

/// Service-level errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to bind to address {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("Server failed: {message}")]
    ServerFailed { message: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration for '{field}': {message}")]
    Invalid { field: String, message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Configuration loading failed: {message}")]
    Load { message: String },
}
