//! Error taxonomy for operations executed through the resilience layer.
//!
//! Every wrapped operation reports failure as an [`OperationError`]. The
//! variant decides how the rest of the system reacts:
//!
//! - `Validation` is never retried and never reaches the circuit breaker
//! - `Retryable` is retried by the retry executor and counts toward the circuit
//! - `NonRetryable` fails fast and only counts toward the circuit when its
//!   category is `unknown`
//! - `Timeout` is retried and counts toward the circuit
//! - `CircuitOpen` is synthetic; the operation was never invoked
//! - `MemoryPressure` is raised by an enforcing memory guard

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

/// Coarse failure category used for retry decisions and monitoring labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Network,
    Timeout,
    ServerError,
    RateLimited,
    Validation,
    ClientError,
    Business,
    CircuitOpen,
    ResourceExhausted,
    Unknown,
}

impl FailureCategory {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::ServerError => "server_error",
            Self::RateLimited => "rate_limited",
            Self::Validation => "validation",
            Self::ClientError => "client_error",
            Self::Business => "business",
            Self::CircuitOpen => "circuit_open",
            Self::ResourceExhausted => "resource_exhausted",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of an operation executed through the resilience layer.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationError {
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("{message}")]
    Retryable {
        category: FailureCategory,
        message: String,
    },

    #[error("{message}")]
    NonRetryable {
        category: FailureCategory,
        message: String,
    },

    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Circuit breaker is OPEN for service '{service}'")]
    CircuitOpen { service: String },

    #[error("Memory pressure: {used_bytes} bytes in use exceeds limit of {limit_bytes} bytes")]
    MemoryPressure { used_bytes: u64, limit_bytes: u64 },
}

const NON_RETRYABLE_MARKERS: &[(&str, FailureCategory)] = &[
    ("validation", FailureCategory::Validation),
    ("bad request", FailureCategory::ClientError),
    ("unauthorized", FailureCategory::ClientError),
    ("forbidden", FailureCategory::ClientError),
    ("not found", FailureCategory::ClientError),
    ("unprocessable", FailureCategory::ClientError),
];

const RETRYABLE_MARKERS: &[(&str, FailureCategory)] = &[
    ("network", FailureCategory::Network),
    ("econnreset", FailureCategory::Network),
    ("econnrefused", FailureCategory::Network),
    ("connection reset", FailureCategory::Network),
    ("connection refused", FailureCategory::Network),
    ("socket hang up", FailureCategory::Network),
    ("timeout", FailureCategory::Timeout),
    ("timed out", FailureCategory::Timeout),
    ("etimedout", FailureCategory::Timeout),
    ("rate limit", FailureCategory::RateLimited),
    ("too many requests", FailureCategory::RateLimited),
    ("service unavailable", FailureCategory::ServerError),
    ("bad gateway", FailureCategory::ServerError),
    ("gateway timeout", FailureCategory::ServerError),
    ("internal server error", FailureCategory::ServerError),
];

/// HTTP status codes standing alone, so "4000ms" is not read as a 400.
static STATUS_CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(400|401|403|404|422|429|500|502|503|504)\b")
        .expect("STATUS_CODE_RE is a valid regex pattern")
});

static INVALID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\binvalid\b").expect("INVALID_RE is a valid regex pattern")
});

fn find_marker(lowered: &str, markers: &[(&str, FailureCategory)]) -> Option<FailureCategory> {
    markers
        .iter()
        .find(|(marker, _)| lowered.contains(marker))
        .map(|(_, category)| *category)
}

impl OperationError {
    /// Construct a retryable error.
    pub fn retryable(category: FailureCategory, message: impl Into<String>) -> Self {
        Self::Retryable {
            category,
            message: message.into(),
        }
    }

    /// Construct a non-retryable error.
    pub fn non_retryable(category: FailureCategory, message: impl Into<String>) -> Self {
        Self::NonRetryable {
            category,
            message: message.into(),
        }
    }

    /// Construct a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Classify a free-form failure message.
    ///
    /// Checked in order, first match wins:
    ///
    /// 1. explicit client-error phrases ("validation", "not found", ...)
    /// 2. a standalone status code such as `503` or `404`
    /// 3. network, timeout, rate-limit and server-error phrases
    /// 4. the word "invalid"
    ///
    /// So "connection reset: invalid frame" is retried while "validation
    /// failed after network call" is not. Messages matching nothing are
    /// non-retryable with category `unknown`.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lowered = message.to_lowercase();

        if let Some(category) = find_marker(&lowered, NON_RETRYABLE_MARKERS) {
            return Self::non_retryable(category, message);
        }

        if let Some(code) = STATUS_CODE_RE
            .captures(&lowered)
            .and_then(|captures| captures[1].parse::<u16>().ok())
        {
            return Self::from_status(code, message);
        }

        if let Some(category) = find_marker(&lowered, RETRYABLE_MARKERS) {
            return Self::retryable(category, message);
        }

        if INVALID_RE.is_match(&lowered) {
            return Self::non_retryable(FailureCategory::Validation, message);
        }

        Self::NonRetryable {
            category: FailureCategory::Unknown,
            message,
        }
    }

    /// Classify an HTTP response status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            408 => Self::retryable(FailureCategory::Timeout, message),
            429 => Self::retryable(FailureCategory::RateLimited, message),
            500..=599 => Self::retryable(FailureCategory::ServerError, message),
            400 | 422 => Self::non_retryable(FailureCategory::Validation, message),
            401..=499 => Self::non_retryable(FailureCategory::ClientError, message),
            _ => Self::non_retryable(FailureCategory::Unknown, message),
        }
    }

    /// Category of this failure.
    pub fn category(&self) -> FailureCategory {
        match self {
            Self::Validation { .. } => FailureCategory::Validation,
            Self::Retryable { category, .. } => *category,
            Self::NonRetryable { category, .. } => *category,
            Self::Timeout { .. } => FailureCategory::Timeout,
            Self::CircuitOpen { .. } => FailureCategory::CircuitOpen,
            Self::MemoryPressure { .. } => FailureCategory::ResourceExhausted,
        }
    }

    /// Default retry predicate.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. } | Self::Timeout { .. })
    }

    /// Whether this failure is evidence that the dependency is unhealthy.
    pub fn counts_toward_circuit(&self) -> bool {
        match self {
            Self::Retryable { .. } | Self::Timeout { .. } => true,
            Self::NonRetryable { category, .. } => *category == FailureCategory::Unknown,
            Self::Validation { .. } | Self::CircuitOpen { .. } | Self::MemoryPressure { .. } => {
                false
            }
        }
    }

    /// Whether the failure was raised by the circuit breaker without running the operation.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
