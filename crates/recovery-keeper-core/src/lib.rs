//! # Recovery-Keeper Core
//!
//! Core logic for the Recovery-Keeper resilient integration layer.
//!
//! This crate verifies inbound platform webhooks, executes outbound work
//! through retry and circuit-breaker protection, and parks work that exhausted
//! its inline retry budget in a dead-letter queue for out-of-band recovery.
//!
//! ## Architecture
//!
//! - Business logic depends only on trait abstractions (`DeadLetterStore`,
//!   `TelemetryCollector`, `RecoveryStrategy`, `AuditLogger`, `MemoryProbe`)
//! - Infrastructure implementations are injected at runtime
//! - The HTTP surface lives in `recovery-keeper-api`
//!
//! ## Usage
//!
//! ```rust
//! use recovery_keeper_core::{Environment, JobId, RequestId};
//!
//! let job_id = JobId::new();
//! let request_id = RequestId::new();
//! assert!(Environment::Production.requires_timestamp());
//! ```

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// Re-export commonly used types
pub use ulid::Ulid;
pub use uuid::Uuid;

// ============================================================================
// Domain Identifier Types
// ============================================================================

/// Unique identifier for dead-letter jobs
///
/// Uses ULID for lexicographic sorting and global uniqueness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(Ulid);

impl JobId {
    /// Generate a new unique job ID
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Get string representation of job ID
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ulid = s.parse::<Ulid>().map_err(|_| ParseError::InvalidFormat {
            expected: "ULID format".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self(ulid))
    }
}

/// Identifier for tracing one logical unit of work across retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generate new request ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RequestId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = s.parse::<Uuid>().map_err(|_| ParseError::InvalidFormat {
            expected: "UUID format".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self(uuid))
    }
}

// ============================================================================
// Time Types
// ============================================================================

/// UTC timestamp with microsecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current moment
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Parse timestamp from RFC3339 string
    pub fn from_rfc3339(s: &str) -> Result<Self, ParseError> {
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|_| ParseError::InvalidFormat {
                expected: "RFC3339 datetime".to_string(),
                actual: s.to_string(),
            })?
            .with_timezone(&Utc);
        Ok(Self(dt))
    }

    /// Build timestamp from Unix seconds
    pub fn from_unix_seconds(seconds: i64) -> Result<Self, ParseError> {
        Utc.timestamp_opt(seconds, 0)
            .single()
            .map(Self)
            .ok_or_else(|| ParseError::InvalidFormat {
                expected: "Unix timestamp in seconds".to_string(),
                actual: seconds.to_string(),
            })
    }

    /// Convert to RFC3339 string
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    /// Seconds since the Unix epoch
    pub fn unix_seconds(&self) -> i64 {
        self.0.timestamp()
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Add a duration to the timestamp, saturating on overflow
    pub fn add_duration(&self, duration: Duration) -> Self {
        let chrono_duration = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
        Self(
            self.0
                .checked_add_signed(chrono_duration)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        )
    }

    /// Subtract a duration from the timestamp, saturating on overflow
    pub fn subtract_duration(&self, duration: Duration) -> Self {
        let chrono_duration = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
        Self(
            self.0
                .checked_sub_signed(chrono_duration)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        )
    }

    /// Get duration since another timestamp, zero if `other` is later
    pub fn duration_since(&self, other: Self) -> Duration {
        let chrono_duration = self.0.signed_duration_since(other.0);
        chrono_duration.to_std().unwrap_or_default()
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

// ============================================================================
// Configuration Types
// ============================================================================

/// Deployment environment enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Test,
    Staging,
    Production,
}

impl Environment {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Test => "test",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }

    /// Staging and production behave like production for security checks
    pub fn is_production_like(&self) -> bool {
        matches!(self, Self::Staging | Self::Production)
    }

    /// Whether inbound webhooks must carry a timestamp header
    pub fn requires_timestamp(&self) -> bool {
        self.is_production_like()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::Production
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "test" | "testing" => Ok(Self::Test),
            "staging" | "stage" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            _ => Err(ParseError::InvalidFormat {
                expected: "development, test, staging, or production".to_string(),
                actual: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Error type for input validation failures
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required { field: String },

    #[error("Field '{field}' has invalid format: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Field '{field}' is out of range: {message}")]
    OutOfRange { field: String, message: String },
}

/// Error type for string parsing failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid format: expected {expected}, got '{actual}'")]
    InvalidFormat { expected: String, actual: String },
}

// ============================================================================
// Module declarations
// ============================================================================

/// Operation error taxonomy shared by the resilience components
pub mod error;

/// Per-call request context threaded through retries
pub mod context;

/// Webhook signature, timestamp and schema validation
pub mod webhook;

/// Retry with exponential backoff and jitter
pub mod retry;

/// Circuit breaker state machine and per-dependency registry
pub mod circuit_breaker;

/// Telemetry sink interface
pub mod telemetry;

/// Retry and circuit breaker composed into one call wrapper
pub mod resilience;

/// Dead-letter queue with pluggable recovery strategies
pub mod dead_letter;

/// Memory-pressure sampling and guarding
pub mod memory;

/// Audit trail for recovery actions
pub mod audit;

/// Transaction collaborator interface
pub mod transaction;

/// Top-level recovery façade
pub mod orchestrator;

/// Storage adapters for infrastructure implementations
pub mod adapters;

// Re-export key types for convenience
pub use adapters::{FilesystemDeadLetterStore, InMemoryDeadLetterStore};
pub use audit::{AuditEntry, AuditError, AuditLogger, InMemoryAuditLogger, TracingAuditLogger};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerRegistry,
    CircuitFailure, CircuitHooks, CircuitMetrics, CircuitState,
};
pub use context::RequestContext;
pub use dead_letter::{
    BatchSummary, DeadLetterError, DeadLetterFilter, DeadLetterJob, DeadLetterQueue,
    DeadLetterQueueConfig, DeadLetterStats, DeadLetterStatus, DeadLetterStore, EnqueueOptions,
    FnRecoveryStrategy, RecoveryOutcome, RecoveryStrategy,
};
pub use error::{FailureCategory, OperationError};
pub use memory::{
    FixedMemoryProbe, MemoryCheck, MemoryGuardMode, MemoryPressureConfig, MemoryPressureGuard,
    MemoryProbe, MemorySample, ProcMemoryProbe,
};
pub use orchestrator::{
    DeadLetterRequest, EnhancedRecoveryOrchestrator, RecoveryOptions, RecoveryResult,
};
pub use resilience::{ExecutionReport, ResilienceEngine};
pub use retry::{BackoffSchedule, RetryExecutor, RetryPolicy, RetryablePredicate};
pub use telemetry::{
    CompositeTelemetryCollector, NoOpTelemetryCollector, TelemetryCollector,
    TracingTelemetryCollector,
};
pub use transaction::{Transaction, TransactionError};
pub use webhook::{
    EventEnvelope, EventSchemaValidator, ReplayGuard, SignatureFormat, SignatureVerifier,
    ValidationVerdict, WebhookDelivery, WebhookEventHandler, WebhookSecret, WebhookValidator,
    WebhookValidatorConfig,
};

#[cfg(test)]
pub(crate) mod test_support;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
