//! Circuit breaker resilience patterns for preventing cascading failures.
//!
//! One [`CircuitBreaker`] guards one named downstream dependency. All callers
//! of that dependency share the instance handed out by the
//! [`CircuitBreakerRegistry`], so they share its health signal.
//!
//! # Circuit Breaker States
//!
//! - **Closed**: Normal operation, requests pass through
//! - **Open**: Dependency is failing, requests are rejected immediately
//! - **Half-Open**: Testing recovery, limited requests allowed
//!
//! # Example
//!
//! ```rust
//! use recovery_keeper_core::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
//! use recovery_keeper_core::OperationError;
//!
//! # async fn example() {
//! let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
//! let breaker = registry.get_or_create("whop_api");
//!
//! let result = breaker
//!     .call(|| async { Ok::<_, OperationError>("membership") })
//!     .await;
//! assert!(result.is_ok());
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::{error::OperationError, Timestamp};

mod breaker;
mod registry;

pub use breaker::CircuitBreaker;
pub use registry::CircuitBreakerRegistry;

// ============================================================================
// Circuit State
// ============================================================================

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed, allowing requests through.
    Closed,

    /// Circuit is open, rejecting all requests.
    Open,

    /// Circuit is half-open, allowing limited probe requests.
    HalfOpen,
}

impl CircuitState {
    /// Check if requests are allowed in current state.
    pub fn allows_requests(&self) -> bool {
        matches!(self, Self::Closed | Self::HalfOpen)
    }

    /// Gauge value for metrics backends (0=closed, 1=open, 2=half-open).
    pub fn as_gauge(&self) -> i64 {
        match self {
            Self::Closed => 0,
            Self::Open => 1,
            Self::HalfOpen => 2,
        }
    }

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Circuit Breaker Configuration
// ============================================================================

/// Configuration for circuit breaker behavior.
///
/// # Default Configuration
///
/// - Failure threshold: 5 consecutive failures
/// - Recovery timeout: 30 seconds
/// - Success threshold: 3 successes to close
/// - Operation timeout: none
/// - Half-open max requests: 3 concurrent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures to trip circuit.
    pub failure_threshold: u32,

    /// Time circuit stays open before allowing a probe request.
    pub recovery_timeout: Duration,

    /// Number of successful probes needed to close circuit from half-open.
    pub success_threshold: u32,

    /// Timeout for individual operations, if any.
    pub operation_timeout: Option<Duration>,

    /// Maximum number of concurrent requests in half-open state.
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 3,
            operation_timeout: None,
            half_open_max_requests: 3,
        }
    }
}

/// Circuit breaker configuration for the platform API.
///
/// Tuned for outbound REST calls:
/// - 5 consecutive failures to trip
/// - 60 second recovery timeout (respect platform rate limits)
/// - 2 successes to close
/// - 10 second operation timeout
pub fn platform_api_circuit_breaker_config() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 5,
        recovery_timeout: Duration::from_secs(60),
        success_threshold: 2,
        operation_timeout: Some(Duration::from_secs(10)),
        half_open_max_requests: 2,
    }
}

// ============================================================================
// Transition hooks
// ============================================================================

/// Callback receiving the name of the dependency whose circuit changed.
pub type CircuitHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Optional callbacks fired after state transitions.
///
/// Hooks run outside the state lock and a panicking hook is logged, never
/// propagated.
#[derive(Clone, Default)]
pub struct CircuitHooks {
    pub on_open: Option<CircuitHook>,
    pub on_close: Option<CircuitHook>,
    pub on_half_open: Option<CircuitHook>,
}

impl CircuitHooks {
    pub fn on_open(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_open = Some(Arc::new(hook));
        self
    }

    pub fn on_close(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(hook));
        self
    }

    pub fn on_half_open(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_half_open = Some(Arc::new(hook));
        self
    }

    pub(crate) fn for_state(&self, state: CircuitState) -> Option<&CircuitHook> {
        match state {
            CircuitState::Open => self.on_open.as_ref(),
            CircuitState::Closed => self.on_close.as_ref(),
            CircuitState::HalfOpen => self.on_half_open.as_ref(),
        }
    }
}

impl fmt::Debug for CircuitHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitHooks")
            .field("on_open", &self.on_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_half_open", &self.on_half_open.is_some())
            .finish()
    }
}

// ============================================================================
// Failure classification
// ============================================================================

/// Decides whether an operation error is evidence of an unhealthy dependency.
pub trait CircuitFailure {
    /// `false` for failures that should not move the breaker, such as
    /// business rejections from a healthy dependency.
    fn counts_toward_circuit(&self) -> bool {
        true
    }
}

impl CircuitFailure for OperationError {
    fn counts_toward_circuit(&self) -> bool {
        OperationError::counts_toward_circuit(self)
    }
}

// ============================================================================
// Circuit Metrics
// ============================================================================

/// Metrics and statistics for circuit breaker.
///
/// Counters accumulate across all states until [`CircuitBreaker::reset`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitMetrics {
    pub state: CircuitState,

    /// Calls admitted to run the operation.
    pub requests: u64,

    pub successes: u64,

    /// Failed calls, including timeouts.
    pub failures: u64,

    pub timeouts: u64,

    /// Calls rejected without running the operation.
    pub rejected: u64,

    pub consecutive_failures: u32,

    pub consecutive_successes: u32,

    pub last_state_change: Timestamp,

    /// Time when circuit will next admit a probe (if open).
    pub next_recovery_attempt: Option<Timestamp>,

    /// Failure rate over admitted calls (0.0 to 1.0).
    pub failure_rate: f64,

    pub avg_response_time_ms: f64,
}

impl CircuitMetrics {
    /// Success rate from 0.0 to 1.0, or 1.0 if no requests processed.
    pub fn success_rate(&self) -> f64 {
        if self.requests == 0 {
            1.0
        } else {
            self.successes as f64 / self.requests as f64
        }
    }
}

// ============================================================================
// Circuit Breaker Error
// ============================================================================

/// Errors that can occur with circuit breaker operations.
#[derive(Debug, Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit breaker is open - requests rejected.
    #[error("Circuit breaker is OPEN for service '{service}'")]
    CircuitOpen { service: String },

    /// Too many concurrent probes in half-open state.
    #[error("Too many concurrent requests in half-open state for service '{service}'")]
    TooManyConcurrentRequests { service: String },

    /// Operation exceeded the per-call timeout; its result is discarded.
    #[error("Operation timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Operation failed with error.
    #[error("Operation failed: {0}")]
    OperationFailed(E),

    /// Circuit breaker internal error.
    #[error("Circuit breaker internal error: {message}")]
    InternalError { message: String },
}

impl<E> CircuitBreakerError<E> {
    /// Check if error is due to circuit breaker protection.
    pub fn is_circuit_protection(&self) -> bool {
        matches!(
            self,
            Self::CircuitOpen { .. } | Self::TooManyConcurrentRequests { .. }
        )
    }
}

impl From<CircuitBreakerError<OperationError>> for OperationError {
    fn from(error: CircuitBreakerError<OperationError>) -> Self {
        match error {
            CircuitBreakerError::CircuitOpen { service }
            | CircuitBreakerError::TooManyConcurrentRequests { service } => {
                OperationError::CircuitOpen { service }
            }
            CircuitBreakerError::Timeout { timeout_ms } => OperationError::Timeout { timeout_ms },
            CircuitBreakerError::OperationFailed(inner) => inner,
            CircuitBreakerError::InternalError { message } => OperationError::non_retryable(
                crate::error::FailureCategory::Unknown,
                message,
            ),
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
