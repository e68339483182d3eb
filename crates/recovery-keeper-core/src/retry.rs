//! # Retry Module
//!
//! Exponential backoff with optional jitter for transient failures.
//!
//! The delay before retry `n` (0-based) is `min(base * multiplier^n, max)`.
//! With jitter enabled the delay is drawn uniformly from `[delay/2, delay]`.
//! The same schedule seeds dead-letter `next_retry_at` times.

use crate::{
    context::RequestContext,
    error::OperationError,
    telemetry::{isolate, NoOpTelemetryCollector, TelemetryCollector},
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Decides whether a failure is worth another attempt.
pub type RetryablePredicate = Arc<dyn Fn(&OperationError) -> bool + Send + Sync>;

// ============================================================================
// Backoff schedule
// ============================================================================

/// Exponential backoff parameters shared by inline retries and the dead-letter queue.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffSchedule {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl BackoffSchedule {
    /// Un-jittered delay for the 0-based `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let nanos = self.base_delay.as_nanos() as f64 * self.multiplier.powi(exponent);

        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            self.max_delay
        } else {
            Duration::from_nanos(nanos.max(0.0).round() as u64)
        }
    }

    /// Delay for `attempt` with jitter applied when enabled.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }

        let upper = delay.as_secs_f64();
        let lower = upper / 2.0;
        Duration::from_secs_f64(rand::thread_rng().gen_range(lower..=upper))
    }
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

// ============================================================================
// Retry policy
// ============================================================================

/// Retry policy for one resilience engine.
///
/// # Examples
///
/// ```rust
/// use recovery_keeper_core::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(3, Duration::from_millis(100)).without_jitter();
/// assert_eq!(policy.calculate_delay(0), Duration::from_millis(100));
/// assert_eq!(policy.calculate_delay(1), Duration::from_millis(200));
/// assert_eq!(policy.total_attempts(), 4);
/// ```
#[derive(Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
    retryable: RetryablePredicate,
}

impl RetryPolicy {
    /// Create a policy with the default cap, multiplier and jitter.
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Self::default()
        }
    }

    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Disable jitter
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Replace the retryable predicate.
    ///
    /// Circuit-open rejections and validation errors are never retried,
    /// whatever the predicate says.
    pub fn with_retryable<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&OperationError) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(predicate);
        self
    }

    /// Backoff parameters of this policy.
    pub fn schedule(&self) -> BackoffSchedule {
        BackoffSchedule {
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            multiplier: self.backoff_multiplier,
            jitter: self.jitter,
        }
    }

    /// Un-jittered delay before retry `attempt` (0-based).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        self.schedule().delay(attempt)
    }

    /// Whether `error` on 0-based `attempt` should be retried.
    pub fn should_retry(&self, error: &OperationError, attempt: u32) -> bool {
        if attempt >= self.max_retries {
            return false;
        }
        if error.is_circuit_open() || matches!(error, OperationError::Validation { .. }) {
            return false;
        }
        (self.retryable)(error)
    }

    /// Total attempts including the initial one.
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        let schedule = BackoffSchedule::default();
        Self {
            max_retries: 3,
            base_delay: schedule.base_delay,
            max_delay: schedule.max_delay,
            backoff_multiplier: schedule.multiplier,
            jitter: schedule.jitter,
            retryable: Arc::new(OperationError::is_retryable),
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Retry executor
// ============================================================================

/// Runs an operation until it succeeds, fails permanently, or exhausts the policy.
pub struct RetryExecutor {
    policy: RetryPolicy,
    telemetry: Arc<dyn TelemetryCollector>,
}

impl RetryExecutor {
    /// Create executor without telemetry.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            telemetry: Arc::new(NoOpTelemetryCollector),
        }
    }

    /// Attach a telemetry sink.
    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetryCollector>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute `operation`, sleeping between attempts.
    ///
    /// Attempt N+1 never starts before the delay after attempt N has elapsed.
    /// The sleep suspends only this task. The last error is returned once
    /// retries are exhausted or the error is not retryable.
    pub async fn execute<T, F, Fut>(
        &self,
        ctx: &mut RequestContext,
        mut operation: F,
    ) -> Result<T, OperationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            ctx.begin_attempt();
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !self.policy.should_retry(&error, attempt) {
                debug!(
                    request_id = %ctx.request_id,
                    attempts = ctx.attempts,
                    retryable = error.is_retryable(),
                    "Giving up on operation"
                );
                return Err(error);
            }

            let delay = self.policy.schedule().jittered_delay(attempt);
            attempt += 1;
            isolate("retry_attempt", || {
                self.telemetry
                    .record_retry_attempt(ctx, attempt, delay, &error)
            });

            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
