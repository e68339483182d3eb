//! Telemetry collection for resilient operations.
//!
//! This module defines the sink interface the resilience components report
//! to. Concrete backends (Prometheus in `recovery-keeper-api`, structured logs
//! here) implement [`TelemetryCollector`].
//!
//! # Best-Effort Pattern
//!
//! Hooks are infallible and every invocation goes through [`isolate`], so a
//! panicking collector is logged and never aborts the wrapped operation.
//!
//! # Examples
//!
//! ```rust
//! use recovery_keeper_core::telemetry::{NoOpTelemetryCollector, TelemetryCollector};
//! use recovery_keeper_core::RequestContext;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let telemetry: Arc<dyn TelemetryCollector> = Arc::new(NoOpTelemetryCollector);
//! let ctx = RequestContext::new("fetch_membership", "whop_api");
//! telemetry.record_success(&ctx, Duration::from_millis(12));
//! ```

use crate::{
    circuit_breaker::CircuitState,
    context::RequestContext,
    dead_letter::{BatchSummary, DeadLetterJob},
    error::OperationError,
    memory::MemorySample,
    webhook::ValidationVerdict,
};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Sink for resilience telemetry.
///
/// All methods take `&self` and default to doing nothing, so implementations
/// only override what they record.
pub trait TelemetryCollector: Send + Sync {
    /// A logical call is about to make its first attempt.
    fn record_request_start(&self, _ctx: &RequestContext) {}

    /// A retry is scheduled after `delay`. `attempt` is the 1-based retry number.
    fn record_retry_attempt(
        &self,
        _ctx: &RequestContext,
        _attempt: u32,
        _delay: Duration,
        _error: &OperationError,
    ) {
    }

    /// The call succeeded.
    fn record_success(&self, _ctx: &RequestContext, _duration: Duration) {}

    /// The call failed after all attempts.
    fn record_failure(&self, _ctx: &RequestContext, _error: &OperationError, _duration: Duration) {}

    /// A circuit breaker changed state.
    fn record_circuit_transition(&self, _service: &str, _from: CircuitState, _to: CircuitState) {}

    /// A job was parked in the dead-letter queue.
    fn record_dead_letter_enqueued(&self, _job: &DeadLetterJob) {}

    /// A dead-letter processing batch finished.
    fn record_dead_letter_batch(&self, _summary: &BatchSummary) {}

    /// Memory usage crossed the configured threshold.
    fn record_memory_pressure(&self, _sample: &MemorySample) {}

    /// A webhook delivery was accepted or rejected.
    fn record_webhook_verdict(&self, _verdict: &ValidationVerdict) {}
}

/// Run a telemetry hook, logging and swallowing any panic it raises.
pub fn isolate<F: FnOnce()>(hook: &'static str, f: F) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(f)) {
        let reason = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        warn!(hook = hook, reason = %reason, "Telemetry hook panicked; continuing");
    }
}

// ============================================================================
// No-op collector
// ============================================================================

/// Collector that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpTelemetryCollector;

impl TelemetryCollector for NoOpTelemetryCollector {}

// ============================================================================
// Structured log collector
// ============================================================================

/// Collector that emits structured `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetryCollector;

impl TelemetryCollector for TracingTelemetryCollector {
    fn record_request_start(&self, ctx: &RequestContext) {
        debug!(
            request_id = %ctx.request_id,
            operation = %ctx.operation,
            service = %ctx.service,
            "Operation started"
        );
    }

    fn record_retry_attempt(
        &self,
        ctx: &RequestContext,
        attempt: u32,
        delay: Duration,
        error: &OperationError,
    ) {
        warn!(
            request_id = %ctx.request_id,
            operation = %ctx.operation,
            service = %ctx.service,
            attempt = attempt,
            delay_ms = delay.as_millis() as u64,
            category = %error.category(),
            error = %error,
            "Retrying operation"
        );
    }

    fn record_success(&self, ctx: &RequestContext, duration: Duration) {
        info!(
            request_id = %ctx.request_id,
            operation = %ctx.operation,
            service = %ctx.service,
            attempts = ctx.attempts,
            duration_ms = duration.as_millis() as u64,
            "Operation succeeded"
        );
    }

    fn record_failure(&self, ctx: &RequestContext, error: &OperationError, duration: Duration) {
        warn!(
            request_id = %ctx.request_id,
            operation = %ctx.operation,
            service = %ctx.service,
            attempts = ctx.attempts,
            duration_ms = duration.as_millis() as u64,
            category = %error.category(),
            circuit_open = error.is_circuit_open(),
            error = %error,
            "Operation failed"
        );
    }

    fn record_circuit_transition(&self, service: &str, from: CircuitState, to: CircuitState) {
        warn!(service = service, from = %from, to = %to, "Circuit breaker state changed");
    }

    fn record_dead_letter_enqueued(&self, job: &DeadLetterJob) {
        warn!(
            job_id = %job.id,
            original_job_id = %job.original_job_id,
            job_type = %job.job_type,
            failure_reason = %job.failure_reason,
            "Job moved to dead-letter queue"
        );
    }

    fn record_dead_letter_batch(&self, summary: &BatchSummary) {
        info!(
            processed = summary.processed,
            recovered = summary.recovered,
            failed = summary.failed,
            rescheduled = summary.rescheduled,
            "Dead-letter batch processed"
        );
    }

    fn record_memory_pressure(&self, sample: &MemorySample) {
        warn!(
            used_bytes = sample.used_bytes,
            total_bytes = sample.total_bytes,
            usage_ratio = sample.usage_ratio(),
            "Memory pressure detected"
        );
    }

    fn record_webhook_verdict(&self, verdict: &ValidationVerdict) {
        debug!(
            valid = verdict.valid,
            event_type = verdict.event_type.as_deref().unwrap_or("-"),
            "Webhook verdict recorded"
        );
    }
}

// ============================================================================
// Fan-out collector
// ============================================================================

/// Forwards every hook to each inner collector, isolating each one.
#[derive(Clone, Default)]
pub struct CompositeTelemetryCollector {
    collectors: Vec<Arc<dyn TelemetryCollector>>,
}

impl CompositeTelemetryCollector {
    /// Create a composite over the given collectors.
    pub fn new(collectors: Vec<Arc<dyn TelemetryCollector>>) -> Self {
        Self { collectors }
    }

    /// Add another collector.
    pub fn with(mut self, collector: Arc<dyn TelemetryCollector>) -> Self {
        self.collectors.push(collector);
        self
    }

    fn each(&self, hook: &'static str, f: impl Fn(&dyn TelemetryCollector)) {
        for collector in &self.collectors {
            isolate(hook, || f(collector.as_ref()));
        }
    }
}

impl TelemetryCollector for CompositeTelemetryCollector {
    fn record_request_start(&self, ctx: &RequestContext) {
        self.each("request_start", |c| c.record_request_start(ctx));
    }

    fn record_retry_attempt(
        &self,
        ctx: &RequestContext,
        attempt: u32,
        delay: Duration,
        error: &OperationError,
    ) {
        self.each("retry_attempt", |c| {
            c.record_retry_attempt(ctx, attempt, delay, error)
        });
    }

    fn record_success(&self, ctx: &RequestContext, duration: Duration) {
        self.each("success", |c| c.record_success(ctx, duration));
    }

    fn record_failure(&self, ctx: &RequestContext, error: &OperationError, duration: Duration) {
        self.each("failure", |c| c.record_failure(ctx, error, duration));
    }

    fn record_circuit_transition(&self, service: &str, from: CircuitState, to: CircuitState) {
        self.each("circuit_transition", |c| {
            c.record_circuit_transition(service, from, to)
        });
    }

    fn record_dead_letter_enqueued(&self, job: &DeadLetterJob) {
        self.each("dead_letter_enqueued", |c| c.record_dead_letter_enqueued(job));
    }

    fn record_dead_letter_batch(&self, summary: &BatchSummary) {
        self.each("dead_letter_batch", |c| c.record_dead_letter_batch(summary));
    }

    fn record_memory_pressure(&self, sample: &MemorySample) {
        self.each("memory_pressure", |c| c.record_memory_pressure(sample));
    }

    fn record_webhook_verdict(&self, verdict: &ValidationVerdict) {
        self.each("webhook_verdict", |c| c.record_webhook_verdict(verdict));
    }
}

#[cfg(test)]
#[path = "telemetry_tests.rs"]
mod tests;
