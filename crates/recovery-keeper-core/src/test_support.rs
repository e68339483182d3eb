//! Shared fixtures for unit tests.

use crate::{
    circuit_breaker::CircuitState, context::RequestContext, dead_letter::BatchSummary,
    dead_letter::DeadLetterJob, error::OperationError, memory::MemorySample,
    telemetry::TelemetryCollector,
};
use std::sync::Mutex;
use std::time::Duration;

/// One recorded telemetry hook invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    Start,
    Retry { attempt: u32, delay: Duration },
    Success,
    Failure { circuit_open: bool },
    Transition { from: CircuitState, to: CircuitState },
    Enqueued { job_type: String },
    Batch { processed: usize },
    MemoryPressure,
}

/// Collector that remembers every hook call.
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingTelemetry {
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn retry_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, TelemetryEvent::Retry { .. }))
            .count()
    }

    pub fn transitions(&self) -> Vec<(CircuitState, CircuitState)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                TelemetryEvent::Transition { from, to } => Some((from, to)),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: TelemetryEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl TelemetryCollector for RecordingTelemetry {
    fn record_request_start(&self, _ctx: &RequestContext) {
        self.push(TelemetryEvent::Start);
    }

    fn record_retry_attempt(
        &self,
        _ctx: &RequestContext,
        attempt: u32,
        delay: Duration,
        _error: &OperationError,
    ) {
        self.push(TelemetryEvent::Retry { attempt, delay });
    }

    fn record_success(&self, _ctx: &RequestContext, _duration: Duration) {
        self.push(TelemetryEvent::Success);
    }

    fn record_failure(&self, _ctx: &RequestContext, error: &OperationError, _duration: Duration) {
        self.push(TelemetryEvent::Failure {
            circuit_open: error.is_circuit_open(),
        });
    }

    fn record_circuit_transition(&self, _service: &str, from: CircuitState, to: CircuitState) {
        self.push(TelemetryEvent::Transition { from, to });
    }

    fn record_dead_letter_enqueued(&self, job: &DeadLetterJob) {
        self.push(TelemetryEvent::Enqueued {
            job_type: job.job_type.clone(),
        });
    }

    fn record_dead_letter_batch(&self, summary: &BatchSummary) {
        self.push(TelemetryEvent::Batch {
            processed: summary.processed,
        });
    }

    fn record_memory_pressure(&self, _sample: &MemorySample) {
        self.push(TelemetryEvent::MemoryPressure);
    }
}

/// Collector whose every hook panics.
#[derive(Debug, Default)]
pub struct PanickingTelemetry;

impl TelemetryCollector for PanickingTelemetry {
    fn record_request_start(&self, _ctx: &RequestContext) {
        panic!("start hook exploded");
    }

    fn record_retry_attempt(
        &self,
        _ctx: &RequestContext,
        _attempt: u32,
        _delay: Duration,
        _error: &OperationError,
    ) {
        panic!("retry hook exploded");
    }

    fn record_success(&self, _ctx: &RequestContext, _duration: Duration) {
        panic!("success hook exploded");
    }

    fn record_failure(&self, _ctx: &RequestContext, _error: &OperationError, _duration: Duration) {
        panic!("failure hook exploded");
    }

    fn record_circuit_transition(&self, _service: &str, _from: CircuitState, _to: CircuitState) {
        panic!("transition hook exploded");
    }
}

/// Pending job due immediately, for store and queue tests.
pub fn sample_job(job_type: &str, priority: i32) -> DeadLetterJob {
    let now = crate::Timestamp::now();
    DeadLetterJob {
        id: crate::JobId::new(),
        original_job_id: format!("orig-{}", job_type),
        job_type: job_type.to_string(),
        job_data: serde_json::json!({ "membership_id": "mem_123" }),
        failure_reason: "network".to_string(),
        error_message: "connection reset".to_string(),
        retry_count: 0,
        max_retries: 3,
        first_failed_at: now,
        last_failed_at: now,
        next_retry_at: now,
        priority,
        company_id: Some("biz_1".to_string()),
        recovery_attempts: 0,
        auto_recovery_enabled: true,
        metadata: serde_json::json!({}),
        status: crate::dead_letter::DeadLetterStatus::Pending,
        recovered_at: None,
        updated_at: now,
    }
}
