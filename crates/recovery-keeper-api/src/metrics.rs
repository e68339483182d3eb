//! Prometheus-backed telemetry for the resilience layer.
//!
//! Metrics live in a registry owned by the collector rather than the global
//! default registry, so several collectors (one per test, say) can coexist.

use prometheus::{
    Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use recovery_keeper_core::{
    circuit_breaker::CircuitState, BatchSummary, DeadLetterJob, DeadLetterStats, MemorySample,
    OperationError, RequestContext, TelemetryCollector, ValidationVerdict,
};
use std::time::Duration;

/// Telemetry collector recording Prometheus metrics.
pub struct PrometheusTelemetryCollector {
    registry: Registry,

    // Resilient call metrics
    pub requests_total: IntCounterVec,
    pub retries_total: IntCounterVec,
    pub successes_total: IntCounterVec,
    pub failures_total: IntCounterVec,
    pub request_duration_seconds: HistogramVec,

    // Circuit breaker metrics
    pub circuit_state: IntGaugeVec,
    pub circuit_transitions_total: IntCounterVec,

    // Dead-letter metrics
    pub dead_letter_enqueued_total: IntCounterVec,
    pub dead_letter_recovered_total: IntCounter,
    pub dead_letter_failed_total: IntCounter,
    pub dead_letter_depth: IntGaugeVec,

    // Memory metrics
    pub memory_pressure_events_total: IntCounter,
    pub memory_usage_ratio: Gauge,

    // Webhook metrics
    pub webhook_verdicts_total: IntCounterVec,
}

impl PrometheusTelemetryCollector {
    /// Create collector with a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("recovery_keeper".to_string()), None)?;

        let requests_total = IntCounterVec::new(
            Opts::new("requests_total", "Resilient calls started"),
            &["service", "operation"],
        )?;
        let retries_total = IntCounterVec::new(
            Opts::new("retries_total", "Retry attempts scheduled"),
            &["service"],
        )?;
        let successes_total = IntCounterVec::new(
            Opts::new("successes_total", "Resilient calls that succeeded"),
            &["service"],
        )?;
        let failures_total = IntCounterVec::new(
            Opts::new("failures_total", "Resilient calls that failed after all attempts"),
            &["service", "category"],
        )?;
        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "request_duration_seconds",
                "Duration of resilient calls including retries",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["service"],
        )?;

        let circuit_state = IntGaugeVec::new(
            Opts::new(
                "circuit_breaker_state",
                "Circuit state per dependency (0 closed, 1 open, 2 half-open)",
            ),
            &["service"],
        )?;
        let circuit_transitions_total = IntCounterVec::new(
            Opts::new("circuit_breaker_transitions_total", "Circuit state changes"),
            &["service", "to"],
        )?;

        let dead_letter_enqueued_total = IntCounterVec::new(
            Opts::new("dead_letter_enqueued_total", "Jobs parked in the dead-letter queue"),
            &["job_type"],
        )?;
        let dead_letter_recovered_total = IntCounter::new(
            "dead_letter_recovered_total",
            "Dead-letter jobs recovered by a strategy",
        )?;
        let dead_letter_failed_total = IntCounter::new(
            "dead_letter_failed_total",
            "Dead-letter jobs that failed permanently",
        )?;
        let dead_letter_depth = IntGaugeVec::new(
            Opts::new("dead_letter_depth", "Dead-letter jobs by status"),
            &["status"],
        )?;

        let memory_pressure_events_total = IntCounter::new(
            "memory_pressure_events_total",
            "Times memory usage exceeded the configured threshold",
        )?;
        let memory_usage_ratio = Gauge::new(
            "memory_usage_ratio",
            "Last sampled memory usage ratio under pressure",
        )?;

        let webhook_verdicts_total = IntCounterVec::new(
            Opts::new("webhook_verdicts_total", "Webhook deliveries by verdict"),
            &["outcome", "category"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(retries_total.clone()))?;
        registry.register(Box::new(successes_total.clone()))?;
        registry.register(Box::new(failures_total.clone()))?;
        registry.register(Box::new(request_duration_seconds.clone()))?;
        registry.register(Box::new(circuit_state.clone()))?;
        registry.register(Box::new(circuit_transitions_total.clone()))?;
        registry.register(Box::new(dead_letter_enqueued_total.clone()))?;
        registry.register(Box::new(dead_letter_recovered_total.clone()))?;
        registry.register(Box::new(dead_letter_failed_total.clone()))?;
        registry.register(Box::new(dead_letter_depth.clone()))?;
        registry.register(Box::new(memory_pressure_events_total.clone()))?;
        registry.register(Box::new(memory_usage_ratio.clone()))?;
        registry.register(Box::new(webhook_verdicts_total.clone()))?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        Ok(Self {
            registry,
            requests_total,
            retries_total,
            successes_total,
            failures_total,
            request_duration_seconds,
            circuit_state,
            circuit_transitions_total,
            dead_letter_enqueued_total,
            dead_letter_recovered_total,
            dead_letter_failed_total,
            dead_letter_depth,
            memory_pressure_events_total,
            memory_usage_ratio,
            webhook_verdicts_total,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every metric in the Prometheus text format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    /// Refresh the dead-letter depth gauges from a stats snapshot.
    pub fn update_dead_letter_depth(&self, stats: &DeadLetterStats) {
        for (status, count) in [
            ("pending", stats.pending),
            ("processing", stats.processing),
            ("recovered", stats.recovered),
            ("failed", stats.failed),
        ] {
            self.dead_letter_depth
                .with_label_values(&[status])
                .set(count as i64);
        }
    }
}

impl std::fmt::Debug for PrometheusTelemetryCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusTelemetryCollector")
            .finish_non_exhaustive()
    }
}

impl TelemetryCollector for PrometheusTelemetryCollector {
    fn record_request_start(&self, ctx: &RequestContext) {
        self.requests_total
            .with_label_values(&[ctx.service.as_str(), ctx.operation.as_str()])
            .inc();
    }

    fn record_retry_attempt(
        &self,
        ctx: &RequestContext,
        _attempt: u32,
        _delay: Duration,
        _error: &OperationError,
    ) {
        self.retries_total.with_label_values(&[ctx.service.as_str()]).inc();
    }

    fn record_success(&self, ctx: &RequestContext, duration: Duration) {
        self.successes_total.with_label_values(&[ctx.service.as_str()]).inc();
        self.request_duration_seconds
            .with_label_values(&[ctx.service.as_str()])
            .observe(duration.as_secs_f64());
    }

    fn record_failure(&self, ctx: &RequestContext, error: &OperationError, duration: Duration) {
        self.failures_total
            .with_label_values(&[ctx.service.as_str(), error.category().as_str()])
            .inc();
        self.request_duration_seconds
            .with_label_values(&[ctx.service.as_str()])
            .observe(duration.as_secs_f64());
    }

    fn record_circuit_transition(&self, service: &str, _from: CircuitState, to: CircuitState) {
        self.circuit_state
            .with_label_values(&[service])
            .set(to.as_gauge());
        self.circuit_transitions_total
            .with_label_values(&[service, to.as_str()])
            .inc();
    }

    fn record_dead_letter_enqueued(&self, job: &DeadLetterJob) {
        self.dead_letter_enqueued_total
            .with_label_values(&[job.job_type.as_str()])
            .inc();
    }

    fn record_dead_letter_batch(&self, summary: &BatchSummary) {
        self.dead_letter_recovered_total.inc_by(summary.recovered as u64);
        self.dead_letter_failed_total.inc_by(summary.failed as u64);
    }

    fn record_memory_pressure(&self, sample: &MemorySample) {
        self.memory_pressure_events_total.inc();
        self.memory_usage_ratio.set(sample.usage_ratio());
    }

    fn record_webhook_verdict(&self, verdict: &ValidationVerdict) {
        let (outcome, category) = match verdict.rejection_category() {
            None => ("accepted", "none"),
            Some(category) => ("rejected", category),
        };
        self.webhook_verdicts_total
            .with_label_values(&[outcome, category])
            .inc();
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
