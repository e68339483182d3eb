//! # Recovery Orchestrator
//!
//! Top-level entry point combining every recovery mechanism around one
//! operation:
//!
//! 1. memory-pressure guard (advisory or enforcing)
//! 2. resilience engine (circuit breaker wrapping retries) when requested
//! 3. transaction rollback on final failure
//! 4. dead-letter hand-off on final failure
//!
//! The returned [`RecoveryResult`] reports which mechanisms engaged.

use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::{
    audit::{
        AuditEntry, AuditLogger, TracingAuditLogger, ACTION_DEAD_LETTER_ENQUEUED,
        ACTION_MEMORY_PRESSURE, ACTION_TRANSACTION_ROLLBACK_FAILED, ACTION_TRANSACTION_ROLLED_BACK,
    },
    circuit_breaker::{CircuitBreakerRegistry, CircuitState},
    dead_letter::{DeadLetterQueue, EnqueueOptions},
    error::{FailureCategory, OperationError},
    memory::{MemoryPressureGuard, MemorySample},
    resilience::ResilienceEngine,
    retry::RetryPolicy,
    telemetry::{NoOpTelemetryCollector, TelemetryCollector},
    transaction::Transaction,
    JobId,
};

/// Strategy name reported when the memory guard engaged.
pub const STRATEGY_MEMORY_GUARD: &str = "memory_guard";
/// Strategy name reported when the call ran behind a circuit breaker.
pub const STRATEGY_CIRCUIT_BREAKER: &str = "circuit_breaker";
/// Strategy name reported when at least one retry was made.
pub const STRATEGY_RETRY: &str = "retry";
/// Strategy name reported when the caller's transaction was rolled back.
pub const STRATEGY_TRANSACTION_ROLLBACK: &str = "transaction_rollback";
/// Strategy name reported when the failed work was dead-lettered.
pub const STRATEGY_DEAD_LETTER: &str = "dead_letter";

// ============================================================================
// Options and result
// ============================================================================

/// What to park in the dead-letter queue if the operation finally fails.
#[derive(Debug, Clone)]
pub struct DeadLetterRequest {
    pub original_job_id: String,
    pub job_type: String,
    pub job_data: Value,
    pub options: EnqueueOptions,
}

/// Per-call recovery options.
#[derive(Clone)]
pub struct RecoveryOptions {
    pub operation_name: String,
    /// Dependency name; selects the shared circuit breaker.
    pub service: String,
    /// Run through retry and circuit-breaker protection.
    pub use_resilience: bool,
    /// Overrides the orchestrator's default policy.
    pub retry_policy: Option<RetryPolicy>,
    /// Per-attempt timeout.
    pub timeout: Option<Duration>,
    /// Transaction to roll back on final failure.
    pub transaction: Option<Arc<dyn Transaction>>,
    pub dead_letter: Option<DeadLetterRequest>,
}

impl RecoveryOptions {
    pub fn new(operation_name: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            service: service.into(),
            use_resilience: true,
            retry_policy: None,
            timeout: None,
            transaction: None,
            dead_letter: None,
        }
    }

    /// Make a single direct attempt with no retry or circuit breaker.
    pub fn without_resilience(mut self) -> Self {
        self.use_resilience = false;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_transaction(mut self, transaction: Arc<dyn Transaction>) -> Self {
        self.transaction = Some(transaction);
        self
    }

    /// Dead-letter the work under `job_type` if it finally fails.
    pub fn with_dead_letter(
        mut self,
        job_type: impl Into<String>,
        original_job_id: impl Into<String>,
        job_data: Value,
        options: EnqueueOptions,
    ) -> Self {
        self.dead_letter = Some(DeadLetterRequest {
            original_job_id: original_job_id.into(),
            job_type: job_type.into(),
            job_data,
            options,
        });
        self
    }
}

impl std::fmt::Debug for RecoveryOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryOptions")
            .field("operation_name", &self.operation_name)
            .field("service", &self.service)
            .field("use_resilience", &self.use_resilience)
            .field("retry_policy", &self.retry_policy)
            .field("timeout", &self.timeout)
            .field("transaction", &self.transaction.as_ref().map(|t| t.id().to_string()))
            .field("dead_letter", &self.dead_letter)
            .finish()
    }
}

/// Outcome of [`EnhancedRecoveryOrchestrator::execute_with_recovery`].
#[derive(Debug)]
pub struct RecoveryResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<OperationError>,
    /// Attempts made; 0 when the memory guard rejected the call.
    pub attempts: u32,
    /// Mechanisms that engaged, in the order they did.
    pub recovery_strategy: Vec<String>,
    pub transaction_rolled_back: bool,
    pub dead_letter_queued: bool,
    pub dead_letter_job_id: Option<JobId>,
    pub circuit_breaker_state: Option<CircuitState>,
    pub memory_usage: Option<MemorySample>,
    pub duration: Duration,
}

impl<T> RecoveryResult<T> {
    /// Whether `strategy` engaged during the call.
    pub fn used(&self, strategy: &str) -> bool {
        self.recovery_strategy.iter().any(|s| s == strategy)
    }

    /// Collapse into a plain `Result`.
    pub fn into_result(self) -> Result<T, OperationError> {
        match (self.data, self.error) {
            (Some(data), _) => Ok(data),
            (None, Some(error)) => Err(error),
            (None, None) => Err(OperationError::non_retryable(
                FailureCategory::Unknown,
                "Operation produced neither data nor error",
            )),
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Façade running operations with every configured recovery mechanism.
pub struct EnhancedRecoveryOrchestrator {
    registry: Arc<CircuitBreakerRegistry>,
    default_policy: RetryPolicy,
    dead_letter: Option<Arc<DeadLetterQueue>>,
    memory_guard: Option<MemoryPressureGuard>,
    audit: Arc<dyn AuditLogger>,
    telemetry: Arc<dyn TelemetryCollector>,
}

impl EnhancedRecoveryOrchestrator {
    pub fn new(registry: Arc<CircuitBreakerRegistry>) -> Self {
        Self {
            registry,
            default_policy: RetryPolicy::default(),
            dead_letter: None,
            memory_guard: None,
            audit: Arc::new(TracingAuditLogger),
            telemetry: Arc::new(NoOpTelemetryCollector),
        }
    }

    pub fn with_default_policy(mut self, policy: RetryPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    pub fn with_dead_letter_queue(mut self, queue: Arc<DeadLetterQueue>) -> Self {
        self.dead_letter = Some(queue);
        self
    }

    pub fn with_memory_guard(mut self, guard: MemoryPressureGuard) -> Self {
        self.memory_guard = Some(guard);
        self
    }

    pub fn with_audit_logger(mut self, audit: Arc<dyn AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetryCollector>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn registry(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.registry
    }

    pub fn dead_letter_queue(&self) -> Option<&Arc<DeadLetterQueue>> {
        self.dead_letter.as_ref()
    }

    /// Run `operation` with recovery.
    ///
    /// Failures never escape as `Err`; they are reported in the result along
    /// with the compensating actions taken.
    pub async fn execute_with_recovery<T, F, Fut>(
        &self,
        options: RecoveryOptions,
        mut operation: F,
    ) -> RecoveryResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        let started = Instant::now();
        let mut strategies = Vec::new();
        let mut memory_usage = None;
        let mut attempts = 0;

        let admitted = self
            .check_memory(&options, &mut strategies, &mut memory_usage)
            .await;

        let outcome = match admitted {
            Err(error) => Err(error),
            Ok(()) if options.use_resilience => {
                strategies.push(STRATEGY_CIRCUIT_BREAKER.to_string());
                let policy = options
                    .retry_policy
                    .clone()
                    .unwrap_or_else(|| self.default_policy.clone());
                let mut engine = ResilienceEngine::for_service(&self.registry, &options.service, policy)
                    .with_telemetry(self.telemetry.clone());
                if let Some(timeout) = options.timeout {
                    engine = engine.with_timeout(timeout);
                }

                let report = engine
                    .execute_with_report(&options.operation_name, operation)
                    .await;
                attempts = report.attempts;
                if report.retries > 0 {
                    strategies.push(STRATEGY_RETRY.to_string());
                }
                report.result
            }
            Ok(()) => {
                attempts = 1;
                match options.timeout {
                    Some(timeout) => tokio::time::timeout(timeout, operation())
                        .await
                        .unwrap_or_else(|_| {
                            Err(OperationError::Timeout {
                                timeout_ms: timeout.as_millis() as u64,
                            })
                        }),
                    None => operation().await,
                }
            }
        };

        let circuit_breaker_state = self.registry.get(&options.service).map(|b| b.state());

        let mut result = RecoveryResult {
            success: false,
            data: None,
            error: None,
            attempts,
            recovery_strategy: strategies,
            transaction_rolled_back: false,
            dead_letter_queued: false,
            dead_letter_job_id: None,
            circuit_breaker_state,
            memory_usage,
            duration: Duration::ZERO,
        };

        match outcome {
            Ok(data) => {
                result.success = true;
                result.data = Some(data);
            }
            Err(error) => {
                warn!(
                    operation = %options.operation_name,
                    service = %options.service,
                    attempts,
                    category = %error.category(),
                    error = %error,
                    "Operation failed after recovery attempts"
                );
                self.compensate(&options, &error, &mut result).await;
                result.error = Some(error);
            }
        }

        result.duration = started.elapsed();
        result
    }

    async fn check_memory(
        &self,
        options: &RecoveryOptions,
        strategies: &mut Vec<String>,
        memory_usage: &mut Option<MemorySample>,
    ) -> Result<(), OperationError> {
        let Some(guard) = &self.memory_guard else {
            return Ok(());
        };

        let check = guard.assess().await;
        *memory_usage = check.sample;
        if !check.under_pressure {
            return Ok(());
        }

        strategies.push(STRATEGY_MEMORY_GUARD.to_string());
        self.audit(AuditEntry::new(
            ACTION_MEMORY_PRESSURE,
            &options.operation_name,
            check.rejection.is_none(),
            json!({
                "sample": check.sample,
                "threshold_ratio": guard.config().threshold_ratio,
                "enforced": check.rejection.is_some(),
            }),
        ))
        .await;

        match check.rejection {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Roll back and dead-letter after a final failure.
    async fn compensate<T>(
        &self,
        options: &RecoveryOptions,
        error: &OperationError,
        result: &mut RecoveryResult<T>,
    ) {
        if let Some(transaction) = &options.transaction {
            match transaction.rollback().await {
                Ok(()) => {
                    info!(
                        transaction_id = %transaction.id(),
                        operation = %options.operation_name,
                        "Transaction rolled back"
                    );
                    result.transaction_rolled_back = true;
                    result
                        .recovery_strategy
                        .push(STRATEGY_TRANSACTION_ROLLBACK.to_string());
                    self.audit(AuditEntry::new(
                        ACTION_TRANSACTION_ROLLED_BACK,
                        &options.operation_name,
                        true,
                        json!({
                            "transaction_id": transaction.id(),
                            "error": error.to_string(),
                        }),
                    ))
                    .await;
                }
                Err(rollback_error) => {
                    error!(
                        transaction_id = %transaction.id(),
                        operation = %options.operation_name,
                        error = %rollback_error,
                        "Transaction rollback failed"
                    );
                    self.audit(AuditEntry::new(
                        ACTION_TRANSACTION_ROLLBACK_FAILED,
                        &options.operation_name,
                        false,
                        json!({
                            "transaction_id": transaction.id(),
                            "error": rollback_error.to_string(),
                        }),
                    ))
                    .await;
                }
            }
        }

        let Some(request) = &options.dead_letter else {
            return;
        };
        let Some(queue) = &self.dead_letter else {
            warn!(
                operation = %options.operation_name,
                job_type = %request.job_type,
                "Dead-letter requested but no queue is configured"
            );
            return;
        };

        match queue
            .enqueue(
                &request.original_job_id,
                &request.job_type,
                request.job_data.clone(),
                error,
                request.options.clone(),
            )
            .await
        {
            Ok(job_id) => {
                result.dead_letter_queued = true;
                result.dead_letter_job_id = Some(job_id);
                result.recovery_strategy.push(STRATEGY_DEAD_LETTER.to_string());
                self.audit(AuditEntry::new(
                    ACTION_DEAD_LETTER_ENQUEUED,
                    &options.operation_name,
                    true,
                    json!({
                        "job_id": job_id.to_string(),
                        "job_type": request.job_type,
                        "original_job_id": request.original_job_id,
                    }),
                ))
                .await;
            }
            Err(enqueue_error) => {
                error!(
                    operation = %options.operation_name,
                    job_type = %request.job_type,
                    error = %enqueue_error,
                    "Failed to dead-letter job"
                );
            }
        }
    }

    async fn audit(&self, entry: AuditEntry) {
        let action = entry.action.clone();
        if let Err(e) = self.audit.log(entry).await {
            warn!(action = %action, error = %e, "Failed to write audit entry");
        }
    }
}

impl std::fmt::Debug for EnhancedRecoveryOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnhancedRecoveryOrchestrator")
            .field("default_policy", &self.default_policy)
            .field("dead_letter", &self.dead_letter.is_some())
            .field("memory_guard", &self.memory_guard)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
