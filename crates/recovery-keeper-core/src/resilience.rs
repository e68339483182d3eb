//! # Resilience Engine
//!
//! Composes the retry executor with a shared circuit breaker.
//!
//! The breaker guards the whole retry sequence: a call made while the
//! dependency's circuit is open is rejected up front and never retried. Inside
//! a closed or half-open circuit every attempt goes through the breaker on its
//! own, so each attempt is counted, timed out and admitted individually. When
//! an attempt trips the circuit, the next attempt is rejected and the sequence
//! ends with [`OperationError::CircuitOpen`].

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tracing::debug;

use crate::{
    circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry, CircuitState},
    context::RequestContext,
    error::OperationError,
    retry::{RetryExecutor, RetryPolicy},
    telemetry::{isolate, NoOpTelemetryCollector, TelemetryCollector},
    RequestId,
};

/// Outcome of one call plus the accounting callers need to report on it.
#[derive(Debug)]
pub struct ExecutionReport<T> {
    pub result: Result<T, OperationError>,
    pub request_id: RequestId,
    /// Attempts made, including ones the breaker rejected.
    pub attempts: u32,
    pub retries: u32,
    /// Circuit state after the call finished.
    pub circuit_state: CircuitState,
    pub duration: Duration,
}

/// Retry and circuit-breaker protection for one named dependency.
pub struct ResilienceEngine {
    breaker: Arc<CircuitBreaker>,
    policy: RwLock<RetryPolicy>,
    operation_timeout: Option<Duration>,
    telemetry: Arc<dyn TelemetryCollector>,
}

impl ResilienceEngine {
    /// Create an engine around an existing breaker.
    pub fn new(breaker: Arc<CircuitBreaker>, policy: RetryPolicy) -> Self {
        Self {
            breaker,
            policy: RwLock::new(policy),
            operation_timeout: None,
            telemetry: Arc::new(NoOpTelemetryCollector),
        }
    }

    /// Create an engine sharing the registry's breaker for `service`.
    pub fn for_service(
        registry: &CircuitBreakerRegistry,
        service: &str,
        policy: RetryPolicy,
    ) -> Self {
        Self::new(registry.get_or_create(service), policy)
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetryCollector>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Per-attempt timeout overriding the breaker's configured one.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// Dependency name guarded by this engine.
    pub fn service(&self) -> &str {
        self.breaker.name()
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Snapshot of the current retry policy.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the retry policy for calls started from now on.
    ///
    /// Calls already in flight keep the policy they started with.
    pub fn update_policy(&self, policy: RetryPolicy) {
        debug!(
            service = %self.service(),
            max_retries = policy.max_retries,
            base_delay_ms = policy.base_delay.as_millis() as u64,
            "Updating retry policy"
        );
        *self.policy.write().unwrap_or_else(PoisonError::into_inner) = policy;
    }

    /// Execute `operation` under retry and circuit-breaker protection.
    pub async fn execute<T, F, Fut>(&self, operation_name: &str, operation: F) -> Result<T, OperationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        let mut ctx = RequestContext::new(operation_name, self.service());
        self.execute_in_context(&mut ctx, operation).await
    }

    /// Execute `operation` and return the result together with its accounting.
    pub async fn execute_with_report<T, F, Fut>(
        &self,
        operation_name: &str,
        operation: F,
    ) -> ExecutionReport<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        let mut ctx = RequestContext::new(operation_name, self.service());
        let result = self.execute_in_context(&mut ctx, operation).await;

        ExecutionReport {
            result,
            request_id: ctx.request_id,
            attempts: ctx.attempts,
            retries: ctx.retries,
            circuit_state: self.breaker.state(),
            duration: ctx.elapsed(),
        }
    }

    /// Execute `operation` using a caller-owned context.
    pub async fn execute_in_context<T, F, Fut>(
        &self,
        ctx: &mut RequestContext,
        operation: F,
    ) -> Result<T, OperationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        // The breaker must admit an attempt before the caller's closure runs.
        let operation = Mutex::new(operation);
        let executor = RetryExecutor::new(self.policy()).with_telemetry(self.telemetry.clone());
        let timeout = self
            .operation_timeout
            .or(self.breaker.config().operation_timeout);
        let breaker = &self.breaker;

        isolate("request_start", || self.telemetry.record_request_start(ctx));

        let result = executor
            .execute(ctx, || {
                let operation = &operation;
                async move {
                    breaker
                        .call_with_timeout(timeout, || {
                            let mut operation =
                                operation.lock().unwrap_or_else(PoisonError::into_inner);
                            (*operation)()
                        })
                        .await
                        .map_err(OperationError::from)
                }
            })
            .await;

        let duration = ctx.elapsed();
        match &result {
            Ok(_) => isolate("success", || self.telemetry.record_success(ctx, duration)),
            Err(error) => isolate("failure", || {
                self.telemetry.record_failure(ctx, error, duration)
            }),
        }
        result
    }
}

impl std::fmt::Debug for ResilienceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceEngine")
            .field("service", &self.service())
            .field("policy", &self.policy())
            .field("operation_timeout", &self.operation_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "resilience_tests.rs"]
mod tests;
