//! Circuit breaker implementation.
//!
//! State lives behind one `RwLock` per breaker. The lock is held only while
//! deciding admission and while recording an outcome, never across the
//! wrapped operation, so concurrent callers never race into inconsistent
//! transitions.

use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{info, warn};

use super::{
    CircuitBreakerConfig, CircuitBreakerError, CircuitFailure, CircuitHooks, CircuitMetrics,
    CircuitState,
};
use crate::telemetry::{isolate, NoOpTelemetryCollector, TelemetryCollector};
use crate::Timestamp;

// ============================================================================
// Internal State
// ============================================================================

#[derive(Debug)]
struct InternalState {
    current_state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    half_open_in_flight: u32,
    last_state_change: Timestamp,
    opened_at: Option<Instant>,
    next_recovery_attempt: Option<Timestamp>,
    requests: u64,
    successes: u64,
    failures: u64,
    timeouts: u64,
    rejected: u64,
    total_response_time_ms: f64,
}

impl InternalState {
    fn new() -> Self {
        Self {
            current_state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            half_open_in_flight: 0,
            last_state_change: Timestamp::now(),
            opened_at: None,
            next_recovery_attempt: None,
            requests: 0,
            successes: 0,
            failures: 0,
            timeouts: 0,
            rejected: 0,
            total_response_time_ms: 0.0,
        }
    }

    fn failure_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.failures as f64 / self.requests as f64
        }
    }

    fn avg_response_time_ms(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.total_response_time_ms / self.requests as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    Timeout,
    /// Failed, but not evidence of an unhealthy dependency.
    Neutral,
}

type Transition = (CircuitState, CircuitState);

// ============================================================================
// Circuit Breaker
// ============================================================================

/// Closed/open/half-open guard for one named dependency.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: RwLock<InternalState>,
    hooks: CircuitHooks,
    telemetry: Arc<dyn TelemetryCollector>,
}

impl CircuitBreaker {
    /// Create new circuit breaker with configuration.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: RwLock::new(InternalState::new()),
            hooks: CircuitHooks::default(),
            telemetry: Arc::new(NoOpTelemetryCollector),
        }
    }

    pub fn with_hooks(mut self, hooks: CircuitHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetryCollector>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Dependency name this breaker guards.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Execute operation with circuit breaker protection and the configured timeout.
    pub async fn call<T, E, F, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        E: CircuitFailure,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_with_timeout(self.config.operation_timeout, operation)
            .await
    }

    /// Execute operation with an explicit per-call timeout.
    ///
    /// When the timeout fires the operation future is dropped, so a result it
    /// would have produced later is discarded.
    pub async fn call_with_timeout<T, E, F, Fut>(
        &self,
        operation_timeout: Option<Duration>,
        operation: F,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        E: CircuitFailure,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let probe = self.admit::<E>()?;
        let mut guard = InFlightGuard {
            breaker: self,
            probe,
            completed: false,
        };

        let start_time = Instant::now();
        let result = match operation_timeout {
            Some(limit) => timeout(limit, operation()).await.map_err(|_| limit),
            None => Ok(operation().await),
        };
        let elapsed_ms = start_time.elapsed().as_secs_f64() * 1000.0;

        guard.completed = true;
        match result {
            Ok(Ok(value)) => {
                self.record::<E>(probe, Outcome::Success, elapsed_ms)?;
                Ok(value)
            }
            Ok(Err(error)) => {
                let outcome = if error.counts_toward_circuit() {
                    Outcome::Failure
                } else {
                    Outcome::Neutral
                };
                self.record::<E>(probe, outcome, elapsed_ms)?;
                Err(CircuitBreakerError::OperationFailed(error))
            }
            Err(limit) => {
                self.record::<E>(probe, Outcome::Timeout, elapsed_ms)?;
                Err(CircuitBreakerError::Timeout {
                    timeout_ms: limit.as_millis() as u64,
                })
            }
        }
    }

    /// Decide whether a call may run. Returns whether it is a half-open probe.
    fn admit<E>(&self) -> Result<bool, CircuitBreakerError<E>> {
        let mut transition = None;
        let decision = {
            let mut state = self
                .state
                .write()
                .map_err(|e| CircuitBreakerError::InternalError {
                    message: format!("Failed to acquire write lock: {}", e),
                })?;

            match state.current_state {
                CircuitState::Closed => Ok(false),
                CircuitState::Open => {
                    if self.should_attempt_recovery(&state) {
                        transition = Some(self.transition_to_half_open(&mut state));
                        state.half_open_in_flight += 1;
                        Ok(true)
                    } else {
                        state.rejected += 1;
                        Err(CircuitBreakerError::CircuitOpen {
                            service: self.name.clone(),
                        })
                    }
                }
                CircuitState::HalfOpen => {
                    if state.half_open_in_flight >= self.config.half_open_max_requests {
                        state.rejected += 1;
                        Err(CircuitBreakerError::TooManyConcurrentRequests {
                            service: self.name.clone(),
                        })
                    } else {
                        state.half_open_in_flight += 1;
                        Ok(true)
                    }
                }
            }
        };

        if let Some(transition) = transition {
            self.emit(transition);
        }
        decision
    }

    /// Record a finished call and apply any resulting transition.
    fn record<E>(
        &self,
        probe: bool,
        outcome: Outcome,
        elapsed_ms: f64,
    ) -> Result<(), CircuitBreakerError<E>> {
        let transition = {
            let mut state = self
                .state
                .write()
                .map_err(|e| CircuitBreakerError::InternalError {
                    message: format!("Failed to acquire write lock: {}", e),
                })?;

            state.requests += 1;
            state.total_response_time_ms += elapsed_ms;
            if probe {
                state.half_open_in_flight = state.half_open_in_flight.saturating_sub(1);
            }

            match outcome {
                Outcome::Success => self.record_success(&mut state, probe),
                Outcome::Failure => self.record_failure(&mut state, probe),
                Outcome::Timeout => {
                    state.timeouts += 1;
                    self.record_failure(&mut state, probe)
                }
                Outcome::Neutral => {
                    state.failures += 1;
                    None
                }
            }
        };

        if let Some(transition) = transition {
            self.emit(transition);
        }
        Ok(())
    }

    fn record_success(&self, state: &mut InternalState, probe: bool) -> Option<Transition> {
        state.successes += 1;
        state.consecutive_failures = 0;

        match state.current_state {
            CircuitState::HalfOpen if probe => {
                state.consecutive_successes += 1;
                if state.consecutive_successes >= self.config.success_threshold {
                    return Some(self.close_circuit(state));
                }
                None
            }
            _ => None,
        }
    }

    fn record_failure(&self, state: &mut InternalState, probe: bool) -> Option<Transition> {
        state.failures += 1;
        state.consecutive_failures += 1;
        state.consecutive_successes = 0;

        match state.current_state {
            CircuitState::Closed if state.consecutive_failures >= self.config.failure_threshold => {
                Some(self.trip_circuit(state))
            }
            // Any probe failure reopens the circuit and restarts the recovery timer
            CircuitState::HalfOpen if probe => Some(self.trip_circuit(state)),
            _ => None,
        }
    }

    fn should_attempt_recovery(&self, state: &InternalState) -> bool {
        state
            .opened_at
            .map(|opened| opened.elapsed() >= self.config.recovery_timeout)
            .unwrap_or(false)
    }

    fn trip_circuit(&self, state: &mut InternalState) -> Transition {
        let from = state.current_state;
        state.current_state = CircuitState::Open;
        state.last_state_change = Timestamp::now();
        state.opened_at = Some(Instant::now());
        state.next_recovery_attempt =
            Some(Timestamp::now().add_duration(self.config.recovery_timeout));
        state.consecutive_successes = 0;
        (from, CircuitState::Open)
    }

    fn transition_to_half_open(&self, state: &mut InternalState) -> Transition {
        let from = state.current_state;
        state.current_state = CircuitState::HalfOpen;
        state.last_state_change = Timestamp::now();
        state.next_recovery_attempt = None;
        state.consecutive_failures = 0;
        state.consecutive_successes = 0;
        state.half_open_in_flight = 0;
        (from, CircuitState::HalfOpen)
    }

    fn close_circuit(&self, state: &mut InternalState) -> Transition {
        let from = state.current_state;
        state.current_state = CircuitState::Closed;
        state.last_state_change = Timestamp::now();
        state.opened_at = None;
        state.next_recovery_attempt = None;
        state.consecutive_failures = 0;
        state.consecutive_successes = 0;
        state.half_open_in_flight = 0;
        (from, CircuitState::Closed)
    }

    /// Fire telemetry and hooks for a transition. Called without the lock held.
    fn emit(&self, (from, to): Transition) {
        match to {
            CircuitState::Open => warn!(service = %self.name, from = %from, "Circuit opened"),
            _ => info!(service = %self.name, from = %from, to = %to, "Circuit state changed"),
        }

        isolate("circuit_transition", || {
            self.telemetry.record_circuit_transition(&self.name, from, to)
        });
        if let Some(hook) = self.hooks.for_state(to) {
            isolate("circuit_hook", || hook(&self.name));
        }
    }

    fn release_abandoned_probe(&self) {
        if let Ok(mut state) = self.state.write() {
            state.half_open_in_flight = state.half_open_in_flight.saturating_sub(1);
        }
    }

    /// Current state; a poisoned lock reads as open.
    pub fn state(&self) -> CircuitState {
        self.state
            .read()
            .map(|state| state.current_state)
            .unwrap_or(CircuitState::Open)
    }

    /// Check if circuit breaker is healthy (allowing requests).
    pub fn is_healthy(&self) -> bool {
        self.state().allows_requests()
    }

    /// Snapshot of counters and state.
    pub fn metrics(&self) -> CircuitMetrics {
        let state = self
            .state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        CircuitMetrics {
            state: state.current_state,
            requests: state.requests,
            successes: state.successes,
            failures: state.failures,
            timeouts: state.timeouts,
            rejected: state.rejected,
            consecutive_failures: state.consecutive_failures,
            consecutive_successes: state.consecutive_successes,
            last_state_change: state.last_state_change,
            next_recovery_attempt: state.next_recovery_attempt,
            failure_rate: state.failure_rate(),
            avg_response_time_ms: state.avg_response_time_ms(),
        }
    }

    /// Force the circuit closed and zero every counter.
    pub fn reset(&self) {
        let transition = {
            let mut state = self
                .state
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let previous = state.current_state;
            *state = InternalState::new();
            (previous != CircuitState::Closed).then_some((previous, CircuitState::Closed))
        };

        info!(service = %self.name, "Circuit breaker reset");
        if let Some(transition) = transition {
            self.emit(transition);
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

/// Releases a half-open probe slot when the caller drops the call mid-flight.
struct InFlightGuard<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    completed: bool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.probe && !self.completed {
            self.breaker.release_abandoned_probe();
        }
    }
}

#[cfg(test)]
#[path = "breaker_tests.rs"]
mod tests;
