//! Tests for the resilience engine composition.

use super::*;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::FailureCategory;
use crate::test_support::{RecordingTelemetry, TelemetryEvent};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

fn breaker(failure_threshold: u32) -> Arc<CircuitBreaker> {
    Arc::new(CircuitBreaker::new(
        "whop_api",
        CircuitBreakerConfig {
            failure_threshold,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 1,
            operation_timeout: None,
            half_open_max_requests: 1,
        },
    ))
}

fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new(max_retries, Duration::from_millis(1)).without_jitter()
}

mod composition_tests {
    use super::*;

    #[tokio::test]
    async fn test_transient_failures_are_retried_to_success() {
        let telemetry = Arc::new(RecordingTelemetry::default());
        let engine = ResilienceEngine::new(
            breaker(10),
            RetryPolicy::new(3, Duration::from_millis(100)).without_jitter(),
        )
        .with_telemetry(telemetry.clone());
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result = engine
            .execute("fetch_membership", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(OperationError::from_message("Network timeout"))
                } else {
                    Ok("membership")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "membership");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(telemetry.retry_count() >= 2);
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_open_circuit_ends_retry_sequence() {
        let engine = ResilienceEngine::new(breaker(2), fast_policy(5));
        let calls = AtomicU32::new(0);

        let report = engine
            .execute_with_report("charge", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(OperationError::from_message("503 Service Unavailable"))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(report.result.unwrap_err().is_circuit_open());
        assert_eq!(report.attempts, 3);
        assert_eq!(report.circuit_state, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_call_against_open_circuit_is_never_invoked() {
        let shared = breaker(1);
        let first = ResilienceEngine::new(shared.clone(), RetryPolicy::no_retry());
        let second = ResilienceEngine::new(shared, fast_policy(3));

        let _ = first
            .execute("a", || async {
                Err::<(), _>(OperationError::from_message("connection refused"))
            })
            .await;

        let calls = AtomicU32::new(0);
        let result = second
            .execute("b", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(result.unwrap_err().is_circuit_open());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_closure_not_called_for_rejected_attempts() {
        let engine = ResilienceEngine::new(breaker(2), fast_policy(5));
        let built = AtomicU32::new(0);

        let result = engine
            .execute("charge", || {
                built.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(OperationError::from_message("503 Service Unavailable")) }
            })
            .await;

        assert!(result.unwrap_err().is_circuit_open());
        assert_eq!(built.load(Ordering::SeqCst), 2);

        let result = engine
            .execute("charge", || {
                built.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert!(result.unwrap_err().is_circuit_open());
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_business_failure_fails_fast_without_circuit_penalty() {
        let engine = ResilienceEngine::new(breaker(1), fast_policy(3));
        let calls = AtomicU32::new(0);

        let result = engine
            .execute("cancel", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(OperationError::non_retryable(
                    FailureCategory::Business,
                    "membership already cancelled",
                ))
            })
            .await;

        assert_eq!(result.unwrap_err().category(), FailureCategory::Business);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_timeout_applies_per_attempt() {
        let engine = ResilienceEngine::new(breaker(10), fast_policy(2))
            .with_timeout(Duration::from_millis(20));
        let calls = AtomicU32::new(0);

        let result = engine
            .execute("slow", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
                Ok(n)
            })
            .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(engine.breaker().metrics().timeouts, 1);
    }
}

mod telemetry_tests {
    use super::*;

    #[tokio::test]
    async fn test_start_retry_and_success_are_recorded() {
        let telemetry = Arc::new(RecordingTelemetry::default());
        let engine =
            ResilienceEngine::new(breaker(10), fast_policy(2)).with_telemetry(telemetry.clone());
        let calls = AtomicU32::new(0);

        let _ = engine
            .execute("op", || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(OperationError::from_message("socket hang up"))
                } else {
                    Ok(())
                }
            })
            .await;

        let events = telemetry.events();
        assert_eq!(events.first(), Some(&TelemetryEvent::Start));
        assert_eq!(events.last(), Some(&TelemetryEvent::Success));
        assert_eq!(telemetry.retry_count(), 1);
    }

    #[tokio::test]
    async fn test_circuit_rejection_is_distinguishable_in_failure_event() {
        let telemetry = Arc::new(RecordingTelemetry::default());
        let engine = ResilienceEngine::new(breaker(1), RetryPolicy::no_retry())
            .with_telemetry(telemetry.clone());

        for _ in 0..2 {
            let _ = engine
                .execute("op", || async {
                    Err::<(), _>(OperationError::from_message("bad gateway"))
                })
                .await;
        }

        let failures: Vec<_> = telemetry
            .events()
            .into_iter()
            .filter(|e| matches!(e, TelemetryEvent::Failure { .. }))
            .collect();
        assert_eq!(
            failures,
            vec![
                TelemetryEvent::Failure {
                    circuit_open: false
                },
                TelemetryEvent::Failure { circuit_open: true },
            ]
        );
    }
}

mod policy_tests {
    use super::*;

    #[tokio::test]
    async fn test_update_policy_applies_to_later_calls() {
        let engine = ResilienceEngine::new(breaker(100), fast_policy(0));
        let calls = AtomicU32::new(0);
        let failing = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(OperationError::from_message("Network timeout"))
        };

        let _ = engine.execute("op", failing).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        engine.update_policy(fast_policy(2));
        assert_eq!(engine.policy().max_retries, 2);

        let _ = engine.execute("op", failing).await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_for_service_shares_registry_breaker() {
        let registry = CircuitBreakerRegistry::default();
        let a = ResilienceEngine::for_service(&registry, "whop_api", RetryPolicy::default());
        let b = ResilienceEngine::for_service(&registry, "whop_api", RetryPolicy::no_retry());

        assert!(Arc::ptr_eq(a.breaker(), b.breaker()));
        assert_eq!(a.service(), "whop_api");
    }
}
