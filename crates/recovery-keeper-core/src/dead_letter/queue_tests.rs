//! Tests for the dead-letter queue service.

use super::*;
use crate::adapters::InMemoryDeadLetterStore;
use crate::dead_letter::{FnRecoveryStrategy, RecoveryOutcome};
use crate::error::FailureCategory;
use crate::test_support::{RecordingTelemetry, TelemetryEvent};
use async_trait::async_trait;
use std::sync::atomic::AtomicU32;

// ============================================================================
// Helpers
// ============================================================================

fn immediate_config(max_retries: u32) -> DeadLetterQueueConfig {
    DeadLetterQueueConfig {
        backoff: BackoffSchedule {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 2.0,
            jitter: false,
        },
        default_max_retries: max_retries,
        batch_size: 10,
    }
}

fn succeeding(prefix: &str) -> Arc<dyn RecoveryStrategy> {
    Arc::new(FnRecoveryStrategy::new("succeeding", prefix, |job| async move {
        Ok(json!({ "replayed": job.original_job_id }))
    }))
}

fn failing(prefix: &str) -> Arc<dyn RecoveryStrategy> {
    Arc::new(FnRecoveryStrategy::new("failing", prefix, |_job| async move {
        Err(OperationError::from_message("503 Service Unavailable"))
    }))
}

fn network_error() -> OperationError {
    OperationError::retryable(FailureCategory::Network, "connection reset by peer")
}

async fn enqueue_one(queue: &DeadLetterQueue, job_type: &str) -> JobId {
    queue
        .enqueue("orig-1", job_type, json!({"id": 1}), &network_error(), EnqueueOptions::default())
        .await
        .unwrap()
}

/// Strategy that reports it ran but could not recover.
struct UnrecoverableStrategy;

#[async_trait]
impl RecoveryStrategy for UnrecoverableStrategy {
    fn name(&self) -> &str {
        "unrecoverable"
    }

    fn can_handle(&self, _job: &DeadLetterJob) -> bool {
        true
    }

    async fn execute(&self, _job: &DeadLetterJob) -> Result<RecoveryOutcome, OperationError> {
        Ok(RecoveryOutcome::unrecovered("membership already deleted", Duration::ZERO))
    }
}

/// Runs to completion without getting the work done.
struct NoProgressStrategy;

#[async_trait]
impl RecoveryStrategy for NoProgressStrategy {
    fn name(&self) -> &str {
        "no_progress"
    }

    fn can_handle(&self, _job: &DeadLetterJob) -> bool {
        true
    }

    async fn execute(&self, _job: &DeadLetterJob) -> Result<RecoveryOutcome, OperationError> {
        Ok(RecoveryOutcome {
            success: true,
            recovered: false,
            result: None,
            action: "upstream still processing".to_string(),
            duration: Duration::ZERO,
            attempts: 1,
        })
    }
}

// ============================================================================
// Enqueue
// ============================================================================

mod enqueue_tests {
    use super::*;

    #[tokio::test]
    async fn test_enqueue_persists_pending_job_with_backoff() {
        let store = Arc::new(InMemoryDeadLetterStore::new());
        let queue = DeadLetterQueue::new(store.clone(), DeadLetterQueueConfig::default());
        let before = Timestamp::now();

        let job_id = queue
            .enqueue(
                "charge-42",
                "platform_api.charge",
                json!({"amount": 100}),
                &network_error(),
                EnqueueOptions::default()
                    .with_priority(3)
                    .with_company("biz_9"),
            )
            .await
            .unwrap();

        let job = queue.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, DeadLetterStatus::Pending);
        assert_eq!(job.original_job_id, "charge-42");
        assert_eq!(job.failure_reason, "network");
        assert_eq!(job.error_message, "connection reset by peer");
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.max_retries, 5);
        assert_eq!(job.priority, 3);
        assert_eq!(job.company_id.as_deref(), Some("biz_9"));
        assert!(job.next_retry_at >= before.add_duration(Duration::from_secs(60)));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_enqueue_records_telemetry() {
        let telemetry = Arc::new(RecordingTelemetry::default());
        let queue = DeadLetterQueue::new(
            Arc::new(InMemoryDeadLetterStore::new()),
            immediate_config(3),
        )
        .with_telemetry(telemetry.clone());

        enqueue_one(&queue, "webhook.payment.failed").await;

        assert_eq!(
            telemetry.events(),
            vec![TelemetryEvent::Enqueued {
                job_type: "webhook.payment.failed".to_string()
            }]
        );
    }
}

// ============================================================================
// Processing
// ============================================================================

mod processing_tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_strategy_recovers_job() {
        let queue = DeadLetterQueue::new(Arc::new(InMemoryDeadLetterStore::new()), immediate_config(3))
            .with_strategy(succeeding("webhook."));
        let job_id = enqueue_one(&queue, "webhook.payment.failed").await;

        let summary = queue.process_jobs(10).await.unwrap();

        assert_eq!(
            summary,
            BatchSummary {
                processed: 1,
                recovered: 1,
                failed: 0,
                rescheduled: 0
            }
        );
        let job = queue.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, DeadLetterStatus::Recovered);
        assert!(job.recovered_at.is_some());
        assert_eq!(job.recovery_attempts, 1);
        assert_eq!(job.metadata["recovery"]["strategy"], "succeeding");
        assert_eq!(job.metadata["recovery"]["result"]["replayed"], "orig-1");
    }

    #[tokio::test]
    async fn test_failing_strategy_exhausts_budget_then_stops() {
        let queue = DeadLetterQueue::new(Arc::new(InMemoryDeadLetterStore::new()), immediate_config(3))
            .with_strategy(failing("webhook."));
        let job_id = enqueue_one(&queue, "webhook.payment.failed").await;

        for expected_retry in 1..=2 {
            let summary = queue.process_jobs(10).await.unwrap();
            assert_eq!(summary.rescheduled, 1);
            let job = queue.get_job(&job_id).await.unwrap().unwrap();
            assert_eq!(job.status, DeadLetterStatus::Pending);
            assert_eq!(job.retry_count, expected_retry);
        }

        let summary = queue.process_jobs(10).await.unwrap();
        assert_eq!(summary.failed, 1);

        let job = queue.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, DeadLetterStatus::Failed);
        assert_eq!(job.retry_count, 3);
        assert_eq!(job.recovery_attempts, 3);
        assert!(job.error_message.contains("503"));

        // Never reprocessed
        let summary = queue.process_jobs(10).await.unwrap();
        assert_eq!(summary.processed, 0);
        assert!(queue.get_job(&job_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rescheduled_job_waits_for_backoff() {
        let mut config = immediate_config(3);
        config.backoff.base_delay = Duration::from_secs(60);
        config.backoff.max_delay = Duration::from_secs(600);
        let store = Arc::new(InMemoryDeadLetterStore::new());
        let queue = DeadLetterQueue::new(store.clone(), config).with_strategy(failing(""));

        let mut job = crate::test_support::sample_job("anything", 0);
        job.max_retries = 3;
        store.insert(&job).await.unwrap();

        queue.process_jobs(10).await.unwrap();
        let rescheduled = queue.get_job(&job.id).await.unwrap().unwrap();
        // retry_count 1 -> 60s * 2^1
        assert!(rescheduled.next_retry_at >= Timestamp::now().add_duration(Duration::from_secs(119)));
        assert_eq!(queue.process_jobs(10).await.unwrap().processed, 0);
    }

    #[tokio::test]
    async fn test_unhandled_job_is_marked_failed() {
        let queue = DeadLetterQueue::new(Arc::new(InMemoryDeadLetterStore::new()), immediate_config(3))
            .with_strategy(succeeding("webhook."));
        let job_id = enqueue_one(&queue, "platform_api.cancel").await;

        let summary = queue.process_jobs(10).await.unwrap();

        assert_eq!(summary.failed, 1);
        let job = queue.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, DeadLetterStatus::Failed);
        assert!(job.error_message.contains("No recovery strategy"));
    }

    #[tokio::test]
    async fn test_first_matching_strategy_wins() {
        let queue = DeadLetterQueue::new(Arc::new(InMemoryDeadLetterStore::new()), immediate_config(3))
            .with_strategy(succeeding("webhook."))
            .with_strategy(failing("webhook."));
        let job_id = enqueue_one(&queue, "webhook.payment.failed").await;

        queue.process_jobs(10).await.unwrap();

        let job = queue.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, DeadLetterStatus::Recovered);
        assert_eq!(queue.strategy_names(), vec!["succeeding", "failing"]);
    }

    #[tokio::test]
    async fn test_unsuccessful_outcome_counts_as_failure() {
        let queue = DeadLetterQueue::new(Arc::new(InMemoryDeadLetterStore::new()), immediate_config(1))
            .with_strategy(Arc::new(UnrecoverableStrategy));
        let job_id = enqueue_one(&queue, "webhook.x").await;

        queue.process_jobs(10).await.unwrap();

        let job = queue.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, DeadLetterStatus::Failed);
        assert!(job.error_message.contains("membership already deleted"));
    }

    #[tokio::test]
    async fn test_completed_but_unrecovered_outcome_is_retried() {
        let queue = DeadLetterQueue::new(Arc::new(InMemoryDeadLetterStore::new()), immediate_config(2))
            .with_strategy(Arc::new(NoProgressStrategy));
        let job_id = enqueue_one(&queue, "webhook.x").await;

        let summary = queue.process_jobs(10).await.unwrap();

        assert_eq!(summary.recovered, 0);
        assert_eq!(summary.rescheduled, 1);
        let job = queue.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, DeadLetterStatus::Pending);
        assert_eq!(job.retry_count, 1);
        assert!(job.recovered_at.is_none());
        assert!(job.error_message.contains("upstream still processing"));

        queue.process_jobs(10).await.unwrap();
        let job = queue.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, DeadLetterStatus::Failed);
    }

    #[tokio::test]
    async fn test_batch_respects_size_and_priority() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let strategy = FnRecoveryStrategy::new("recorder", "", move |job| {
            let recorder = recorder.clone();
            async move {
                recorder.lock().unwrap().push(job.priority);
                Ok(Value::Null)
            }
        });
        let queue = DeadLetterQueue::new(Arc::new(InMemoryDeadLetterStore::new()), immediate_config(3))
            .with_strategy(Arc::new(strategy));

        for priority in [1, 5, 3] {
            queue
                .enqueue(
                    "orig",
                    "job.x",
                    Value::Null,
                    &network_error(),
                    EnqueueOptions::default().with_priority(priority),
                )
                .await
                .unwrap();
        }

        let summary = queue.process_jobs(2).await.unwrap();

        assert_eq!(summary.processed, 2);
        assert_eq!(*seen.lock().unwrap(), vec![5, 3]);
    }

    #[tokio::test]
    async fn test_manual_only_jobs_are_not_claimed() {
        let queue = DeadLetterQueue::new(Arc::new(InMemoryDeadLetterStore::new()), immediate_config(3))
            .with_strategy(succeeding(""));
        queue
            .enqueue("o", "x.y", Value::Null, &network_error(), EnqueueOptions::default().manual_only())
            .await
            .unwrap();

        assert_eq!(queue.process_jobs(10).await.unwrap().processed, 0);
    }

    #[tokio::test]
    async fn test_concurrent_sweep_returns_empty_summary() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let slow = FnRecoveryStrategy::new("slow", "", move |_job| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(Value::Null)
            }
        });
        let queue = Arc::new(
            DeadLetterQueue::new(Arc::new(InMemoryDeadLetterStore::new()), immediate_config(3))
                .with_strategy(Arc::new(slow)),
        );
        enqueue_one(&queue, "x.y").await;

        let (first, second) = tokio::join!(queue.process_jobs(10), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            queue.process_jobs(10).await
        });

        assert_eq!(first.unwrap().processed, 1);
        assert_eq!(second.unwrap(), BatchSummary::default());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_batch_telemetry_is_recorded() {
        let telemetry = Arc::new(RecordingTelemetry::default());
        let queue = DeadLetterQueue::new(Arc::new(InMemoryDeadLetterStore::new()), immediate_config(3))
            .with_strategy(succeeding(""))
            .with_telemetry(telemetry.clone());
        enqueue_one(&queue, "x.y").await;

        queue.process_jobs(10).await.unwrap();
        // Empty sweeps are not reported
        queue.process_jobs(10).await.unwrap();

        let batches: Vec<_> = telemetry
            .events()
            .into_iter()
            .filter(|e| matches!(e, TelemetryEvent::Batch { .. }))
            .collect();
        assert_eq!(batches, vec![TelemetryEvent::Batch { processed: 1 }]);
    }
}

// ============================================================================
// Operator operations
// ============================================================================

mod operator_tests {
    use super::*;

    #[tokio::test]
    async fn test_requeue_only_accepts_failed_jobs() {
        let queue = DeadLetterQueue::new(Arc::new(InMemoryDeadLetterStore::new()), immediate_config(1))
            .with_strategy(failing(""));
        let job_id = enqueue_one(&queue, "x.y").await;

        let err = queue.requeue(&job_id).await.unwrap_err();
        assert!(matches!(err, DeadLetterError::InvalidState { .. }));

        queue.process_jobs(10).await.unwrap();
        let job = queue.requeue(&job_id).await.unwrap();
        assert_eq!(job.status, DeadLetterStatus::Pending);
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.recovery_attempts, 1);

        let missing = queue.requeue(&JobId::new()).await.unwrap_err();
        assert!(matches!(missing, DeadLetterError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_purge_removes_only_recovered_jobs() {
        let queue = DeadLetterQueue::new(Arc::new(InMemoryDeadLetterStore::new()), immediate_config(1))
            .with_strategy(succeeding("webhook."))
            .with_strategy(failing("platform_api."));
        let recovered = enqueue_one(&queue, "webhook.a").await;
        let failed = enqueue_one(&queue, "platform_api.b").await;
        queue.process_jobs(10).await.unwrap();

        assert_eq!(queue.purge_recovered(Duration::from_secs(3600)).await.unwrap(), 0);
        assert_eq!(queue.purge_recovered(Duration::ZERO).await.unwrap(), 1);

        assert!(queue.get_job(&recovered).await.unwrap().is_none());
        assert!(queue.get_job(&failed).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_purge_with_unbounded_retention_keeps_everything() {
        let queue = DeadLetterQueue::new(Arc::new(InMemoryDeadLetterStore::new()), immediate_config(1))
            .with_strategy(succeeding("webhook."));
        let recovered = enqueue_one(&queue, "webhook.a").await;
        queue.process_jobs(10).await.unwrap();

        assert_eq!(queue.purge_recovered(Duration::MAX).await.unwrap(), 0);
        assert_eq!(
            queue
                .purge_recovered(Duration::from_secs(u64::MAX.saturating_mul(3600)))
                .await
                .unwrap(),
            0
        );
        assert!(queue.get_job(&recovered).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stale_processing_jobs_are_released() {
        let store = Arc::new(InMemoryDeadLetterStore::new());
        let queue = DeadLetterQueue::new(store.clone(), immediate_config(3));
        let job_id = enqueue_one(&queue, "x.y").await;

        // Simulate a sweep that crashed after claiming
        let claimed = store.claim_due(Timestamp::now(), 10).await.unwrap();
        assert_eq!(claimed.len(), 1);

        assert_eq!(
            queue
                .recover_stale_processing(Duration::from_secs(3600))
                .await
                .unwrap(),
            0
        );
        assert_eq!(queue.recover_stale_processing(Duration::ZERO).await.unwrap(), 1);

        let job = queue.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, DeadLetterStatus::Pending);
    }

    #[tokio::test]
    async fn test_stats_and_listing() {
        let queue = DeadLetterQueue::new(Arc::new(InMemoryDeadLetterStore::new()), immediate_config(1))
            .with_strategy(failing("platform_api."));
        enqueue_one(&queue, "webhook.a").await;
        enqueue_one(&queue, "platform_api.b").await;
        queue.process_jobs(10).await.unwrap();

        let stats = queue.get_stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.failed, 2);

        let failed = queue
            .list_jobs(&DeadLetterFilter {
                job_type: Some("platform_api.b".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
    }
}

// ============================================================================
// Background processor
// ============================================================================

#[tokio::test]
async fn test_spawned_processor_recovers_and_stops_on_shutdown() {
    let queue = Arc::new(
        DeadLetterQueue::new(Arc::new(InMemoryDeadLetterStore::new()), immediate_config(3))
            .with_strategy(succeeding("")),
    );
    let job_id = enqueue_one(&queue, "x.y").await;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = queue
        .clone()
        .spawn_processor(Duration::from_millis(10), 5, shutdown_rx);

    let mut recovered = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let job = queue.get_job(&job_id).await.unwrap().unwrap();
        if job.status == DeadLetterStatus::Recovered {
            recovered = true;
            break;
        }
    }
    assert!(recovered);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("processor should stop")
        .unwrap();
}
