//! Dead-letter queue service.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use super::{
    BatchSummary, DeadLetterError, DeadLetterFilter, DeadLetterJob, DeadLetterStats,
    DeadLetterStatus, DeadLetterStore, EnqueueOptions, RecoveryStrategy,
};
use crate::{
    error::OperationError,
    retry::BackoffSchedule,
    telemetry::{isolate, NoOpTelemetryCollector, TelemetryCollector},
    JobId, Timestamp,
};

/// Queue-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadLetterQueueConfig {
    /// Schedule for `next_retry_at`, indexed by the job's retry count.
    pub backoff: BackoffSchedule,
    pub default_max_retries: u32,
    pub batch_size: usize,
}

impl Default for DeadLetterQueueConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffSchedule {
                base_delay: Duration::from_secs(60),
                max_delay: Duration::from_secs(3600),
                multiplier: 2.0,
                jitter: false,
            },
            default_max_retries: 5,
            batch_size: 10,
        }
    }
}

enum JobResolution {
    Recovered,
    Rescheduled,
    Failed,
}

/// Dead-letter queue over a pluggable store.
pub struct DeadLetterQueue {
    store: Arc<dyn DeadLetterStore>,
    strategies: Vec<Arc<dyn RecoveryStrategy>>,
    config: DeadLetterQueueConfig,
    telemetry: Arc<dyn TelemetryCollector>,
    sweeping: AtomicBool,
}

/// Clears the single-sweep flag when a sweep ends, however it ends.
struct SweepGuard<'a>(&'a AtomicBool);

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl DeadLetterQueue {
    pub fn new(store: Arc<dyn DeadLetterStore>, config: DeadLetterQueueConfig) -> Self {
        Self {
            store,
            strategies: Vec::new(),
            config,
            telemetry: Arc::new(NoOpTelemetryCollector),
            sweeping: AtomicBool::new(false),
        }
    }

    /// Register a strategy after those already registered.
    pub fn with_strategy(mut self, strategy: Arc<dyn RecoveryStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetryCollector>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn config(&self) -> &DeadLetterQueueConfig {
        &self.config
    }

    /// Strategy names in consultation order.
    pub fn strategy_names(&self) -> Vec<String> {
        self.strategies.iter().map(|s| s.name().to_string()).collect()
    }

    // ------------------------------------------------------------------------
    // Producer side
    // ------------------------------------------------------------------------

    /// Park a failed job for later recovery.
    #[instrument(skip(self, job_data, error, options))]
    pub async fn enqueue(
        &self,
        original_job_id: &str,
        job_type: &str,
        job_data: Value,
        error: &OperationError,
        options: EnqueueOptions,
    ) -> Result<JobId, DeadLetterError> {
        let now = Timestamp::now();
        let job = DeadLetterJob {
            id: JobId::new(),
            original_job_id: original_job_id.to_string(),
            job_type: job_type.to_string(),
            job_data,
            failure_reason: error.category().to_string(),
            error_message: error.to_string(),
            retry_count: 0,
            max_retries: options.max_retries.unwrap_or(self.config.default_max_retries),
            first_failed_at: now,
            last_failed_at: now,
            next_retry_at: now.add_duration(self.config.backoff.jittered_delay(0)),
            priority: options.priority,
            company_id: options.company_id,
            recovery_attempts: 0,
            auto_recovery_enabled: options.auto_recovery_enabled,
            metadata: options.metadata,
            status: DeadLetterStatus::Pending,
            recovered_at: None,
            updated_at: now,
        };

        self.store.insert(&job).await?;
        isolate("dead_letter_enqueued", || {
            self.telemetry.record_dead_letter_enqueued(&job)
        });

        info!(
            job_id = %job.id,
            original_job_id = %job.original_job_id,
            failure_reason = %job.failure_reason,
            next_retry_at = %job.next_retry_at,
            "Job added to dead-letter queue"
        );
        Ok(job.id)
    }

    // ------------------------------------------------------------------------
    // Processing
    // ------------------------------------------------------------------------

    /// Run one recovery sweep over up to `batch_size` due jobs.
    ///
    /// Only one sweep runs at a time per queue; a call made while another
    /// sweep is active returns an empty summary without touching the store.
    pub async fn process_jobs(&self, batch_size: usize) -> Result<BatchSummary, DeadLetterError> {
        if self
            .sweeping
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Dead-letter sweep already running; skipping");
            return Ok(BatchSummary::default());
        }
        let _guard = SweepGuard(&self.sweeping);

        let claimed = self.store.claim_due(Timestamp::now(), batch_size).await?;
        let mut summary = BatchSummary::default();

        for job in claimed {
            summary.processed += 1;
            match self.process_job(job).await {
                JobResolution::Recovered => summary.recovered += 1,
                JobResolution::Rescheduled => summary.rescheduled += 1,
                JobResolution::Failed => summary.failed += 1,
            }
        }

        if summary.processed > 0 {
            isolate("dead_letter_batch", || {
                self.telemetry.record_dead_letter_batch(&summary)
            });
        }
        Ok(summary)
    }

    async fn process_job(&self, mut job: DeadLetterJob) -> JobResolution {
        let Some(strategy) = self.strategies.iter().find(|s| s.can_handle(&job)).cloned() else {
            warn!(
                job_id = %job.id,
                job_type = %job.job_type,
                "No recovery strategy can handle job; marking failed"
            );
            let now = Timestamp::now();
            job.status = DeadLetterStatus::Failed;
            job.error_message = format!(
                "No recovery strategy can handle job type '{}'",
                job.job_type
            );
            job.last_failed_at = now;
            job.updated_at = now;
            self.persist(&job).await;
            return JobResolution::Failed;
        };

        let started = Instant::now();
        let outcome = strategy.execute(&job).await;
        let elapsed = started.elapsed();
        let now = Timestamp::now();
        job.recovery_attempts += 1;
        job.updated_at = now;

        let failure = match outcome {
            Ok(outcome) if outcome.success && outcome.recovered => {
                job.status = DeadLetterStatus::Recovered;
                job.recovered_at = Some(now);
                set_metadata(
                    &mut job.metadata,
                    "recovery",
                    json!({
                        "strategy": strategy.name(),
                        "action": outcome.action,
                        "result": outcome.result,
                        "duration_ms": elapsed.as_millis() as u64,
                        "attempts": outcome.attempts,
                    }),
                );
                info!(
                    job_id = %job.id,
                    strategy = strategy.name(),
                    duration_ms = elapsed.as_millis() as u64,
                    "Dead-letter job recovered"
                );
                self.persist(&job).await;
                return JobResolution::Recovered;
            }
            Ok(outcome) => format!(
                "Strategy '{}' could not recover job: {}",
                strategy.name(),
                outcome.action
            ),
            Err(error) => error.to_string(),
        };

        job.retry_count += 1;
        job.last_failed_at = now;
        job.error_message = failure;

        let resolution = if job.retries_exhausted() {
            job.status = DeadLetterStatus::Failed;
            warn!(
                job_id = %job.id,
                retry_count = job.retry_count,
                error = %job.error_message,
                "Dead-letter job failed permanently"
            );
            JobResolution::Failed
        } else {
            job.status = DeadLetterStatus::Pending;
            job.next_retry_at = now.add_duration(self.config.backoff.jittered_delay(job.retry_count));
            debug!(
                job_id = %job.id,
                retry_count = job.retry_count,
                next_retry_at = %job.next_retry_at,
                "Dead-letter job rescheduled"
            );
            JobResolution::Rescheduled
        };

        self.persist(&job).await;
        resolution
    }

    /// Write back a processed job. A failed write leaves the job in
    /// `processing`, from where `recover_stale_processing` returns it.
    async fn persist(&self, job: &DeadLetterJob) {
        if let Err(e) = self.store.update(job).await {
            error!(job_id = %job.id, error = %e, "Failed to persist dead-letter job");
        }
    }

    /// Spawn a background task running [`process_jobs`](Self::process_jobs)
    /// every `interval` until `shutdown` flips to `true` or its sender drops.
    pub fn spawn_processor(
        self: Arc<Self>,
        interval: Duration,
        batch_size: usize,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(
                interval_ms = interval.as_millis() as u64,
                batch_size, "Dead-letter processor started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.process_jobs(batch_size).await {
                            error!(error = %e, "Dead-letter sweep failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Dead-letter processor stopped");
        })
    }

    // ------------------------------------------------------------------------
    // Operator operations
    // ------------------------------------------------------------------------

    pub async fn get_stats(&self) -> Result<DeadLetterStats, DeadLetterError> {
        let jobs = self.store.list(&DeadLetterFilter::default()).await?;
        Ok(DeadLetterStats::from_jobs(&jobs, Timestamp::now()))
    }

    pub async fn get_job(&self, job_id: &JobId) -> Result<Option<DeadLetterJob>, DeadLetterError> {
        self.store.get(job_id).await
    }

    pub async fn list_jobs(
        &self,
        filter: &DeadLetterFilter,
    ) -> Result<Vec<DeadLetterJob>, DeadLetterError> {
        self.store.list(filter).await
    }

    /// Give a `failed` job a fresh retry budget and make it due now.
    pub async fn requeue(&self, job_id: &JobId) -> Result<DeadLetterJob, DeadLetterError> {
        let mut job = self
            .store
            .get(job_id)
            .await?
            .ok_or(DeadLetterError::NotFound { job_id: *job_id })?;

        if job.status != DeadLetterStatus::Failed {
            return Err(DeadLetterError::InvalidState {
                job_id: *job_id,
                status: job.status,
                expected: DeadLetterStatus::Failed,
            });
        }

        let now = Timestamp::now();
        job.status = DeadLetterStatus::Pending;
        job.retry_count = 0;
        job.next_retry_at = now;
        job.updated_at = now;
        job.auto_recovery_enabled = true;
        self.store.update(&job).await?;

        info!(job_id = %job.id, "Dead-letter job requeued by operator");
        Ok(job)
    }

    /// Delete `recovered` jobs recovered at least `older_than` ago.
    ///
    /// Failed jobs are never purged.
    pub async fn purge_recovered(&self, older_than: Duration) -> Result<usize, DeadLetterError> {
        let cutoff = Timestamp::now().subtract_duration(older_than);
        let recovered = self
            .store
            .list(&DeadLetterFilter::default().with_status(DeadLetterStatus::Recovered))
            .await?;

        let mut purged = 0;
        for job in recovered {
            if job.recovered_at.is_some_and(|at| at <= cutoff) && self.store.delete(&job.id).await? {
                purged += 1;
            }
        }

        if purged > 0 {
            info!(purged, "Purged recovered dead-letter jobs");
        }
        Ok(purged)
    }

    /// Return jobs stuck in `processing` for at least `older_than` to `pending`.
    pub async fn recover_stale_processing(
        &self,
        older_than: Duration,
    ) -> Result<usize, DeadLetterError> {
        let now = Timestamp::now();
        let cutoff = now.subtract_duration(older_than);
        let processing = self
            .store
            .list(&DeadLetterFilter::default().with_status(DeadLetterStatus::Processing))
            .await?;

        let mut released = 0;
        for mut job in processing {
            if job.updated_at > cutoff {
                continue;
            }
            job.status = DeadLetterStatus::Pending;
            job.next_retry_at = now;
            job.updated_at = now;
            self.store.update(&job).await?;
            released += 1;
        }

        if released > 0 {
            warn!(released, "Released stale processing dead-letter jobs");
        }
        Ok(released)
    }
}

impl std::fmt::Debug for DeadLetterQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadLetterQueue")
            .field("strategies", &self.strategy_names())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn set_metadata(metadata: &mut Value, key: &str, value: Value) {
    if !metadata.is_object() {
        *metadata = Value::Object(Default::default());
    }
    if let Some(map) = metadata.as_object_mut() {
        map.insert(key.to_string(), value);
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
