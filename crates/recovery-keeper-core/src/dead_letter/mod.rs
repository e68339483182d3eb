//! # Dead-Letter Queue
//!
//! Durable parking for work that exhausted its inline retry budget.
//!
//! Jobs move through `pending -> processing -> recovered | failed`. A job that
//! fails recovery returns to `pending` with a later `next_retry_at` until its
//! `max_retries` budget is spent, after which it stays `failed` for operator
//! inspection. Failed jobs are never deleted automatically.
//!
//! Storage is abstracted behind [`DeadLetterStore`]; recovery logic is supplied
//! by the host as an ordered list of [`RecoveryStrategy`] implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::{JobId, Timestamp};

mod queue;
mod strategy;

pub use queue::{DeadLetterQueue, DeadLetterQueueConfig};
pub use strategy::{FnRecoveryStrategy, RecoveryOutcome, RecoveryStrategy};

// ============================================================================
// Job Types
// ============================================================================

/// Lifecycle status of a dead-letter job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeadLetterStatus {
    /// Waiting for `next_retry_at`.
    Pending,
    /// Claimed by a sweep; acts as the application-level lock.
    Processing,
    Recovered,
    /// Retry budget spent. Kept for manual intervention.
    Failed,
}

impl DeadLetterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Recovered => "recovered",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Recovered | Self::Failed)
    }
}

impl fmt::Display for DeadLetterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeadLetterStatus {
    type Err = crate::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "recovered" => Ok(Self::Recovered),
            "failed" => Ok(Self::Failed),
            _ => Err(crate::ParseError::InvalidFormat {
                expected: "pending, processing, recovered, or failed".to_string(),
                actual: s.to_string(),
            }),
        }
    }
}

/// One unit of work awaiting out-of-band recovery.
///
/// This is also the persisted row format; `metadata` carries
/// strategy-specific extension data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterJob {
    pub id: JobId,
    pub original_job_id: String,
    pub job_type: String,
    pub job_data: Value,
    /// Failure category of the error that dead-lettered the job.
    pub failure_reason: String,
    pub error_message: String,
    pub retry_count: u32,
    pub max_retries: u32,
    pub first_failed_at: Timestamp,
    pub last_failed_at: Timestamp,
    pub next_retry_at: Timestamp,
    /// Higher runs first.
    pub priority: i32,
    pub company_id: Option<String>,
    pub recovery_attempts: u32,
    pub auto_recovery_enabled: bool,
    pub metadata: Value,
    pub status: DeadLetterStatus,
    pub recovered_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

impl DeadLetterJob {
    /// Whether a sweep at `now` may claim this job.
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.status == DeadLetterStatus::Pending
            && self.auto_recovery_enabled
            && self.next_retry_at <= now
    }

    /// Whether the retry budget is spent.
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

/// Processing order: highest priority first, then oldest failure first.
pub fn due_order(a: &DeadLetterJob, b: &DeadLetterJob) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.first_failed_at.cmp(&b.first_failed_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Optional settings for [`DeadLetterQueue::enqueue`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnqueueOptions {
    /// Recovery attempts allowed; queue default when `None`.
    pub max_retries: Option<u32>,
    pub priority: i32,
    pub company_id: Option<String>,
    pub auto_recovery_enabled: bool,
    pub metadata: Value,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            max_retries: None,
            priority: 0,
            company_id: None,
            auto_recovery_enabled: true,
            metadata: Value::Object(Default::default()),
        }
    }
}

impl EnqueueOptions {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_company(mut self, company_id: impl Into<String>) -> Self {
        self.company_id = Some(company_id.into());
        self
    }

    /// Park the job for manual handling only; sweeps never claim it.
    pub fn manual_only(mut self) -> Self {
        self.auto_recovery_enabled = false;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Criteria for listing jobs. Empty criteria match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadLetterFilter {
    pub status: Option<DeadLetterStatus>,
    pub job_type: Option<String>,
    pub company_id: Option<String>,
    pub limit: Option<usize>,
}

impl DeadLetterFilter {
    pub fn with_status(mut self, status: DeadLetterStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, job: &DeadLetterJob) -> bool {
        self.status.is_none_or(|s| s == job.status)
            && self.job_type.as_deref().is_none_or(|t| t == job.job_type)
            && self
                .company_id
                .as_deref()
                .is_none_or(|c| job.company_id.as_deref() == Some(c))
    }
}

// ============================================================================
// Reporting Types
// ============================================================================

/// Result of one processing sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub processed: usize,
    pub recovered: usize,
    pub failed: usize,
    /// Failed this time but returned to pending with budget left.
    pub rescheduled: usize,
}

/// Aggregate view of the queue for operational dashboards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub recovered: usize,
    pub failed: usize,
    pub average_retry_count: f64,
    /// Age of the oldest job not yet recovered.
    pub oldest_job_age_seconds: Option<u64>,
    pub by_job_type: BTreeMap<String, usize>,
    /// Keyed by company id; jobs without one are counted under `unassigned`.
    pub by_company: BTreeMap<String, usize>,
}

impl DeadLetterStats {
    pub(crate) fn from_jobs(jobs: &[DeadLetterJob], now: Timestamp) -> Self {
        let mut stats = Self {
            total: jobs.len(),
            ..Self::default()
        };

        let mut retry_total: u64 = 0;
        let mut oldest: Option<Timestamp> = None;
        for job in jobs {
            match job.status {
                DeadLetterStatus::Pending => stats.pending += 1,
                DeadLetterStatus::Processing => stats.processing += 1,
                DeadLetterStatus::Recovered => stats.recovered += 1,
                DeadLetterStatus::Failed => stats.failed += 1,
            }
            retry_total += u64::from(job.retry_count);

            if job.status != DeadLetterStatus::Recovered {
                oldest = Some(oldest.map_or(job.first_failed_at, |o| o.min(job.first_failed_at)));
            }

            *stats.by_job_type.entry(job.job_type.clone()).or_default() += 1;
            let company = job.company_id.as_deref().unwrap_or("unassigned");
            *stats.by_company.entry(company.to_string()).or_default() += 1;
        }

        if !jobs.is_empty() {
            stats.average_retry_count = retry_total as f64 / jobs.len() as f64;
        }
        stats.oldest_job_age_seconds = oldest.map(|o| now.duration_since(o).as_secs());
        stats
    }

    pub fn oldest_job_age(&self) -> Option<Duration> {
        self.oldest_job_age_seconds.map(Duration::from_secs)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors raised by the dead-letter queue and its stores.
#[derive(Debug, Error)]
pub enum DeadLetterError {
    #[error("Dead-letter job not found: {job_id}")]
    NotFound { job_id: JobId },

    #[error("Dead-letter job {job_id} is {status}, expected {expected}")]
    InvalidState {
        job_id: JobId,
        status: DeadLetterStatus,
        expected: DeadLetterStatus,
    },

    #[error("Dead-letter job already exists: {job_id}")]
    AlreadyExists { job_id: JobId },

    #[error("Serialization failed: {message}")]
    SerializationFailed { message: String },

    #[error("Dead-letter storage error: {message}")]
    Storage { message: String },
}

impl DeadLetterError {
    /// Check if error is transient and worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }
}

// ============================================================================
// Store Trait
// ============================================================================

/// Persistence for dead-letter jobs.
///
/// Implementations must make [`claim_due`](DeadLetterStore::claim_due) atomic:
/// a job handed to one caller must be `processing` before any other caller
/// can observe it as due.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Persist a new job.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if a job with the same id is stored.
    async fn insert(&self, job: &DeadLetterJob) -> Result<(), DeadLetterError>;

    async fn get(&self, job_id: &JobId) -> Result<Option<DeadLetterJob>, DeadLetterError>;

    /// Overwrite an existing job.
    ///
    /// # Errors
    ///
    /// `NotFound` if the job was never inserted or has been deleted.
    async fn update(&self, job: &DeadLetterJob) -> Result<(), DeadLetterError>;

    /// Atomically move up to `limit` due jobs to `processing` and return them
    /// in [`due_order`].
    async fn claim_due(
        &self,
        now: Timestamp,
        limit: usize,
    ) -> Result<Vec<DeadLetterJob>, DeadLetterError>;

    /// Jobs matching `filter`, oldest failure first.
    async fn list(&self, filter: &DeadLetterFilter) -> Result<Vec<DeadLetterJob>, DeadLetterError>;

    /// Remove a job. Returns whether it existed.
    async fn delete(&self, job_id: &JobId) -> Result<bool, DeadLetterError>;
}

/// Apply `filter` to `jobs` and order oldest failure first.
pub(crate) fn filter_jobs(
    jobs: impl IntoIterator<Item = DeadLetterJob>,
    filter: &DeadLetterFilter,
) -> Vec<DeadLetterJob> {
    let mut matched: Vec<DeadLetterJob> = jobs.into_iter().filter(|j| filter.matches(j)).collect();
    matched.sort_by(|a, b| {
        a.first_failed_at
            .cmp(&b.first_failed_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    if let Some(limit) = filter.limit {
        matched.truncate(limit);
    }
    matched
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
