//! Recovery strategy plugin interface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::DeadLetterJob;
use crate::error::OperationError;

/// What a strategy reports after working on a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryOutcome {
    /// The strategy ran to completion.
    pub success: bool,
    /// The underlying work is now done. Only `success && recovered` marks
    /// the job recovered; any other outcome counts as a failed attempt.
    pub recovered: bool,
    pub result: Option<Value>,
    /// Short description of what was done, for the audit trail.
    pub action: String,
    pub duration: Duration,
    pub attempts: u32,
}

impl RecoveryOutcome {
    /// Successful recovery in one attempt.
    pub fn recovered(action: impl Into<String>, result: Option<Value>, duration: Duration) -> Self {
        Self {
            success: true,
            recovered: true,
            result,
            action: action.into(),
            duration,
            attempts: 1,
        }
    }

    /// The strategy ran but could not recover the job.
    pub fn unrecovered(action: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: false,
            recovered: false,
            result: None,
            action: action.into(),
            duration,
            attempts: 1,
        }
    }
}

/// Host-supplied recovery logic for a family of jobs.
///
/// Strategies are consulted in registration order; the first whose
/// [`can_handle`](RecoveryStrategy::can_handle) returns `true` runs the job.
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn can_handle(&self, job: &DeadLetterJob) -> bool;

    async fn execute(&self, job: &DeadLetterJob) -> Result<RecoveryOutcome, OperationError>;
}

type BoxedHandler = Arc<
    dyn Fn(DeadLetterJob) -> Pin<Box<dyn Future<Output = Result<Value, OperationError>> + Send>>
        + Send
        + Sync,
>;

/// Strategy backed by a closure, matching jobs by job-type prefix.
///
/// # Examples
///
/// ```rust
/// use recovery_keeper_core::FnRecoveryStrategy;
/// use serde_json::json;
///
/// let strategy = FnRecoveryStrategy::new("email_resend", "email.", |job| async move {
///     Ok(json!({ "resent": job.original_job_id }))
/// });
/// ```
#[derive(Clone)]
pub struct FnRecoveryStrategy {
    name: String,
    job_type_prefix: String,
    handler: BoxedHandler,
}

impl FnRecoveryStrategy {
    pub fn new<F, Fut>(name: impl Into<String>, job_type_prefix: impl Into<String>, handler: F) -> Self
    where
        F: Fn(DeadLetterJob) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, OperationError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            job_type_prefix: job_type_prefix.into(),
            handler: Arc::new(move |job| Box::pin(handler(job))),
        }
    }
}

#[async_trait]
impl RecoveryStrategy for FnRecoveryStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_handle(&self, job: &DeadLetterJob) -> bool {
        job.job_type.starts_with(&self.job_type_prefix)
    }

    async fn execute(&self, job: &DeadLetterJob) -> Result<RecoveryOutcome, OperationError> {
        let started = Instant::now();
        let result = (self.handler)(job.clone()).await?;
        Ok(RecoveryOutcome::recovered(
            format!("{} completed", self.name),
            Some(result),
            started.elapsed(),
        ))
    }
}

impl std::fmt::Debug for FnRecoveryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnRecoveryStrategy")
            .field("name", &self.name)
            .field("job_type_prefix", &self.job_type_prefix)
            .finish_non_exhaustive()
    }
}
