//! Recovery strategies registered with the dead-letter queue.

use async_trait::async_trait;
use recovery_keeper_api::WEBHOOK_JOB_PREFIX;
use recovery_keeper_core::{
    DeadLetterJob, EventEnvelope, OperationError, RecoveryOutcome, RecoveryStrategy,
    WebhookEventHandler,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::outbound::{PlatformApiClient, PlatformCall, PLATFORM_JOB_PREFIX};

/// Replays dead-lettered platform API calls (`platform_api.*`).
#[derive(Debug)]
pub struct PlatformCallRecoveryStrategy {
    client: Arc<PlatformApiClient>,
}

impl PlatformCallRecoveryStrategy {
    pub fn new(client: Arc<PlatformApiClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RecoveryStrategy for PlatformCallRecoveryStrategy {
    fn name(&self) -> &str {
        "platform_call_replay"
    }

    fn can_handle(&self, job: &DeadLetterJob) -> bool {
        job.job_type.starts_with(PLATFORM_JOB_PREFIX)
    }

    async fn execute(&self, job: &DeadLetterJob) -> Result<RecoveryOutcome, OperationError> {
        let started = Instant::now();
        let call: PlatformCall = serde_json::from_value(job.job_data.clone()).map_err(|e| {
            OperationError::validation(format!("Job data is not a platform call: {}", e))
        })?;
        let operation = job
            .job_type
            .strip_prefix(PLATFORM_JOB_PREFIX)
            .unwrap_or(&job.job_type);

        let result = self.client.call(operation, &call).await?;

        info!(
            job_id = %job.id,
            operation = operation,
            path = %call.path,
            "Replayed platform API call"
        );
        Ok(RecoveryOutcome::recovered(
            format!("replayed {:?} {}", call.method, call.path),
            Some(result),
            started.elapsed(),
        ))
    }
}

/// Re-dispatches dead-lettered webhook events (`webhook.*`) to the handler.
pub struct WebhookReplayStrategy {
    handler: Arc<dyn WebhookEventHandler>,
}

impl WebhookReplayStrategy {
    pub fn new(handler: Arc<dyn WebhookEventHandler>) -> Self {
        Self { handler }
    }
}

impl std::fmt::Debug for WebhookReplayStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookReplayStrategy").finish_non_exhaustive()
    }
}

#[async_trait]
impl RecoveryStrategy for WebhookReplayStrategy {
    fn name(&self) -> &str {
        "webhook_replay"
    }

    fn can_handle(&self, job: &DeadLetterJob) -> bool {
        job.job_type.starts_with(WEBHOOK_JOB_PREFIX)
    }

    async fn execute(&self, job: &DeadLetterJob) -> Result<RecoveryOutcome, OperationError> {
        let started = Instant::now();
        let envelope: EventEnvelope = serde_json::from_value(job.job_data.clone()).map_err(|e| {
            OperationError::validation(format!("Job data is not an event envelope: {}", e))
        })?;

        let result = self.handler.handle_event(&envelope).await?;

        info!(
            job_id = %job.id,
            event_id = %envelope.id,
            event_type = %envelope.event_type,
            "Replayed webhook event"
        );
        Ok(RecoveryOutcome::recovered(
            format!("replayed event {}", envelope.id),
            Some(result),
            started.elapsed(),
        ))
    }
}

#[cfg(test)]
#[path = "strategies_tests.rs"]
mod tests;
