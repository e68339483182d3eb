//! Default business handler for accepted webhook events.

use async_trait::async_trait;
use recovery_keeper_core::{EventEnvelope, OperationError, WebhookEventHandler};
use serde_json::{json, Value};
use tracing::info;

/// Handler that records each accepted event and acknowledges it.
///
/// Deployments embedding the service as a library pass their own
/// [`WebhookEventHandler`] to [`crate::build_application`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventHandler;

#[async_trait]
impl WebhookEventHandler for LoggingEventHandler {
    async fn handle_event(&self, event: &EventEnvelope) -> Result<Value, OperationError> {
        info!(
            event_id = %event.id,
            event_type = %event.event_type,
            created_at = ?event.created_at,
            "Webhook event acknowledged"
        );
        Ok(json!({ "acknowledged": event.id }))
    }
}
