//! # Webhook Validation Module
//!
//! Decides whether an inbound platform delivery is authentic, fresh and
//! well-formed. Three independent checks run for every delivery:
//!
//! 1. [`SignatureVerifier`]: constant-time HMAC-SHA256 over the raw body
//! 2. [`ReplayGuard`]: timestamp-window check against replays
//! 3. [`EventSchemaValidator`]: envelope shape and event classification
//!
//! [`WebhookValidator`] runs all three and folds them into one
//! [`ValidationVerdict`], so a single call reports every problem at once.

use crate::{error::OperationError, Environment, Timestamp, ValidationError};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

pub mod replay;
pub mod schema;
pub mod signature;

pub use replay::{ReplayGuard, TimestampCheck, TimestampError, DEFAULT_TOLERANCE};
pub use schema::{EventSchemaValidator, SchemaReport, KNOWN_EVENT_TYPES};
pub use signature::{
    parse_signature_header, SignatureError, SignatureFormat, SignatureVerifier, WebhookSecret,
};

// ============================================================================
// Core Types
// ============================================================================

/// One inbound delivery as received over HTTP.
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    pub body: Bytes,
    pub signature: Option<String>,
    pub timestamp: Option<String>,
    /// `None` when the body is not valid JSON.
    pub envelope: Option<Value>,
    pub received_at: Timestamp,
}

impl WebhookDelivery {
    /// Create delivery and decode its envelope.
    pub fn new(body: Bytes, signature: Option<String>, timestamp: Option<String>) -> Self {
        let envelope = serde_json::from_slice(&body).ok();
        Self {
            body,
            signature,
            timestamp,
            envelope,
            received_at: Timestamp::now(),
        }
    }
}

/// Decoded platform event, handed to business handlers after validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
}

impl EventEnvelope {
    /// Build from a decoded JSON value.
    pub fn from_value(value: &Value) -> Result<Self, ValidationError> {
        let object = value.as_object().ok_or_else(|| ValidationError::InvalidFormat {
            field: "payload".to_string(),
            message: "must be a JSON object".to_string(),
        })?;

        let id = ["id", "whop_event_id"]
            .iter()
            .filter_map(|key| object.get(*key))
            .find_map(|v| match v {
                Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .ok_or_else(|| ValidationError::Required {
                field: "id".to_string(),
            })?;

        let event_type = object
            .get("type")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ValidationError::Required {
                field: "type".to_string(),
            })?
            .to_string();

        Ok(Self {
            id,
            event_type,
            data: object.get("data").cloned().unwrap_or(Value::Null),
            created_at: object.get("created_at").and_then(schema::parse_created_at),
        })
    }
}

/// Aggregated verdict for one delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationVerdict {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub event_id: Option<String>,
    pub event_type: Option<String>,
    pub is_known_event: bool,
    pub schema_compliant: bool,
    pub signature_valid: bool,
    pub timestamp_valid: bool,
}

impl ValidationVerdict {
    /// First failing check in signature, timestamp, schema order.
    pub fn rejection_category(&self) -> Option<&'static str> {
        if self.valid {
            None
        } else if !self.signature_valid {
            Some("signature")
        } else if !self.timestamp_valid {
            Some("timestamp")
        } else {
            Some("schema")
        }
    }
}

// ============================================================================
// Validator
// ============================================================================

/// Configuration for [`WebhookValidator`].
#[derive(Debug, Clone)]
pub struct WebhookValidatorConfig {
    pub secret: Option<WebhookSecret>,
    pub timestamp_tolerance: Duration,
    pub environment: Environment,
}

impl Default for WebhookValidatorConfig {
    fn default() -> Self {
        Self {
            secret: None,
            timestamp_tolerance: DEFAULT_TOLERANCE,
            environment: Environment::default(),
        }
    }
}

/// Composes signature, timestamp and schema checks into one verdict.
#[derive(Debug, Clone)]
pub struct WebhookValidator {
    signature: SignatureVerifier,
    replay: ReplayGuard,
    schema: EventSchemaValidator,
}

impl WebhookValidator {
    /// Create validator from configuration.
    pub fn new(config: WebhookValidatorConfig) -> Self {
        Self {
            signature: SignatureVerifier::new(config.secret),
            replay: ReplayGuard::new(config.timestamp_tolerance, config.environment),
            schema: EventSchemaValidator::new(),
        }
    }

    /// Replace the schema validator, e.g. to extend the known-event table.
    pub fn with_schema(mut self, schema: EventSchemaValidator) -> Self {
        self.schema = schema;
        self
    }

    /// Signature verifier in use.
    pub fn signature_verifier(&self) -> &SignatureVerifier {
        &self.signature
    }

    /// Validate a received delivery.
    pub fn validate(&self, delivery: &WebhookDelivery) -> ValidationVerdict {
        self.validate_parts(
            &delivery.body,
            delivery.signature.as_deref(),
            delivery.timestamp.as_deref(),
            delivery.envelope.as_ref(),
        )
    }

    /// Validate from individual parts.
    ///
    /// `envelope` is the decoded body; `None` means it failed to decode.
    pub fn validate_parts(
        &self,
        raw_body: &[u8],
        signature_header: Option<&str>,
        timestamp_header: Option<&str>,
        envelope: Option<&Value>,
    ) -> ValidationVerdict {
        let mut errors = Vec::new();

        let signature_valid = match self.signature.verify(raw_body, signature_header) {
            Ok(()) => true,
            Err(e) => {
                errors.push(e.to_string());
                false
            }
        };

        let timestamp_valid = match self.replay.check(timestamp_header) {
            Ok(_) => true,
            Err(e) => {
                errors.push(e.to_string());
                false
            }
        };

        let report = match envelope {
            Some(value) => self.schema.validate(value),
            None => SchemaReport {
                errors: vec!["Payload is not valid JSON".to_string()],
                ..SchemaReport::default()
            },
        };
        let schema_compliant = report.is_compliant();
        errors.extend(report.errors);

        let verdict = ValidationVerdict {
            valid: signature_valid && timestamp_valid && schema_compliant,
            errors,
            warnings: report.warnings,
            event_id: report.event_id,
            event_type: report.event_type,
            is_known_event: report.is_known_event,
            schema_compliant,
            signature_valid,
            timestamp_valid,
        };

        if verdict.valid {
            info!(
                event_id = verdict.event_id.as_deref().unwrap_or("-"),
                event_type = verdict.event_type.as_deref().unwrap_or("-"),
                known = verdict.is_known_event,
                warnings = verdict.warnings.len(),
                "Webhook delivery accepted"
            );
        } else {
            warn!(
                event_id = verdict.event_id.as_deref().unwrap_or("-"),
                event_type = verdict.event_type.as_deref().unwrap_or("-"),
                errors = ?verdict.errors,
                "Webhook delivery rejected"
            );
        }

        verdict
    }
}

// ============================================================================
// Business handler seam
// ============================================================================

/// Business logic invoked for accepted events.
///
/// Implementations live outside this crate; the core only decides whether and
/// how reliably they are called.
#[async_trait]
pub trait WebhookEventHandler: Send + Sync {
    /// Handle a validated event.
    async fn handle_event(&self, event: &EventEnvelope) -> Result<Value, OperationError>;
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
