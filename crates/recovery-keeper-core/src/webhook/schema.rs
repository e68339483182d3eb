//! Structural validation of decoded event envelopes.

use crate::Timestamp;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::LazyLock;

static EVENT_TYPE_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^[a-z][a-z0-9_]*(\.[a-z][a-z0-9_]*)+$")
        .expect("EVENT_TYPE_RE is a valid regex pattern")
});

/// Event types the platform is known to send.
pub const KNOWN_EVENT_TYPES: &[&str] = &[
    "app_membership.went_valid",
    "app_membership.went_invalid",
    "app_payment.succeeded",
    "app_payment.failed",
    "dispute.created",
    "dispute.updated",
    "membership.cancel_at_period_end_changed",
    "membership.experience_claimed",
    "membership.metadata_updated",
    "membership.went_invalid",
    "membership.went_valid",
    "payment.affiliate_reward_created",
    "payment.failed",
    "payment.pending",
    "payment.refunded",
    "payment.succeeded",
    "refund.created",
    "refund.updated",
];

/// Result of validating one envelope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub event_id: Option<String>,
    pub event_type: Option<String>,
    pub is_known_event: bool,
    pub created_at: Option<Timestamp>,
}

impl SchemaReport {
    /// No schema errors were found.
    pub fn is_compliant(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validates envelope shape and classifies event types.
#[derive(Debug, Clone)]
pub struct EventSchemaValidator {
    known_events: HashSet<String>,
}

impl EventSchemaValidator {
    /// Create a validator with the built-in event table.
    pub fn new() -> Self {
        Self::with_known_events(KNOWN_EVENT_TYPES.iter().copied())
    }

    /// Create a validator with a custom event table.
    pub fn with_known_events<I, S>(events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known_events: events.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `event_type` is in the known-event table.
    pub fn is_known(&self, event_type: &str) -> bool {
        self.known_events.contains(event_type)
    }

    /// Validate a decoded envelope.
    pub fn validate(&self, envelope: &Value) -> SchemaReport {
        let mut report = SchemaReport::default();

        let Some(object) = envelope.as_object() else {
            report
                .errors
                .push("Payload must be a JSON object".to_string());
            return report;
        };

        report.event_id = extract_event_id(object.get("id"))
            .or_else(|| extract_event_id(object.get("whop_event_id")));
        if report.event_id.is_none() {
            report
                .errors
                .push("Missing event id (expected 'id' or 'whop_event_id')".to_string());
        }

        match object.get("type").and_then(Value::as_str) {
            Some(event_type) if !event_type.is_empty() => {
                report.event_type = Some(event_type.to_string());
                if !EVENT_TYPE_RE.is_match(event_type) {
                    report
                        .errors
                        .push(format!("Invalid event type format: {}", event_type));
                } else if self.is_known(event_type) {
                    report.is_known_event = true;
                } else {
                    report
                        .warnings
                        .push(format!("Unknown event type: {}", event_type));
                }
            }
            _ => report.errors.push("Missing event type".to_string()),
        }

        match object.get("created_at") {
            None | Some(Value::Null) => {}
            Some(value) => match parse_created_at(value) {
                Some(ts) => report.created_at = Some(ts),
                None => report
                    .errors
                    .push("Invalid created_at timestamp".to_string()),
            },
        }

        if !object.get("data").map(Value::is_object).unwrap_or(false) {
            report
                .warnings
                .push("Missing or non-object data field".to_string());
        }

        report
    }
}

impl Default for EventSchemaValidator {
    fn default() -> Self {
        Self::new()
    }
}

fn extract_event_id(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Accepts RFC3339 strings, integer Unix seconds, or numeric strings.
pub(crate) fn parse_created_at(value: &Value) -> Option<Timestamp> {
    match value {
        Value::String(s) => Timestamp::from_rfc3339(s).ok().or_else(|| {
            s.parse::<i64>()
                .ok()
                .filter(|secs| *secs >= 0)
                .and_then(|secs| Timestamp::from_unix_seconds(secs).ok())
        }),
        Value::Number(n) => n
            .as_i64()
            .filter(|secs| *secs >= 0)
            .and_then(|secs| Timestamp::from_unix_seconds(secs).ok()),
        _ => None,
    }
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
