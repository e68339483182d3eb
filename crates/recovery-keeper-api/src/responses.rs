//! HTTP response and query types

use recovery_keeper_core::{
    circuit_breaker::{CircuitMetrics, CircuitState},
    DeadLetterFilter, DeadLetterJob, DeadLetterStatus, ParseError, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

// ============================================================================
// Webhook
// ============================================================================

/// Body returned for an accepted delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub received: bool,
    pub event_id: String,
    pub event_type: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

// ============================================================================
// Health
// ============================================================================

/// Dead-letter counts shown on the health endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterHealth {
    pub pending: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `healthy`, or `degraded` while any circuit is not closed
    pub status: String,
    pub version: String,
    pub timestamp: Timestamp,
    pub circuits: BTreeMap<String, CircuitState>,
    pub dead_letter: DeadLetterHealth,
}

// ============================================================================
// Dead-letter administration
// ============================================================================

/// Query parameters for listing dead-letter jobs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobListParams {
    pub status: Option<String>,
    pub job_type: Option<String>,
    pub company_id: Option<String>,
    pub limit: Option<usize>,
}

impl JobListParams {
    /// Convert to a store filter.
    pub fn to_filter(&self) -> Result<DeadLetterFilter, ParseError> {
        let status = self
            .status
            .as_deref()
            .map(DeadLetterStatus::from_str)
            .transpose()?;

        Ok(DeadLetterFilter {
            status,
            job_type: self.job_type.clone(),
            company_id: self.company_id.clone(),
            limit: self.limit,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobListResponse {
    pub count: usize,
    pub jobs: Vec<DeadLetterJob>,
}

/// Query parameters for a manual processing sweep
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessParams {
    pub batch_size: Option<usize>,
}

// ============================================================================
// Circuit administration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitListResponse {
    pub circuits: BTreeMap<String, CircuitMetrics>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitResetResponse {
    pub name: String,
    pub state: CircuitState,
}
