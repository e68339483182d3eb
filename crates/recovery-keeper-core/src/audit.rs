// Audit trail for recovery actions
//
// The orchestrator records compensating actions (transaction rollbacks,
// dead-letter hand-offs, memory pressure) as immutable audit entries. The
// concrete sink is a collaborator; in-memory and tracing sinks ship here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;
use ulid::Ulid;

use crate::Timestamp;

// ============================================================================
// Core Types
// ============================================================================

/// Audit action recorded after a transaction was rolled back.
pub const ACTION_TRANSACTION_ROLLED_BACK: &str = "transaction_rolled_back";

/// Audit action recorded when a rollback itself failed.
pub const ACTION_TRANSACTION_ROLLBACK_FAILED: &str = "transaction_rollback_failed";

/// Audit action recorded when failed work was parked for recovery.
pub const ACTION_DEAD_LETTER_ENQUEUED: &str = "dead_letter_enqueued";

/// Audit action recorded when memory usage crossed the threshold.
pub const ACTION_MEMORY_PRESSURE: &str = "memory_pressure";

/// Unique identifier for an audit entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuditLogId(Ulid);

impl AuditLogId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for AuditLogId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AuditLogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable audit record
///
/// `content_hash` covers every other field so tampering is detectable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub audit_id: AuditLogId,
    pub occurred_at: Timestamp,
    /// Machine-readable action name, e.g. `transaction_rolled_back`.
    pub action: String,
    /// Operation or resource the action applied to.
    pub resource: String,
    pub success: bool,
    pub details: Value,
    pub content_hash: String,
}

impl AuditEntry {
    /// Create a new entry stamped with the current time.
    pub fn new(
        action: impl Into<String>,
        resource: impl Into<String>,
        success: bool,
        details: Value,
    ) -> Self {
        let audit_id = AuditLogId::new();
        let occurred_at = Timestamp::now();
        let action = action.into();
        let resource = resource.into();
        let content_hash =
            Self::calculate_content_hash(&audit_id, &occurred_at, &action, &resource, success, &details);

        Self {
            audit_id,
            occurred_at,
            action,
            resource,
            success,
            details,
            content_hash,
        }
    }

    /// Verify content hash integrity
    pub fn verify_integrity(&self) -> bool {
        Self::calculate_content_hash(
            &self.audit_id,
            &self.occurred_at,
            &self.action,
            &self.resource,
            self.success,
            &self.details,
        ) == self.content_hash
    }

    fn calculate_content_hash(
        audit_id: &AuditLogId,
        occurred_at: &Timestamp,
        action: &str,
        resource: &str,
        success: bool,
        details: &Value,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(audit_id.to_string().as_bytes());
        hasher.update(occurred_at.to_rfc3339().as_bytes());
        hasher.update(action.as_bytes());
        hasher.update(resource.as_bytes());
        hasher.update([u8::from(success)]);
        hasher.update(details.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

// ============================================================================
// Core Interface
// ============================================================================

/// Sink for audit entries.
#[async_trait]
pub trait AuditLogger: Send + Sync {
    /// Record one entry.
    async fn log(&self, entry: AuditEntry) -> Result<AuditLogId, AuditError>;

    /// Flush pending entries
    async fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Audit logger keeping entries in memory, for tests and local runs.
#[derive(Debug, Default)]
pub struct InMemoryAuditLogger {
    entries: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries in the order they were logged.
    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().await.clone()
    }

    /// Entries with the given action name.
    pub async fn entries_with_action(&self, action: &str) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|e| e.action == action)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AuditLogger for InMemoryAuditLogger {
    async fn log(&self, entry: AuditEntry) -> Result<AuditLogId, AuditError> {
        let id = entry.audit_id;
        self.entries.lock().await.push(entry);
        Ok(id)
    }
}

/// Audit logger writing entries as structured `tracing` events on the
/// `audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLogger;

#[async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn log(&self, entry: AuditEntry) -> Result<AuditLogId, AuditError> {
        info!(
            target: "audit",
            audit_id = %entry.audit_id,
            action = %entry.action,
            resource = %entry.resource,
            success = entry.success,
            details = %entry.details,
            content_hash = %entry.content_hash,
            "Audit entry"
        );
        Ok(entry.audit_id)
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during audit logging operations
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditError {
    #[error("Storage error: {message}")]
    StorageError { message: String },

    #[error("Serialization error: {message}")]
    SerializationError { message: String },
}

#[cfg(test)]
#[path = "audit_tests.rs"]
mod tests;
