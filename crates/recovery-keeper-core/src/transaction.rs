//! Transaction collaborator interface.
//!
//! The orchestrator does not open transactions itself. A caller that opened
//! one hands it over through `RecoveryOptions`, and the orchestrator rolls it
//! back when the operation finally fails.

use async_trait::async_trait;
use thiserror::Error;

/// A unit of work that can be undone.
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Identifier used in audit entries.
    fn id(&self) -> &str;

    /// Undo everything done within the transaction.
    async fn rollback(&self) -> Result<(), TransactionError>;
}

/// Errors raised by transaction collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    #[error("Transaction {transaction_id} is no longer active")]
    NotActive { transaction_id: String },

    #[error("Rollback of transaction {transaction_id} failed: {message}")]
    RollbackFailed {
        transaction_id: String,
        message: String,
    },
}
