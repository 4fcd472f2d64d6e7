use thiserror::Error;

use crate::{CorrelationKey, ExecutionId, ExecutionStatus};

/// Errors that can occur when interacting with the execution store.
#[derive(Debug, Error)]
pub enum ExecutionStoreError {
    /// A step was already recorded at this index.
    #[error("Step {step_index} of execution {execution_id} is already recorded")]
    StepConflict {
        execution_id: ExecutionId,
        step_index: u32,
    },

    /// No execution exists with this id.
    #[error("Execution not found: {0}")]
    ExecutionNotFound(ExecutionId),

    /// An execution with this id already exists.
    #[error("Execution already exists: {0}")]
    DuplicateExecution(ExecutionId),

    /// Another exclusive execution is live for this correlation key.
    #[error("Correlation key {0} already has a live execution")]
    KeyInFlight(CorrelationKey),

    /// The execution already reached a terminal status.
    #[error("Execution {execution_id} already finished as {status}")]
    AlreadyFinished {
        execution_id: ExecutionId,
        status: ExecutionStatus,
    },

    /// A stored row could not be mapped back to a record.
    #[error("Corrupt execution record: {0}")]
    CorruptRecord(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for execution store operations.
pub type Result<T> = std::result::Result<T, ExecutionStoreError>;
