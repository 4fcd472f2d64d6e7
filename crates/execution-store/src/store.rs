use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    CorrelationKey, ExecutionId, ExecutionOutcome, ExecutionRecord, ExecutionStatus, Result,
    StepRecord,
};

/// Core trait for execution store implementations.
///
/// Stores one row per execution plus its append-only step log.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Persists a new execution.
    ///
    /// Fails with `DuplicateExecution` if the id is taken and with
    /// `KeyInFlight` if the record is exclusive and another exclusive
    /// execution for the same key is still live.
    async fn create_execution(&self, record: ExecutionRecord) -> Result<()>;

    /// Loads an execution by id.
    async fn get_execution(&self, execution_id: ExecutionId) -> Result<Option<ExecutionRecord>>;

    /// All executions ever started for a key, oldest first.
    async fn list_for_key(&self, key: &CorrelationKey) -> Result<Vec<ExecutionRecord>>;

    /// Executions for a key that have not reached a terminal status.
    async fn find_running(&self, key: &CorrelationKey) -> Result<Vec<ExecutionRecord>>;

    /// Takes over a live execution whose lease has run out, leasing it to
    /// the caller until `lease_until`.
    ///
    /// Returns `false` when the execution is terminal or still leased by
    /// another process.
    async fn claim_execution(
        &self,
        execution_id: ExecutionId,
        lease_until: DateTime<Utc>,
    ) -> Result<bool>;

    /// Appends a completed step to the log.
    ///
    /// Fails with `StepConflict` if the index is already recorded and with
    /// `ExecutionNotFound` if the execution does not exist.
    async fn append_step(&self, step: StepRecord) -> Result<()>;

    /// Loads the step log of an execution, ordered by step index.
    async fn load_steps(&self, execution_id: ExecutionId) -> Result<Vec<StepRecord>>;

    /// Moves a non-terminal execution to another non-terminal status.
    async fn update_status(&self, execution_id: ExecutionId, status: ExecutionStatus)
    -> Result<()>;

    /// Writes the terminal outcome and stamps `finished_at`.
    ///
    /// Fails with `AlreadyFinished` if the execution is already terminal.
    async fn finish_execution(
        &self,
        execution_id: ExecutionId,
        outcome: ExecutionOutcome,
    ) -> Result<ExecutionRecord>;
}

/// Extension trait providing convenience methods for execution stores.
#[async_trait]
pub trait ExecutionStoreExt: ExecutionStore {
    /// The most recently started live execution for a key, if any.
    async fn latest_running(&self, key: &CorrelationKey) -> Result<Option<ExecutionRecord>> {
        Ok(self.find_running(key).await?.into_iter().last())
    }

    /// Loads an execution together with its step log.
    async fn load_with_steps(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Option<(ExecutionRecord, Vec<StepRecord>)>> {
        match self.get_execution(execution_id).await? {
            Some(record) => {
                let steps = self.load_steps(execution_id).await?;
                Ok(Some((record, steps)))
            }
            None => Ok(None),
        }
    }
}

// Blanket implementation for all ExecutionStore implementations
impl<T: ExecutionStore + ?Sized> ExecutionStoreExt for T {}
