use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    CorrelationKey, ExecutionId, ExecutionOutcome, ExecutionRecord, ExecutionStatus,
    ExecutionStoreError, Result, StepRecord, store::ExecutionStore,
};

/// In-memory execution store for tests and single-process runs.
///
/// Provides the same interface and conflict semantics as the PostgreSQL
/// implementation.
#[derive(Clone, Default)]
pub struct InMemoryExecutionStore {
    executions: Arc<RwLock<Vec<ExecutionRecord>>>,
    steps: Arc<RwLock<HashMap<ExecutionId, Vec<StepRecord>>>>,
}

impl InMemoryExecutionStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of executions stored.
    pub async fn execution_count(&self) -> usize {
        self.executions.read().await.len()
    }

    /// Returns the total number of steps recorded across all executions.
    pub async fn step_count(&self) -> usize {
        self.steps.read().await.values().map(Vec::len).sum()
    }

    /// Clears all executions and steps.
    pub async fn clear(&self) {
        self.executions.write().await.clear();
        self.steps.write().await.clear();
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn create_execution(&self, record: ExecutionRecord) -> Result<()> {
        let mut executions = self.executions.write().await;
        if executions
            .iter()
            .any(|e| e.execution_id == record.execution_id)
        {
            return Err(ExecutionStoreError::DuplicateExecution(record.execution_id));
        }
        // Partial unique index on live exclusive keys
        if record.exclusive
            && executions.iter().any(|e| {
                e.exclusive
                    && e.correlation_key == record.correlation_key
                    && !e.status.is_terminal()
            })
        {
            return Err(ExecutionStoreError::KeyInFlight(record.correlation_key));
        }
        executions.push(record);
        Ok(())
    }

    async fn get_execution(&self, execution_id: ExecutionId) -> Result<Option<ExecutionRecord>> {
        let executions = self.executions.read().await;
        Ok(executions
            .iter()
            .find(|e| e.execution_id == execution_id)
            .cloned())
    }

    async fn list_for_key(&self, key: &CorrelationKey) -> Result<Vec<ExecutionRecord>> {
        let executions = self.executions.read().await;
        Ok(executions
            .iter()
            .filter(|e| &e.correlation_key == key)
            .cloned()
            .collect())
    }

    async fn find_running(&self, key: &CorrelationKey) -> Result<Vec<ExecutionRecord>> {
        let executions = self.executions.read().await;
        Ok(executions
            .iter()
            .filter(|e| &e.correlation_key == key && !e.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn claim_execution(
        &self,
        execution_id: ExecutionId,
        lease_until: DateTime<Utc>,
    ) -> Result<bool> {
        let mut executions = self.executions.write().await;
        let record = executions
            .iter_mut()
            .find(|e| e.execution_id == execution_id)
            .ok_or(ExecutionStoreError::ExecutionNotFound(execution_id))?;

        if record.status.is_terminal() || record.is_leased_at(Utc::now()) {
            return Ok(false);
        }
        record.lease_expires_at = Some(lease_until);
        Ok(true)
    }

    async fn append_step(&self, step: StepRecord) -> Result<()> {
        let exists = self
            .executions
            .read()
            .await
            .iter()
            .any(|e| e.execution_id == step.execution_id);
        if !exists {
            return Err(ExecutionStoreError::ExecutionNotFound(step.execution_id));
        }

        let mut steps = self.steps.write().await;
        let log = steps.entry(step.execution_id).or_default();

        // Unique (execution_id, step_index) constraint simulation
        if log.iter().any(|s| s.step_index == step.step_index) {
            return Err(ExecutionStoreError::StepConflict {
                execution_id: step.execution_id,
                step_index: step.step_index,
            });
        }
        log.push(step);
        log.sort_by_key(|s| s.step_index);
        Ok(())
    }

    async fn load_steps(&self, execution_id: ExecutionId) -> Result<Vec<StepRecord>> {
        let steps = self.steps.read().await;
        Ok(steps.get(&execution_id).cloned().unwrap_or_default())
    }

    async fn update_status(
        &self,
        execution_id: ExecutionId,
        status: ExecutionStatus,
    ) -> Result<()> {
        let mut executions = self.executions.write().await;
        let record = executions
            .iter_mut()
            .find(|e| e.execution_id == execution_id)
            .ok_or(ExecutionStoreError::ExecutionNotFound(execution_id))?;

        if record.status.is_terminal() {
            return Err(ExecutionStoreError::AlreadyFinished {
                execution_id,
                status: record.status,
            });
        }
        record.status = status;
        Ok(())
    }

    async fn finish_execution(
        &self,
        execution_id: ExecutionId,
        outcome: ExecutionOutcome,
    ) -> Result<ExecutionRecord> {
        let mut executions = self.executions.write().await;
        let record = executions
            .iter_mut()
            .find(|e| e.execution_id == execution_id)
            .ok_or(ExecutionStoreError::ExecutionNotFound(execution_id))?;

        if record.status.is_terminal() {
            return Err(ExecutionStoreError::AlreadyFinished {
                execution_id,
                status: record.status,
            });
        }

        record.status = outcome.status;
        record.result = outcome.result;
        record.error = outcome.error;
        record.compensated = outcome.compensated;
        record.finished_at = Some(Utc::now());
        Ok(record.clone())
    }
}
