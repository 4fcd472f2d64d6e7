//! Per-execution handle passed to saga code.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use common::{CorrelationKey, ExecutionId};
use domain::DomainError;
use execution_store::{ExecutionStore, StepRecord};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::json;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::activity::{self, ActivityPolicies, ActivityPolicy};
use crate::compensation::{Compensation, CompensationStack};
use crate::error::{ActivityFailure, store_failure};

/// Why an execution stopped before its saga returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption {
    /// [`crate::WorkflowExecutor::cancel`] was called.
    Cancelled,
    /// The overall execution deadline passed.
    DeadlineExceeded,
    /// A rejoined execution had already started compensating.
    ResumedCompensation,
}

impl Interruption {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interruption::Cancelled => "cancelled",
            Interruption::DeadlineExceeded => "execution_timeout",
            Interruption::ResumedCompensation => "resumed_compensation",
        }
    }
}

pub(crate) struct ContextParts {
    pub execution_id: ExecutionId,
    pub correlation_key: CorrelationKey,
    pub store: Arc<dyn ExecutionStore>,
    pub replay: Vec<StepRecord>,
    pub cancelled: watch::Receiver<bool>,
    pub deadline: Instant,
    pub policies: ActivityPolicies,
    pub compensate_only: bool,
}

struct ContextInner {
    execution_id: ExecutionId,
    correlation_key: CorrelationKey,
    store: Arc<dyn ExecutionStore>,
    replay: BTreeMap<u32, StepRecord>,
    cursor: AtomicU32,
    compensations: Mutex<CompensationStack>,
    cancelled: watch::Receiver<bool>,
    deadline: Instant,
    policies: ActivityPolicies,
    compensate_only: bool,
    interruption: OnceLock<Interruption>,
}

/// Handle through which a saga runs activities and registers undo actions.
///
/// Every activity gets the next step index. Outputs are appended to the
/// step log; when the execution is being replayed, an index that is already
/// in the log returns the recorded output instead of calling the
/// collaborator again.
#[derive(Clone)]
pub struct SagaContext {
    inner: Arc<ContextInner>,
}

impl SagaContext {
    pub(crate) fn new(parts: ContextParts) -> Self {
        let replay = parts
            .replay
            .into_iter()
            .map(|step| (step.step_index, step))
            .collect();

        Self {
            inner: Arc::new(ContextInner {
                execution_id: parts.execution_id,
                correlation_key: parts.correlation_key,
                store: parts.store,
                replay,
                cursor: AtomicU32::new(0),
                compensations: Mutex::new(CompensationStack::new()),
                cancelled: parts.cancelled,
                deadline: parts.deadline,
                policies: parts.policies,
                compensate_only: parts.compensate_only,
                interruption: OnceLock::new(),
            }),
        }
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.inner.execution_id
    }

    pub fn correlation_key(&self) -> &CorrelationKey {
        &self.inner.correlation_key
    }

    /// Retry presets for this execution.
    pub fn policies(&self) -> &ActivityPolicies {
        &self.inner.policies
    }

    /// Set once the execution has observed cancellation or its deadline.
    pub fn interruption(&self) -> Option<Interruption> {
        self.inner.interruption.get().copied()
    }

    /// Number of steps recorded by a previous run of this execution.
    pub fn replayed_steps(&self) -> usize {
        self.inner.replay.len()
    }

    fn compensations(&self) -> MutexGuard<'_, CompensationStack> {
        self.inner
            .compensations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn interrupt(&self, reason: Interruption) -> DomainError {
        let _ = self.inner.interruption.set(reason);
        let error = DomainError::workflow(format!(
            "execution {} stopped: {}",
            self.inner.execution_id,
            reason.as_str()
        ))
        .with_detail(json!({
            "reason": reason.as_str(),
            "execution_id": self.inner.execution_id.to_string(),
            "correlation_key": self.inner.correlation_key.as_str(),
        }));
        match reason {
            Interruption::DeadlineExceeded => error.with_non_retryable(false),
            _ => error,
        }
    }

    fn checkpoint(&self) -> Result<(), DomainError> {
        if *self.inner.cancelled.borrow() {
            return Err(self.interrupt(Interruption::Cancelled));
        }
        if Instant::now() >= self.inner.deadline {
            return Err(self.interrupt(Interruption::DeadlineExceeded));
        }
        Ok(())
    }

    /// Runs one durable step.
    ///
    /// Checks for cancellation first, then either replays the recorded
    /// output for this step index or invokes `call` under `policy` and
    /// records its output.
    pub async fn activity<T, F, Fut>(
        &self,
        name: &str,
        policy: &ActivityPolicy,
        call: F,
    ) -> Result<T, DomainError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ActivityFailure>>,
    {
        let index = self.inner.cursor.fetch_add(1, Ordering::SeqCst);

        if let Some(recorded) = self.inner.replay.get(&index) {
            if recorded.step_name != name {
                return Err(DomainError::workflow(format!(
                    "non-deterministic saga: step {index} was {} but is now {name}",
                    recorded.step_name
                ))
                .with_detail(json!({
                    "execution_id": self.inner.execution_id.to_string(),
                    "step_index": index,
                    "recorded": recorded.step_name,
                    "requested": name,
                })));
            }
            tracing::debug!(step = name, index, "replaying recorded step");
            return serde_json::from_value(recorded.output.clone()).map_err(|e| {
                DomainError::workflow(format!("recorded output of step {name} is unreadable: {e}"))
            });
        }

        if self.inner.compensate_only {
            return Err(self.interrupt(Interruption::ResumedCompensation));
        }
        self.checkpoint()?;

        tracing::info!(step = name, index, "saga step started");
        let output = activity::invoke(name, policy, call).await?;

        let value = serde_json::to_value(&output).map_err(|e| {
            DomainError::workflow(format!("output of step {name} cannot be recorded: {e}"))
        })?;
        self.inner
            .store
            .append_step(StepRecord::new(
                self.inner.execution_id,
                self.inner.correlation_key.clone(),
                index,
                name,
                value,
            ))
            .await
            .map_err(store_failure)?;

        tracing::info!(step = name, index, "saga step completed");
        Ok(output)
    }

    /// Registers the undo action for the step that just completed.
    pub fn compensate<F, Fut>(&self, description: impl Into<String>, undo: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ActivityFailure>> + Send + 'static,
    {
        self.compensations()
            .push(Compensation::new(description, undo));
    }

    /// Number of undo actions registered so far.
    pub fn pending_compensations(&self) -> usize {
        self.compensations().len()
    }

    /// Marks the execution as stopped by its deadline while it was between
    /// activity boundaries.
    pub(crate) fn deadline_exceeded(&self) -> DomainError {
        self.interrupt(Interruption::DeadlineExceeded)
    }

    pub(crate) fn take_compensations(&self) -> CompensationStack {
        std::mem::take(&mut *self.compensations())
    }
}

impl std::fmt::Debug for SagaContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaContext")
            .field("execution_id", &self.inner.execution_id)
            .field("correlation_key", &self.inner.correlation_key)
            .field("cursor", &self.inner.cursor.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
