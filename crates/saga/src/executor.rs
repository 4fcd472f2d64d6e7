//! Durable workflow executor.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use common::{CorrelationKey, ExecutionId};
use domain::DomainError;
use execution_store::{
    ExecutionOutcome, ExecutionRecord, ExecutionStatus, ExecutionStore, ExecutionStoreError,
    ExecutionStoreExt, InMemoryExecutionStore, StepRecord,
};
use serde::Serialize;
use serde_json::Value;

use crate::config::SagaConfig;
use crate::context::{ContextParts, Interruption, SagaContext};
use crate::correlation::{
    DuplicatePolicy, InFlightClaim, InFlightRegistry, Operation, duplicate_in_flight,
};
use crate::error::store_failure;

/// Runs sagas as durable executions.
///
/// Each call to [`execute`](Self::execute) claims the operation's
/// correlation key, creates (or rejoins) an execution in the store, runs the
/// saga, and on failure drains the compensations the saga registered before
/// returning the original error.
#[derive(Clone)]
pub struct WorkflowExecutor {
    store: Arc<dyn ExecutionStore>,
    registry: InFlightRegistry,
    config: SagaConfig,
}

struct Started {
    execution_id: ExecutionId,
    replay: Vec<StepRecord>,
    compensate_only: bool,
}

impl WorkflowExecutor {
    pub fn new(store: Arc<dyn ExecutionStore>, config: SagaConfig) -> Self {
        Self {
            store,
            registry: InFlightRegistry::new(),
            config,
        }
    }

    /// Executor backed by a fresh in-memory store.
    pub fn in_memory(config: SagaConfig) -> Self {
        Self::new(Arc::new(InMemoryExecutionStore::new()), config)
    }

    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    /// Executions currently running in this process.
    pub fn live_executions(&self) -> usize {
        self.registry.live_count()
    }

    /// Requests cancellation of a live execution.
    ///
    /// The saga stops at its next activity boundary, compensates, and ends
    /// as `cancelled`. Returns false if the execution is not live here.
    pub fn cancel(&self, execution_id: ExecutionId) -> bool {
        let found = self.registry.cancel(execution_id);
        if found {
            tracing::info!(%execution_id, "cancellation requested");
        }
        found
    }

    pub async fn get_execution(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Option<ExecutionRecord>, DomainError> {
        self.store
            .get_execution(execution_id)
            .await
            .map_err(store_failure)
    }

    /// Every execution started for `key`, oldest first.
    pub async fn executions_for(
        &self,
        key: &CorrelationKey,
    ) -> Result<Vec<ExecutionRecord>, DomainError> {
        self.store.list_for_key(key).await.map_err(store_failure)
    }

    /// Runs `saga` as an execution of `operation` under `key` with no
    /// recorded input.
    pub async fn execute<T, F, Fut>(
        &self,
        operation: Operation,
        key: CorrelationKey,
        saga: F,
    ) -> Result<T, DomainError>
    where
        T: Serialize + Send,
        F: FnOnce(SagaContext) -> Fut + Send,
        Fut: Future<Output = Result<T, DomainError>> + Send,
    {
        self.execute_with_input(operation, key, &Value::Null, saga)
            .await
    }

    /// Runs `saga` as an execution of `operation` under `key`.
    ///
    /// `input` is recorded with the execution. With
    /// [`DuplicatePolicy::RejectDuplicate`], a second call while the first
    /// is live fails with a `duplicate_in_flight` error. A `running`
    /// execution found in the store is rejoined (its recorded steps are
    /// replayed instead of re-invoked) only when it is not live here, its
    /// lease has run out, and it was started with the same input.
    ///
    /// The whole saga runs under the execution deadline; a saga still
    /// running when it passes is dropped and compensated as cancelled.
    #[tracing::instrument(
        skip_all,
        fields(operation = operation.name, correlation_key = %key, execution_id = tracing::field::Empty)
    )]
    pub async fn execute_with_input<I, T, F, Fut>(
        &self,
        operation: Operation,
        key: CorrelationKey,
        input: &I,
        saga: F,
    ) -> Result<T, DomainError>
    where
        I: Serialize + Sync + ?Sized,
        T: Serialize + Send,
        F: FnOnce(SagaContext) -> Fut + Send,
        Fut: Future<Output = Result<T, DomainError>> + Send,
    {
        let input = serde_json::to_value(input).map_err(|e| {
            DomainError::workflow(format!("input of {} cannot be recorded: {e}", operation.name))
        })?;
        let mut claim = self.registry.claim(&key, operation.policy)?;
        let started = self.start_or_rejoin(&mut claim, operation, input).await?;
        let execution_id = started.execution_id;
        tracing::Span::current().record("execution_id", tracing::field::display(execution_id));

        let deadline = tokio::time::Instant::now() + self.config.execution_timeout;
        let ctx = SagaContext::new(ContextParts {
            execution_id,
            correlation_key: key,
            store: self.store.clone(),
            replay: started.replay,
            cancelled: claim.cancellation(),
            deadline,
            policies: self.config.policies(),
            compensate_only: started.compensate_only,
        });

        metrics::counter!("saga_executions_total", "operation" => operation.name).increment(1);
        tracing::info!("saga started");
        let clock = Instant::now();

        let result = match tokio::time::timeout_at(deadline, saga(ctx.clone())).await {
            Ok(result) => result,
            Err(_) => Err(ctx.deadline_exceeded()),
        };

        let result = match result {
            Ok(value) => {
                let recorded = serde_json::to_value(&value).unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "saga result is not serializable");
                    Value::Null
                });
                self.complete(execution_id, recorded).await;
                metrics::counter!("saga_completed_total", "operation" => operation.name)
                    .increment(1);
                tracing::info!("saga completed");
                Ok(value)
            }
            Err(error) => {
                self.unwind(&ctx, operation, &error).await;
                Err(error)
            }
        };

        metrics::histogram!("saga_duration_seconds", "operation" => operation.name)
            .record(clock.elapsed().as_secs_f64());
        drop(claim);
        result
    }

    async fn start_or_rejoin(
        &self,
        claim: &mut InFlightClaim,
        operation: Operation,
        input: Value,
    ) -> Result<Started, DomainError> {
        let exclusive = operation.policy == DuplicatePolicy::RejectDuplicate;
        let lease_until = self.lease_until();

        if exclusive
            && let Some(record) = self
                .store
                .latest_running(claim.key())
                .await
                .map_err(store_failure)?
            && !self.registry.is_live(record.execution_id)
        {
            if record.input != input {
                tracing::warn!(
                    execution_id = %record.execution_id,
                    "running execution was started with different input"
                );
                return Err(duplicate_in_flight(claim.key(), record.execution_id));
            }
            if !self
                .store
                .claim_execution(record.execution_id, lease_until)
                .await
                .map_err(store_failure)?
            {
                tracing::info!(
                    execution_id = %record.execution_id,
                    "running execution is leased by another process"
                );
                return Err(duplicate_in_flight(claim.key(), record.execution_id));
            }

            let replay = self
                .store
                .load_steps(record.execution_id)
                .await
                .map_err(store_failure)?;
            tracing::info!(
                execution_id = %record.execution_id,
                status = %record.status,
                recorded_steps = replay.len(),
                "rejoining interrupted execution"
            );
            claim.rebind(record.execution_id);
            return Ok(Started {
                execution_id: record.execution_id,
                replay,
                compensate_only: record.status == ExecutionStatus::Compensating,
            });
        }

        let record = ExecutionRecord::start(claim.execution_id(), claim.key().clone(), operation.name)
            .with_input(input)
            .with_lease(lease_until);
        let record = if exclusive { record.exclusive_key() } else { record };

        match self.store.create_execution(record).await {
            Ok(()) => Ok(Started {
                execution_id: claim.execution_id(),
                replay: Vec::new(),
                compensate_only: false,
            }),
            // Another process started an exclusive execution for this key.
            Err(ExecutionStoreError::KeyInFlight(_)) => {
                let running = self
                    .store
                    .latest_running(claim.key())
                    .await
                    .map_err(store_failure)?
                    .map_or(claim.execution_id(), |record| record.execution_id);
                Err(duplicate_in_flight(claim.key(), running))
            }
            Err(e) => Err(store_failure(e)),
        }
    }

    /// Executions started now are owned by this process until twice the
    /// execution timeout has passed.
    fn lease_until(&self) -> DateTime<Utc> {
        let lease = chrono::Duration::from_std(self.config.execution_timeout.saturating_mul(2))
            .unwrap_or_else(|_| chrono::Duration::days(1));
        Utc::now() + lease
    }

    async fn complete(&self, execution_id: ExecutionId, result: Value) {
        // A record left `running` is rejoined and replays to the same result.
        if let Err(e) = self
            .store
            .finish_execution(execution_id, ExecutionOutcome::completed(result))
            .await
        {
            tracing::warn!(error = %e, "failed to archive completed execution");
        }
    }

    async fn unwind(&self, ctx: &SagaContext, operation: Operation, error: &DomainError) {
        let execution_id = ctx.execution_id();
        let interruption = ctx.interruption();

        if let Err(e) = self
            .store
            .update_status(execution_id, ExecutionStatus::Compensating)
            .await
        {
            tracing::warn!(error = %e, "failed to mark execution as compensating");
        }

        let mut stack = ctx.take_compensations();
        let pending = stack.len();
        let report = stack.drain(&self.config.policies().compensation).await;

        let error_value = serde_json::to_value(error).unwrap_or(Value::Null);
        let cancelled = matches!(
            interruption,
            Some(Interruption::Cancelled | Interruption::DeadlineExceeded)
        );
        let outcome = if cancelled {
            ExecutionOutcome::cancelled(error_value, report.summary())
        } else {
            ExecutionOutcome::failed(error_value, report.summary())
        };
        if let Err(e) = self.store.finish_execution(execution_id, outcome).await {
            tracing::warn!(error = %e, "failed to archive failed execution");
        }

        match interruption.filter(|_| cancelled) {
            Some(reason) => {
                metrics::counter!("saga_cancelled_total", "operation" => operation.name)
                    .increment(1);
                tracing::warn!(
                    reason = reason.as_str(),
                    compensated = report.compensated.len(),
                    "saga cancelled"
                );
            }
            None => {
                metrics::counter!(
                    "saga_failed_total",
                    "operation" => operation.name,
                    "kind" => error.kind().as_str()
                )
                .increment(1);
                if error.requires_reconciliation() {
                    tracing::error!(error = %error, "saga failed, manual reconciliation required");
                } else {
                    tracing::warn!(
                        error = %error,
                        compensations = pending,
                        compensation_failures = report.failed.len(),
                        "saga failed"
                    );
                }
            }
        }
    }
}

impl std::fmt::Debug for WorkflowExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowExecutor")
            .field("config", &self.config)
            .field("live_executions", &self.registry.live_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use domain::ErrorKind;
    use serde_json::json;

    use super::*;
    use crate::error::ActivityFailure;

    const TEST_OP: Operation = Operation::new("test.run", "test-run", DuplicatePolicy::RejectDuplicate);
    const TEST_ALLOW: Operation =
        Operation::new("test.allow", "test-allow", DuplicatePolicy::AllowDuplicate);

    fn setup() -> (WorkflowExecutor, InMemoryExecutionStore) {
        let store = InMemoryExecutionStore::new();
        let config = SagaConfig::default()
            .with_retry_intervals(Duration::from_millis(1), Duration::from_millis(2));
        (WorkflowExecutor::new(Arc::new(store.clone()), config), store)
    }

    #[tokio::test]
    async fn test_successful_execution_is_archived() {
        let (executor, store) = setup();
        let key = TEST_OP.key("one");

        let value = executor
            .execute(TEST_OP, key.clone(), |ctx| async move {
                let n: u32 = ctx
                    .activity("step", &ctx.policies().datastore, || async { Ok(5) })
                    .await?;
                Ok(n * 2)
            })
            .await
            .unwrap();
        assert_eq!(value, 10);

        let records = executor.executions_for(&key).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ExecutionStatus::Completed);
        assert_eq!(records[0].result, Some(json!(10)));
        assert_eq!(store.step_count().await, 1);
        assert_eq!(executor.live_executions(), 0);
    }

    #[tokio::test]
    async fn test_failure_drains_compensations_and_keeps_original_error() {
        let (executor, store) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));
        let key = TEST_OP.key("two");

        let saga_log = log.clone();
        let err = executor
            .execute(TEST_OP, key.clone(), move |ctx| async move {
                for name in ["a", "b"] {
                    ctx.activity(name, &ctx.policies().datastore, || async { Ok(()) })
                        .await?;
                    let log = saga_log.clone();
                    ctx.compensate(format!("undo {name}"), move || {
                        let log = log.clone();
                        async move {
                            log.lock().unwrap().push(name);
                            Ok(())
                        }
                    });
                }
                ctx.activity("c", &ctx.policies().provider, || async {
                    Err::<(), _>(ActivityFailure::provider(404, "missing"))
                })
                .await
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(*log.lock().unwrap(), vec!["b", "a"]);

        let record = &store.list_for_key(&key).await.unwrap()[0];
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(record.compensated, vec!["undo b", "undo a"]);
        assert_eq!(record.error.as_ref().unwrap()["kind"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_duplicate_in_flight_is_rejected() {
        let (executor, _) = setup();
        let key = TEST_OP.key("busy");
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let first = {
            let executor = executor.clone();
            let key = key.clone();
            tokio::spawn(async move {
                executor
                    .execute(TEST_OP, key, |_ctx| async move {
                        let _ = release_rx.await;
                        Ok(())
                    })
                    .await
            })
        };

        while executor.live_executions() == 0 {
            tokio::task::yield_now().await;
        }

        let err = executor
            .execute(TEST_OP, key.clone(), |_ctx| async { Ok(()) })
            .await
            .unwrap_err();
        assert_eq!(err.detail_str("reason"), Some("duplicate_in_flight"));
        assert!(err.is_retryable());

        release_tx.send(()).unwrap();
        first.await.unwrap().unwrap();

        // released after completion
        executor
            .execute(TEST_OP, key, |_ctx| async { Ok(()) })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_allow_duplicate_creates_separate_executions() {
        let (executor, _) = setup();
        let key = TEST_ALLOW.key("x");

        for _ in 0..3 {
            executor
                .execute(TEST_ALLOW, key.clone(), |_ctx| async { Ok(()) })
                .await
                .unwrap();
        }
        assert_eq!(executor.executions_for(&key).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_rejoin_replays_recorded_steps() {
        let (executor, store) = setup();
        let key = TEST_OP.key("resume");

        // An execution interrupted after its first step
        let interrupted = ExecutionId::new();
        store
            .create_execution(ExecutionRecord::start(interrupted, key.clone(), TEST_OP.name))
            .await
            .unwrap();
        store
            .append_step(StepRecord::new(interrupted, key.clone(), 0, "first", json!("recorded")))
            .await
            .unwrap();

        let first_calls = Arc::new(Mutex::new(0));
        let calls = first_calls.clone();
        let value = executor
            .execute(TEST_OP, key.clone(), move |ctx| async move {
                assert_eq!(ctx.execution_id(), interrupted);
                let first: String = ctx
                    .activity("first", &ctx.policies().datastore, || {
                        *calls.lock().unwrap() += 1;
                        async { Ok("fresh".to_string()) }
                    })
                    .await?;
                let second: String = ctx
                    .activity("second", &ctx.policies().datastore, || async {
                        Ok("new".to_string())
                    })
                    .await?;
                Ok(format!("{first}+{second}"))
            })
            .await
            .unwrap();

        assert_eq!(value, "recorded+new");
        assert_eq!(*first_calls.lock().unwrap(), 0);
        let record = executor.get_execution(interrupted).await.unwrap().unwrap();
        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(store.load_steps(interrupted).await.unwrap().len(), 2);
        assert_eq!(executor.executions_for(&key).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejoined_compensating_execution_finishes_compensation() {
        let (executor, store) = setup();
        let key = TEST_OP.key("half-undone");
        let interrupted = ExecutionId::new();
        store
            .create_execution(ExecutionRecord::start(interrupted, key.clone(), TEST_OP.name))
            .await
            .unwrap();
        store
            .append_step(StepRecord::new(interrupted, key.clone(), 0, "create", json!(1)))
            .await
            .unwrap();
        store
            .update_status(interrupted, ExecutionStatus::Compensating)
            .await
            .unwrap();

        let undone = Arc::new(Mutex::new(false));
        let flag = undone.clone();
        let err = executor
            .execute(TEST_OP, key, move |ctx| async move {
                let _: u32 = ctx
                    .activity("create", &ctx.policies().datastore, || async { Ok(2) })
                    .await?;
                let flag = flag.clone();
                ctx.compensate("undo create", move || {
                    let flag = flag.clone();
                    async move {
                        *flag.lock().unwrap() = true;
                        Ok(())
                    }
                });
                ctx.activity("next", &ctx.policies().datastore, || async { Ok(()) })
                    .await
            })
            .await
            .unwrap_err();

        assert_eq!(err.detail_str("reason"), Some("resumed_compensation"));
        assert!(*undone.lock().unwrap());
        let record = executor.get_execution(interrupted).await.unwrap().unwrap();
        assert_eq!(record.status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn test_cancel_stops_at_next_boundary_and_compensates() {
        let (executor, store) = setup();
        let key = TEST_OP.key("cancel-me");
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<ExecutionId>();
        let (resume_tx, resume_rx) = tokio::sync::oneshot::channel::<()>();
        let undone = Arc::new(Mutex::new(false));

        let task = {
            let executor = executor.clone();
            let key = key.clone();
            let flag = undone.clone();
            tokio::spawn(async move {
                executor
                    .execute(TEST_OP, key, move |ctx| async move {
                        ctx.activity("reserve", &ctx.policies().datastore, || async { Ok(()) })
                            .await?;
                        let flag = flag.clone();
                        ctx.compensate("release", move || {
                            let flag = flag.clone();
                            async move {
                                *flag.lock().unwrap() = true;
                                Ok(())
                            }
                        });
                        let _ = started_tx.send(ctx.execution_id());
                        let _ = resume_rx.await;
                        ctx.activity("charge", &ctx.policies().provider, || async { Ok(()) })
                            .await
                    })
                    .await
            })
        };

        let execution_id = started_rx.await.unwrap();
        assert!(executor.cancel(execution_id));
        resume_tx.send(()).unwrap();

        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WorkflowError);
        assert_eq!(err.detail_str("reason"), Some("cancelled"));
        assert!(*undone.lock().unwrap());

        let record = store.get_execution(execution_id).await.unwrap().unwrap();
        assert_eq!(record.status, ExecutionStatus::Cancelled);
        assert_eq!(record.compensated, vec!["release"]);
        assert_eq!(store.load_steps(execution_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_deadline_forces_cancellation() {
        let store = InMemoryExecutionStore::new();
        let config = SagaConfig::default().with_execution_timeout(Duration::from_millis(10));
        let executor = WorkflowExecutor::new(Arc::new(store.clone()), config);
        let key = TEST_OP.key("slow");

        let err = executor
            .execute(TEST_OP, key.clone(), |ctx| async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                ctx.activity("late", &ctx.policies().datastore, || async { Ok(()) })
                    .await
            })
            .await
            .unwrap_err();

        assert_eq!(err.detail_str("reason"), Some("execution_timeout"));
        assert!(err.is_retryable());
        let record = &store.list_for_key(&key).await.unwrap()[0];
        assert_eq!(record.status, ExecutionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_rejoin_requires_matching_input() {
        let (executor, store) = setup();
        let key = TEST_OP.key("changed");
        let interrupted = ExecutionId::new();
        store
            .create_execution(
                ExecutionRecord::start(interrupted, key.clone(), TEST_OP.name)
                    .with_input(json!({"name": "old"})),
            )
            .await
            .unwrap();
        store
            .append_step(StepRecord::new(interrupted, key.clone(), 0, "write", json!("old")))
            .await
            .unwrap();

        let err = executor
            .execute_with_input(TEST_OP, key.clone(), &json!({"name": "new"}), |ctx| async move {
                ctx.activity("write", &ctx.policies().datastore, || async {
                    Ok("new".to_string())
                })
                .await
            })
            .await
            .unwrap_err();
        assert_eq!(err.detail_str("reason"), Some("duplicate_in_flight"));
        assert!(err.is_retryable());
        assert_eq!(store.load_steps(interrupted).await.unwrap().len(), 1);
        assert_eq!(executor.executions_for(&key).await.unwrap().len(), 1);

        // The same input takes the interrupted execution over.
        let value = executor
            .execute_with_input(TEST_OP, key, &json!({"name": "old"}), |ctx| async move {
                ctx.activity("write", &ctx.policies().datastore, || async {
                    Ok("new".to_string())
                })
                .await
            })
            .await
            .unwrap();
        assert_eq!(value, "old");
    }

    #[tokio::test]
    async fn test_execution_leased_elsewhere_is_not_rejoined() {
        let (executor, store) = setup();
        let key = TEST_OP.key("elsewhere");
        let running = ExecutionId::new();
        store
            .create_execution(
                ExecutionRecord::start(running, key.clone(), TEST_OP.name)
                    .exclusive_key()
                    .with_lease(Utc::now() + chrono::Duration::minutes(5)),
            )
            .await
            .unwrap();

        let err = executor
            .execute(TEST_OP, key.clone(), |_ctx| async { Ok(()) })
            .await
            .unwrap_err();
        assert_eq!(err.detail_str("reason"), Some("duplicate_in_flight"));
        assert_eq!(
            err.detail_str("execution_id"),
            Some(running.to_string().as_str())
        );
        let record = store.get_execution(running).await.unwrap().unwrap();
        assert_eq!(record.status, ExecutionStatus::Running);
        assert_eq!(executor.live_executions(), 0);
    }

    #[tokio::test]
    async fn test_started_execution_records_input_and_holds_key() {
        let (executor, store) = setup();
        let key = TEST_OP.key("recorded");
        let allow_key = TEST_ALLOW.key("recorded");

        executor
            .execute_with_input(TEST_OP, key.clone(), &json!({"n": 1}), |_ctx| async { Ok(()) })
            .await
            .unwrap();
        executor
            .execute(TEST_ALLOW, allow_key.clone(), |_ctx| async { Ok(()) })
            .await
            .unwrap();

        let exclusive = &store.list_for_key(&key).await.unwrap()[0];
        assert!(exclusive.exclusive);
        assert_eq!(exclusive.input, json!({"n": 1}));
        assert!(exclusive.lease_expires_at.is_some());
        let shared = &store.list_for_key(&allow_key).await.unwrap()[0];
        assert!(!shared.exclusive);
        assert_eq!(shared.input, Value::Null);
    }

    #[tokio::test]
    async fn test_deadline_interrupts_saga_between_activities() {
        let store = InMemoryExecutionStore::new();
        let config = SagaConfig::default().with_execution_timeout(Duration::from_millis(20));
        let executor = WorkflowExecutor::new(Arc::new(store.clone()), config);
        let key = TEST_OP.key("stuck");
        let undone = Arc::new(Mutex::new(false));

        let flag = undone.clone();
        let err = executor
            .execute(TEST_OP, key.clone(), move |ctx| async move {
                ctx.activity("reserve", &ctx.policies().datastore, || async { Ok(()) })
                    .await?;
                let flag = flag.clone();
                ctx.compensate("release", move || {
                    let flag = flag.clone();
                    async move {
                        *flag.lock().unwrap() = true;
                        Ok(())
                    }
                });
                // Never reaches another activity boundary.
                std::future::pending::<Result<(), DomainError>>().await
            })
            .await
            .unwrap_err();

        assert_eq!(err.detail_str("reason"), Some("execution_timeout"));
        assert!(*undone.lock().unwrap());
        let record = &store.list_for_key(&key).await.unwrap()[0];
        assert_eq!(record.status, ExecutionStatus::Cancelled);
        assert_eq!(record.compensated, vec!["release"]);
        assert_eq!(executor.live_executions(), 0);
    }

    #[tokio::test]
    async fn test_cancel_unknown_execution() {
        let (executor, _) = setup();
        assert!(!executor.cancel(ExecutionId::new()));
    }
}
