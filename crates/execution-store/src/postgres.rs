use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    CorrelationKey, ExecutionId, ExecutionOutcome, ExecutionRecord, ExecutionStatus,
    ExecutionStoreError, Result, StepRecord, store::ExecutionStore,
};

/// PostgreSQL-backed execution store implementation.
#[derive(Clone)]
pub struct PostgresExecutionStore {
    pool: PgPool,
}

impl PostgresExecutionStore {
    /// Creates a new PostgreSQL execution store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to `database_url` with a small pool.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_execution(row: PgRow) -> Result<ExecutionRecord> {
        let status: String = row.try_get("status")?;
        let status = ExecutionStatus::parse(&status)
            .ok_or_else(|| ExecutionStoreError::CorruptRecord(format!("unknown status {status}")))?;
        let compensated: Value = row.try_get("compensated")?;

        Ok(ExecutionRecord {
            execution_id: ExecutionId::from_uuid(row.try_get::<Uuid, _>("execution_id")?),
            correlation_key: CorrelationKey::from_raw(row.try_get::<String, _>("correlation_key")?),
            operation: row.try_get("operation")?,
            status,
            input: row.try_get("input")?,
            exclusive: row.try_get("exclusive")?,
            lease_expires_at: row.try_get::<Option<DateTime<Utc>>, _>("lease_expires_at")?,
            result: row.try_get("result")?,
            error: row.try_get("error")?,
            compensated: serde_json::from_value(compensated)?,
            started_at: row.try_get::<DateTime<Utc>, _>("started_at")?,
            finished_at: row.try_get::<Option<DateTime<Utc>>, _>("finished_at")?,
        })
    }

    fn row_to_step(row: PgRow) -> Result<StepRecord> {
        let step_index: i64 = row.try_get("step_index")?;
        let step_index = u32::try_from(step_index).map_err(|_| {
            ExecutionStoreError::CorruptRecord(format!("step index out of range: {step_index}"))
        })?;

        Ok(StepRecord {
            execution_id: ExecutionId::from_uuid(row.try_get::<Uuid, _>("execution_id")?),
            correlation_key: CorrelationKey::from_raw(row.try_get::<String, _>("correlation_key")?),
            step_index,
            step_name: row.try_get("step_name")?,
            output: row.try_get("output")?,
            recorded_at: row.try_get::<DateTime<Utc>, _>("recorded_at")?,
        })
    }

    async fn current_status(&self, execution_id: ExecutionId) -> Result<ExecutionStatus> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM workflow_executions WHERE execution_id = $1")
                .bind(execution_id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;
        let status = status.ok_or(ExecutionStoreError::ExecutionNotFound(execution_id))?;
        ExecutionStatus::parse(&status)
            .ok_or_else(|| ExecutionStoreError::CorruptRecord(format!("unknown status {status}")))
    }
}

const EXECUTION_COLUMNS: &str = "execution_id, correlation_key, operation, status, input, \
                                 exclusive, lease_expires_at, result, error, compensated, \
                                 started_at, finished_at";

const LIVE_KEY_INDEX: &str = "uq_workflow_executions_live_key";

#[async_trait]
impl ExecutionStore for PostgresExecutionStore {
    async fn create_execution(&self, record: ExecutionRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO workflow_executions
                (execution_id, correlation_key, operation, status, input, exclusive,
                 lease_expires_at, result, error, compensated, started_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(record.execution_id.as_uuid())
        .bind(record.correlation_key.as_str())
        .bind(&record.operation)
        .bind(record.status.as_str())
        .bind(&record.input)
        .bind(record.exclusive)
        .bind(record.lease_expires_at)
        .bind(&record.result)
        .bind(&record.error)
        .bind(serde_json::to_value(&record.compensated)?)
        .bind(record.started_at)
        .bind(record.finished_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err))
                if db_err.is_unique_violation() && db_err.constraint() == Some(LIVE_KEY_INDEX) =>
            {
                Err(ExecutionStoreError::KeyInFlight(record.correlation_key))
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(
                ExecutionStoreError::DuplicateExecution(record.execution_id),
            ),
            Err(e) => Err(ExecutionStoreError::Database(e)),
        }
    }

    async fn get_execution(&self, execution_id: ExecutionId) -> Result<Option<ExecutionRecord>> {
        let row: Option<PgRow> = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM workflow_executions WHERE execution_id = $1"
        ))
        .bind(execution_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_execution).transpose()
    }

    async fn list_for_key(&self, key: &CorrelationKey) -> Result<Vec<ExecutionRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM workflow_executions \
             WHERE correlation_key = $1 ORDER BY started_at ASC"
        ))
        .bind(key.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_execution).collect()
    }

    async fn find_running(&self, key: &CorrelationKey) -> Result<Vec<ExecutionRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM workflow_executions \
             WHERE correlation_key = $1 AND status IN ('running', 'compensating') \
             ORDER BY started_at ASC"
        ))
        .bind(key.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_execution).collect()
    }

    async fn claim_execution(
        &self,
        execution_id: ExecutionId,
        lease_until: DateTime<Utc>,
    ) -> Result<bool> {
        let claimed = sqlx::query(
            r#"
            UPDATE workflow_executions SET lease_expires_at = $2
            WHERE execution_id = $1
              AND status IN ('running', 'compensating')
              AND (lease_expires_at IS NULL OR lease_expires_at < NOW())
            "#,
        )
        .bind(execution_id.as_uuid())
        .bind(lease_until)
        .execute(&self.pool)
        .await?;

        if claimed.rows_affected() == 0 {
            // Distinguishes a missing execution from one we may not take.
            self.current_status(execution_id).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn append_step(&self, step: StepRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO workflow_steps
                (execution_id, step_index, correlation_key, step_name, output, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(step.execution_id.as_uuid())
        .bind(i64::from(step.step_index))
        .bind(step.correlation_key.as_str())
        .bind(&step.step_name)
        .bind(&step.output)
        .bind(step.recorded_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(ExecutionStoreError::StepConflict {
                    execution_id: step.execution_id,
                    step_index: step.step_index,
                })
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_foreign_key_violation() => {
                Err(ExecutionStoreError::ExecutionNotFound(step.execution_id))
            }
            Err(e) => Err(ExecutionStoreError::Database(e)),
        }
    }

    async fn load_steps(&self, execution_id: ExecutionId) -> Result<Vec<StepRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT execution_id, step_index, correlation_key, step_name, output, recorded_at
            FROM workflow_steps
            WHERE execution_id = $1
            ORDER BY step_index ASC
            "#,
        )
        .bind(execution_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_step).collect()
    }

    async fn update_status(
        &self,
        execution_id: ExecutionId,
        status: ExecutionStatus,
    ) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE workflow_executions SET status = $2
            WHERE execution_id = $1 AND status IN ('running', 'compensating')
            "#,
        )
        .bind(execution_id.as_uuid())
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            let current = self.current_status(execution_id).await?;
            return Err(ExecutionStoreError::AlreadyFinished {
                execution_id,
                status: current,
            });
        }
        Ok(())
    }

    async fn finish_execution(
        &self,
        execution_id: ExecutionId,
        outcome: ExecutionOutcome,
    ) -> Result<ExecutionRecord> {
        let row: Option<PgRow> = sqlx::query(&format!(
            r#"
            UPDATE workflow_executions
            SET status = $2, result = $3, error = $4, compensated = $5, finished_at = NOW()
            WHERE execution_id = $1 AND status IN ('running', 'compensating')
            RETURNING {EXECUTION_COLUMNS}
            "#
        ))
        .bind(execution_id.as_uuid())
        .bind(outcome.status.as_str())
        .bind(&outcome.result)
        .bind(&outcome.error)
        .bind(serde_json::to_value(&outcome.compensated)?)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_execution(row),
            None => {
                let current = self.current_status(execution_id).await?;
                Err(ExecutionStoreError::AlreadyFinished {
                    execution_id,
                    status: current,
                })
            }
        }
    }
}
