//! Execution and step records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{CorrelationKey, ExecutionId};

/// The status of a workflow execution.
///
/// State transitions:
/// ```text
/// Running ──┬──────────────────────► Completed
///           └──► Compensating ──┬──► Failed
///                               └──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Saga steps are being executed.
    #[default]
    Running,

    /// A step failed or cancellation was observed; undo actions are running.
    Compensating,

    /// All steps completed successfully (terminal state).
    Completed,

    /// The saga failed and compensation finished (terminal state).
    Failed,

    /// The saga was cancelled and compensation finished (terminal state).
    Cancelled,
}

impl ExecutionStatus {
    /// Returns true if the execution can begin compensation.
    pub fn can_compensate(&self) -> bool {
        matches!(self, ExecutionStatus::Running)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    /// Returns the state name as stored.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Compensating => "compensating",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    /// Parses a stored state name.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(ExecutionStatus::Running),
            "compensating" => Some(ExecutionStatus::Compensating),
            "completed" => Some(ExecutionStatus::Completed),
            "failed" => Some(ExecutionStatus::Failed),
            "cancelled" => Some(ExecutionStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: ExecutionId,
    pub correlation_key: CorrelationKey,
    /// Operation type, e.g. `"user.create"`.
    pub operation: String,
    pub status: ExecutionStatus,
    /// Serialized input the execution was started with. A rejoin must
    /// present the same input.
    #[serde(default)]
    pub input: Value,
    /// Exclusive executions hold their correlation key: at most one of them
    /// is live per key.
    #[serde(default)]
    pub exclusive: bool,
    /// The starting process owns the execution until this instant; after it
    /// the execution may be rejoined elsewhere.
    #[serde(default)]
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Serialized saga result, set on completion.
    pub result: Option<Value>,
    /// Serialized error, set on failure or cancellation.
    pub error: Option<Value>,
    /// Descriptions of the undo actions that ran, newest first.
    pub compensated: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    /// A fresh running execution.
    pub fn start(
        execution_id: ExecutionId,
        correlation_key: CorrelationKey,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            execution_id,
            correlation_key,
            operation: operation.into(),
            status: ExecutionStatus::Running,
            input: Value::Null,
            exclusive: false,
            lease_expires_at: None,
            result: None,
            error: None,
            compensated: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    /// Marks the execution as holding its correlation key.
    pub fn exclusive_key(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn with_lease(mut self, until: DateTime<Utc>) -> Self {
        self.lease_expires_at = Some(until);
        self
    }

    /// True while the owning process's lease has not run out.
    pub fn is_leased_at(&self, now: DateTime<Utc>) -> bool {
        self.lease_expires_at.is_some_and(|until| until > now)
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Output of one completed activity, keyed by `(execution_id, step_index)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub execution_id: ExecutionId,
    pub correlation_key: CorrelationKey,
    pub step_index: u32,
    pub step_name: String,
    pub output: Value,
    pub recorded_at: DateTime<Utc>,
}

impl StepRecord {
    pub fn new(
        execution_id: ExecutionId,
        correlation_key: CorrelationKey,
        step_index: u32,
        step_name: impl Into<String>,
        output: Value,
    ) -> Self {
        Self {
            execution_id,
            correlation_key,
            step_index,
            step_name: step_name.into(),
            output,
            recorded_at: Utc::now(),
        }
    }
}

/// Terminal outcome written by [`crate::ExecutionStore::finish_execution`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    pub result: Option<Value>,
    pub error: Option<Value>,
    pub compensated: Vec<String>,
}

impl ExecutionOutcome {
    pub fn completed(result: Value) -> Self {
        Self {
            status: ExecutionStatus::Completed,
            result: Some(result),
            error: None,
            compensated: Vec::new(),
        }
    }

    pub fn failed(error: Value, compensated: Vec<String>) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            result: None,
            error: Some(error),
            compensated,
        }
    }

    pub fn cancelled(error: Value, compensated: Vec<String>) -> Self {
        Self {
            status: ExecutionStatus::Cancelled,
            result: None,
            error: Some(error),
            compensated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status_is_running() {
        assert_eq!(ExecutionStatus::default(), ExecutionStatus::Running);
    }

    #[test]
    fn test_can_compensate() {
        assert!(ExecutionStatus::Running.can_compensate());
        assert!(!ExecutionStatus::Compensating.can_compensate());
        assert!(!ExecutionStatus::Completed.can_compensate());
        assert!(!ExecutionStatus::Failed.can_compensate());
        assert!(!ExecutionStatus::Cancelled.can_compensate());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(!ExecutionStatus::Compensating.is_terminal());
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_parse_matches_as_str() {
        for status in [
            ExecutionStatus::Running,
            ExecutionStatus::Compensating,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            assert_eq!(ExecutionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ExecutionStatus::parse("paused"), None);
    }

    #[test]
    fn test_start_record() {
        let record = ExecutionRecord::start(
            ExecutionId::new(),
            CorrelationKey::new("user-create", "a@x.com"),
            "user.create",
        );
        assert_eq!(record.status, ExecutionStatus::Running);
        assert!(!record.is_finished());
        assert!(record.finished_at.is_none());
    }
}
