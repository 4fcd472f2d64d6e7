//! Raw collaborator failures and their classification into [`DomainError`].

use domain::{DomainError, ErrorKind};
use execution_store::ExecutionStoreError;
use serde_json::{Value, json};
use thiserror::Error;

/// A failure as reported by a collaborator, before classification.
///
/// Collaborator adapters return this type; the activity invoker turns it
/// into a [`DomainError`] through the `From` impl below, which is the single
/// place where retryability is decided.
#[derive(Debug, Clone, Error)]
pub enum ActivityFailure {
    /// An HTTP-status-shaped error from the identity or directory provider.
    #[error("provider responded {status}: {message}")]
    Provider {
        status: u16,
        message: String,
        detail: Option<Value>,
    },

    /// A unique constraint rejected the write.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    /// The row to update or delete does not exist.
    #[error("{entity} {id} not found")]
    RowNotFound { entity: String, id: String },

    /// Any other datastore driver failure.
    #[error("datastore failure: {0}")]
    Datastore(String),

    /// The collaborator rejected the input.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The collaborator answered with a payload that does not have the
    /// expected shape.
    #[error("malformed payload from {collaborator}: {message}")]
    Malformed {
        collaborator: String,
        message: String,
    },

    /// The call did not finish within the activity timeout.
    #[error("activity {activity} timed out after {timeout_ms} ms")]
    Timeout { activity: String, timeout_ms: u64 },

    /// Already classified; passes through unchanged.
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl ActivityFailure {
    pub fn provider(status: u16, message: impl Into<String>) -> Self {
        ActivityFailure::Provider {
            status,
            message: message.into(),
            detail: None,
        }
    }

    pub fn row_not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        ActivityFailure::RowNotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    pub fn malformed(collaborator: &str, message: impl Into<String>) -> Self {
        ActivityFailure::Malformed {
            collaborator: collaborator.to_string(),
            message: message.into(),
        }
    }
}

impl From<ActivityFailure> for DomainError {
    fn from(failure: ActivityFailure) -> Self {
        let message = failure.to_string();
        match failure {
            ActivityFailure::Provider { status, detail, .. } => {
                let kind = match status {
                    404 => ErrorKind::NotFound,
                    409 => ErrorKind::AlreadyExists,
                    400 | 422 => ErrorKind::ValidationError,
                    401 | 403 => ErrorKind::InsufficientPermissions,
                    _ => ErrorKind::ProviderApiError,
                };
                let detail = match detail {
                    Some(Value::Object(mut map)) => {
                        map.insert("status".to_string(), json!(status));
                        Value::Object(map)
                    }
                    Some(other) => json!({ "status": status, "body": other }),
                    None => json!({ "status": status }),
                };
                DomainError::new(kind, message).with_detail(detail)
            }
            ActivityFailure::UniqueViolation(constraint) => DomainError::already_exists(message)
                .with_detail(json!({ "constraint": constraint })),
            ActivityFailure::RowNotFound { entity, id } => DomainError::not_found(&entity, id),
            ActivityFailure::Datastore(_) => DomainError::database(message),
            ActivityFailure::Validation(_) => DomainError::validation(message),
            ActivityFailure::Malformed { collaborator, .. } => DomainError::provider_api(message)
                .with_detail(json!({ "collaborator": collaborator }))
                .with_non_retryable(true),
            ActivityFailure::Timeout {
                activity,
                timeout_ms,
            } => DomainError::workflow(message)
                .with_detail(json!({ "activity": activity, "timeout_ms": timeout_ms }))
                .with_non_retryable(false),
            ActivityFailure::Domain(error) => error,
        }
    }
}

/// Classifies an execution store failure.
pub fn store_failure(err: ExecutionStoreError) -> DomainError {
    match err {
        ExecutionStoreError::StepConflict {
            execution_id,
            step_index,
        } => DomainError::workflow(format!(
            "step {step_index} of execution {execution_id} was recorded concurrently"
        ))
        .with_detail(json!({
            "execution_id": execution_id.to_string(),
            "step_index": step_index,
        })),
        other => DomainError::database(other.to_string()),
    }
}
