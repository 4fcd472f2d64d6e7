//! The closed error taxonomy shared by every saga.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

/// Detail key marking an error that left collaborators inconsistent
/// and needs an operator to reconcile them.
pub const RECONCILIATION_FLAG: &str = "requires_manual_reconciliation";

/// Kind of a [`DomainError`].
///
/// Serialized in `SCREAMING_SNAKE_CASE` (`NOT_FOUND`, `INVALID_QR_CODE`, ...),
/// which is the form callers and the transport layer match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    ValidationError,
    InsufficientPermissions,
    LimitReached,
    AlreadyAttended,
    BookingCancelled,
    InvalidQrCode,
    DatabaseError,
    ProviderApiError,
    WorkflowError,
}

impl ErrorKind {
    /// Whether errors of this kind skip retries unless overridden.
    ///
    /// Only infrastructure kinds are retryable by default; everything that
    /// describes the request or the current state of a record would fail
    /// identically on the next attempt.
    pub fn default_non_retryable(&self) -> bool {
        !matches!(self, ErrorKind::DatabaseError | ErrorKind::ProviderApiError)
    }

    /// Returns the wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::AlreadyExists => "ALREADY_EXISTS",
            ErrorKind::ValidationError => "VALIDATION_ERROR",
            ErrorKind::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            ErrorKind::LimitReached => "LIMIT_REACHED",
            ErrorKind::AlreadyAttended => "ALREADY_ATTENDED",
            ErrorKind::BookingCancelled => "BOOKING_CANCELLED",
            ErrorKind::InvalidQrCode => "INVALID_QR_CODE",
            ErrorKind::DatabaseError => "DATABASE_ERROR",
            ErrorKind::ProviderApiError => "PROVIDER_API_ERROR",
            ErrorKind::WorkflowError => "WORKFLOW_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The only error type that crosses a saga boundary.
///
/// Carries a [`ErrorKind`], a human-readable message, optional structured
/// detail, and whether retrying the failed call could change the outcome.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct DomainError {
    kind: ErrorKind,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    detail: Option<Value>,
    non_retryable: bool,
}

impl DomainError {
    /// Creates an error with the kind's default retry behavior.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
            non_retryable: kind.default_non_retryable(),
        }
    }

    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::NotFound, format!("{entity} {id} not found"))
            .with_detail(json!({ "entity": entity, "id": id.to_string() }))
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationError, message)
    }

    pub fn insufficient_permissions(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InsufficientPermissions, message)
    }

    pub fn limit_reached(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LimitReached, message)
    }

    pub fn already_attended(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyAttended, message)
    }

    pub fn booking_cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BookingCancelled, message)
    }

    pub fn invalid_qr_code(code: &str) -> Self {
        Self::new(
            ErrorKind::InvalidQrCode,
            format!("no booking matches QR code {code}"),
        )
        .with_detail(json!({ "qr_code": code }))
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DatabaseError, message)
    }

    pub fn provider_api(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProviderApiError, message)
    }

    pub fn workflow(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::WorkflowError, message)
    }

    /// A failure that left the collaborators out of sync and must not be
    /// compensated automatically.
    pub fn reconciliation_required(message: impl Into<String>, detail: Value) -> Self {
        let mut detail = match detail {
            Value::Object(map) => Value::Object(map),
            Value::Null => json!({}),
            other => json!({ "context": other }),
        };
        if let Some(map) = detail.as_object_mut() {
            map.insert(RECONCILIATION_FLAG.to_string(), Value::Bool(true));
        }
        Self::workflow(message).with_detail(detail)
    }

    /// Attaches structured detail, replacing any previous detail.
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Overrides the kind's default retry behavior.
    pub fn with_non_retryable(mut self, non_retryable: bool) -> Self {
        self.non_retryable = non_retryable;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn detail(&self) -> Option<&Value> {
        self.detail.as_ref()
    }

    pub fn is_non_retryable(&self) -> bool {
        self.non_retryable
    }

    pub fn is_retryable(&self) -> bool {
        !self.non_retryable
    }

    /// Returns true if this error was tagged for manual reconciliation.
    pub fn requires_reconciliation(&self) -> bool {
        self.detail
            .as_ref()
            .and_then(|d| d.get(RECONCILIATION_FLAG))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Looks up a string field in the detail object.
    pub fn detail_str(&self, field: &str) -> Option<&str> {
        self.detail.as_ref()?.get(field)?.as_str()
    }
}
