//! API error type with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{DomainError, ErrorKind};
use saga::DUPLICATE_IN_FLIGHT;
use serde_json::{Value, json};
use thiserror::Error;

/// A [`DomainError`] on its way out as an HTTP response.
///
/// Body: `{ "error": { "kind", "message", "detail" } }`.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ApiError(#[from] DomainError);

impl ApiError {
    pub fn inner(&self) -> &DomainError {
        &self.0
    }

    pub fn status(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::NotFound | ErrorKind::InvalidQrCode => StatusCode::NOT_FOUND,
            ErrorKind::AlreadyExists | ErrorKind::AlreadyAttended | ErrorKind::BookingCancelled => {
                StatusCode::CONFLICT
            }
            ErrorKind::ValidationError => StatusCode::BAD_REQUEST,
            ErrorKind::InsufficientPermissions => StatusCode::FORBIDDEN,
            ErrorKind::LimitReached => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::DatabaseError => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::ProviderApiError => StatusCode::BAD_GATEWAY,
            ErrorKind::WorkflowError if self.0.detail_str("reason") == Some(DUPLICATE_IN_FLIGHT) => {
                StatusCode::CONFLICT
            }
            ErrorKind::WorkflowError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        metrics::counter!("api_errors_total", "kind" => self.0.kind().as_str()).increment(1);
        if status.is_server_error() {
            tracing::error!(error = %self.0, status = status.as_u16(), "request failed");
        }

        let body = json!({
            "error": {
                "kind": self.0.kind().as_str(),
                "message": self.0.message(),
                "detail": self.0.detail().cloned().unwrap_or(Value::Null),
            }
        });
        (status, axum::Json(body)).into_response()
    }
}
