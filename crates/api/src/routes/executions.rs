//! Workflow execution inspection and cancellation.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::CorrelationKey;
use domain::DomainError;
use execution_store::ExecutionRecord;
use serde::{Deserialize, Serialize};

use super::{AppState, parse_execution_id};
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct ExecutionQuery {
    pub correlation_key: String,
}

#[derive(Serialize)]
pub struct CancelResponse {
    pub execution_id: String,
    pub cancellation_requested: bool,
}

/// GET /executions?correlation_key=...: Every execution for a key, oldest first.
#[tracing::instrument(skip(state))]
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ExecutionQuery>,
) -> Result<Json<Vec<ExecutionRecord>>, ApiError> {
    let key = CorrelationKey::from_raw(query.correlation_key);
    Ok(Json(state.executor.executions_for(&key).await?))
}

/// GET /executions/{id}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ExecutionRecord>, ApiError> {
    let execution_id = parse_execution_id(&id)?;
    let record = state
        .executor
        .get_execution(execution_id)
        .await?
        .ok_or_else(|| DomainError::not_found("execution", execution_id))?;
    Ok(Json(record))
}

/// POST /executions/{id}/cancel: Stops a live execution at its next step.
#[tracing::instrument(skip(state))]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<CancelResponse>), ApiError> {
    let execution_id = parse_execution_id(&id)?;
    if !state.executor.cancel(execution_id) {
        return Err(DomainError::not_found("live execution", execution_id).into());
    }
    Ok((
        StatusCode::ACCEPTED,
        Json(CancelResponse {
            execution_id: execution_id.to_string(),
            cancellation_requested: true,
        }),
    ))
}
