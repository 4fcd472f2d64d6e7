//! End-user identity endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use domain::{Booking, EndUserIdentity, LocalUser};
use saga::{CreateEndUser, UpdateEndUser};

use super::{AppState, parse_record_id};
use crate::error::ApiError;

/// POST /users: Create (or return the existing) end user.
#[tracing::instrument(skip(state, req))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateEndUser>,
) -> Result<(StatusCode, Json<EndUserIdentity>), ApiError> {
    let identity = state.identity.create_end_user(req).await?;
    Ok((StatusCode::CREATED, Json(identity)))
}

/// PATCH /users/{id}
#[tracing::instrument(skip(state, req))]
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateEndUser>,
) -> Result<Json<EndUserIdentity>, ApiError> {
    let user_id = parse_record_id(&id)?;
    let identity = state.identity.update_end_user(user_id, req).await?;
    Ok(Json(identity))
}

/// DELETE /users/{id}: Deletes at the provider and marks the local row.
#[tracing::instrument(skip(state))]
pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<LocalUser>, ApiError> {
    let user_id = parse_record_id(&id)?;
    let user = state.identity.delete_end_user(user_id).await?;
    Ok(Json(user))
}

/// GET /users/{id}/bookings
#[tracing::instrument(skip(state))]
pub async fn bookings(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Booking>>, ApiError> {
    Ok(Json(state.bookings.bookings_for_user(&id).await?))
}
