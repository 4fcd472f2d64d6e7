//! Booking endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use saga::{BookingConfirmation, CancellationResult, CheckInResult, CreateBookingRequest};
use serde::Deserialize;

use super::{AppState, parse_record_id};
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct CheckInRequest {
    #[serde(alias = "qrCode")]
    pub qr_code: String,
}

#[derive(Deserialize, Default)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// POST /bookings
#[tracing::instrument(skip(state, req))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<BookingConfirmation>), ApiError> {
    let confirmation = state.bookings.create_booking(req).await?;
    Ok((StatusCode::CREATED, Json(confirmation)))
}

/// POST /bookings/check-in: Admits the holder of a QR code.
#[tracing::instrument(skip(state, req))]
pub async fn check_in(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CheckInRequest>,
) -> Result<Json<CheckInResult>, ApiError> {
    Ok(Json(state.bookings.check_in_with_qr_code(&req.qr_code).await?))
}

/// POST /bookings/{id}/cancel
#[tracing::instrument(skip(state, req))]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<CancellationResult>, ApiError> {
    let booking_id = parse_record_id(&id)?;
    let result = state.bookings.cancel_booking(booking_id, req.reason).await?;
    Ok(Json(result))
}
