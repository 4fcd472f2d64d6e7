//! Brand endpoints, nested under their organization.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use domain::{Brand, NewBrand, PlanType};
use serde::Deserialize;

use super::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct CreateBrandRequest {
    pub name: String,
    #[serde(default, alias = "planType")]
    pub plan_type: PlanType,
    #[serde(default, alias = "requestedBy")]
    pub requested_by: Option<String>,
}

/// POST /organizations/{id}/brands
#[tracing::instrument(skip(state, req))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Path(organization_id): Path<String>,
    Json(req): Json<CreateBrandRequest>,
) -> Result<(StatusCode, Json<Brand>), ApiError> {
    let brand = state
        .brands
        .create_brand(NewBrand {
            organization_id,
            name: req.name,
            plan_type: req.plan_type,
            requested_by: req.requested_by,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(brand)))
}

/// GET /organizations/{id}/brands
#[tracing::instrument(skip(state))]
pub async fn list(
    State(state): State<Arc<AppState>>,
    Path(organization_id): Path<String>,
) -> Result<Json<Vec<Brand>>, ApiError> {
    Ok(Json(state.brands.brands_for_organization(&organization_id).await?))
}
