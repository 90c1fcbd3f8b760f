//! Business settings endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::models::UpdateBusinessSettings;
use crate::startup::AppState;

/// GET /api/businesses/:id
#[tracing::instrument(skip(state))]
pub async fn get_business(
    State(state): State<AppState>,
    Path(business_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let business = state
        .db
        .get_business(business_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Business {} not found", business_id)))?;

    Ok(Json(json!({ "data": business })))
}

/// PATCH /api/businesses/:id
#[tracing::instrument(skip(state, request), fields(business_id = %business_id))]
pub async fn update_business(
    State(state): State<AppState>,
    Path(business_id): Path<Uuid>,
    Json(request): Json<UpdateBusinessSettings>,
) -> Result<Json<Value>, AppError> {
    request.validate()?;

    let business = state
        .db
        .update_business_settings(business_id, &request)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Business {} not found", business_id)))?;

    Ok(Json(json!({ "data": business })))
}
