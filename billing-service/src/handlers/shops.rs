//! Shop profile endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::models::UpdateShop;
use crate::startup::AppState;

/// GET /api/shops/:id
#[tracing::instrument(skip(state))]
pub async fn get_shop(
    State(state): State<AppState>,
    Path(shop_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let shop = state
        .db
        .get_shop(shop_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Shop {} not found", shop_id)))?;

    Ok(Json(json!({ "data": shop })))
}

/// PATCH /api/shops/:id
#[tracing::instrument(skip(state, request), fields(shop_id = %shop_id))]
pub async fn update_shop(
    State(state): State<AppState>,
    Path(shop_id): Path<Uuid>,
    Json(request): Json<UpdateShop>,
) -> Result<Json<Value>, AppError> {
    request.validate()?;

    let shop = state
        .db
        .update_shop(shop_id, &request)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Shop {} not found", shop_id)))?;

    Ok(Json(json!({ "data": shop })))
}
