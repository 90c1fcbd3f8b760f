//! Product catalog endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::models::{ListProductsFilter, NewProduct, UpdateProduct};
use crate::startup::AppState;

/// Query parameters for GET /api/products.
#[derive(Debug, Deserialize)]
pub struct ListProductsQuery {
    #[serde(rename = "businessId")]
    pub business_id: Option<Uuid>,
    pub search: Option<String>,
    pub active: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET /api/products
#[tracing::instrument(skip(state, query))]
pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ListProductsQuery>,
) -> Result<Json<Value>, AppError> {
    let filter = ListProductsFilter {
        business_id: query.business_id,
        search: query.search,
        active_only: query.active.unwrap_or(false),
        limit: query.limit.unwrap_or(20),
        offset: query.offset.unwrap_or(0),
    };

    let (products, total) = state.db.list_products(&filter).await?;

    Ok(Json(json!({ "data": products, "total": total })))
}

/// POST /api/products
#[tracing::instrument(skip(state, request), fields(business_id = %request.business_id))]
pub async fn create_product(
    State(state): State<AppState>,
    Json(request): Json<NewProduct>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    request.validate()?;

    let product = state.db.create_product(&request).await?;

    Ok((StatusCode::CREATED, Json(json!({ "data": product }))))
}

/// GET /api/products/:id
#[tracing::instrument(skip(state))]
pub async fn get_product(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let product = state
        .db
        .get_product(product_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Product {} not found", product_id)))?;

    Ok(Json(json!({ "data": product })))
}

/// PUT /api/products/:id
#[tracing::instrument(skip(state, request), fields(product_id = %product_id))]
pub async fn update_product(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
    Json(request): Json<UpdateProduct>,
) -> Result<Json<Value>, AppError> {
    request.validate()?;

    let product = state
        .db
        .update_product(product_id, &request)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Product {} not found", product_id)))?;

    Ok(Json(json!({ "data": product })))
}

/// DELETE /api/products/:id
#[tracing::instrument(skip(state))]
pub async fn delete_product(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let deleted = state.db.delete_product(product_id).await?;
    if !deleted {
        return Err(AppError::NotFound(anyhow::anyhow!(
            "Product {} not found",
            product_id
        )));
    }

    Ok(Json(json!({ "success": true })))
}
