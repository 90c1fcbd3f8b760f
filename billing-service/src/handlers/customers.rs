//! Customer directory endpoints.

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

use crate::models::{ListCustomersFilter, NewCustomer, UpdateCustomer};
use crate::startup::AppState;

/// Query parameters for GET /api/customers.
#[derive(Debug, Deserialize)]
pub struct ListCustomersQuery {
    #[serde(rename = "businessId")]
    pub business_id: Option<Uuid>,
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET /api/customers
#[tracing::instrument(skip(state, query))]
pub async fn list_customers(
    State(state): State<AppState>,
    Query(query): Query<ListCustomersQuery>,
) -> Result<Json<Value>, AppError> {
    let filter = ListCustomersFilter {
        business_id: query.business_id,
        search: query.search,
        limit: query.limit.unwrap_or(20),
        offset: query.offset.unwrap_or(0),
    };

    let (customers, total) = state.db.list_customers(&filter).await?;

    Ok(Json(json!({ "data": customers, "total": total })))
}

/// POST /api/customers
#[tracing::instrument(skip(state, request), fields(business_id = %request.business_id))]
pub async fn create_customer(
    State(state): State<AppState>,
    Json(request): Json<NewCustomer>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    request.validate()?;

    let customer = state.db.create_customer(&request).await?;

    Ok((StatusCode::CREATED, Json(json!({ "data": customer }))))
}

/// GET /api/customers/:id
#[tracing::instrument(skip(state))]
pub async fn get_customer(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let customer = state
        .db
        .get_customer(customer_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Customer {} not found", customer_id)))?;

    Ok(Json(json!({ "data": customer })))
}

/// PUT /api/customers/:id
#[tracing::instrument(skip(state, request), fields(customer_id = %customer_id))]
pub async fn update_customer(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
    Json(request): Json<UpdateCustomer>,
) -> Result<Json<Value>, AppError> {
    request.validate()?;

    let customer = state
        .db
        .update_customer(customer_id, &request)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Customer {} not found", customer_id)))?;

    Ok(Json(json!({ "data": customer })))
}

/// DELETE /api/customers/:id
#[tracing::instrument(skip(state))]
pub async fn delete_customer(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let deleted = state.db.delete_customer(customer_id).await?;
    if !deleted {
        return Err(AppError::NotFound(anyhow::anyhow!(
            "Customer {} not found",
            customer_id
        )));
    }

    Ok(Json(json!({ "success": true })))
}
