//! Invoice lifecycle endpoints.

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

use crate::models::{InvoicePatch, ListInvoicesFilter, NewInvoice};
use crate::startup::AppState;

/// Query parameters for GET /api/invoices.
#[derive(Debug, Deserialize)]
pub struct ListInvoicesQuery {
    #[serde(rename = "businessId")]
    pub business_id: Option<Uuid>,
    #[serde(rename = "shopId")]
    pub shop_id: Option<Uuid>,
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET /api/invoices
#[tracing::instrument(skip(state, query))]
pub async fn list_invoices(
    State(state): State<AppState>,
    Query(query): Query<ListInvoicesQuery>,
) -> Result<Json<Value>, AppError> {
    let filter = ListInvoicesFilter {
        business_id: query.business_id,
        shop_id: query.shop_id,
        search: query.search,
        limit: query.limit.unwrap_or(20),
        offset: query.offset.unwrap_or(0),
    };

    let (invoices, total) = state.db.list_invoices(&filter).await?;

    Ok(Json(json!({ "data": invoices, "total": total })))
}

/// POST /api/invoices
#[tracing::instrument(skip(state, request), fields(business_id = %request.business_id))]
pub async fn create_invoice(
    State(state): State<AppState>,
    Json(request): Json<NewInvoice>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    request.validate()?;
    for item in &request.items {
        item.validate()?;
    }

    let invoice = state.db.create_invoice(&request).await?;

    Ok((StatusCode::CREATED, Json(json!({ "data": invoice }))))
}

/// GET /api/invoices/:id
#[tracing::instrument(skip(state))]
pub async fn get_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let (invoice, items) = state
        .db
        .get_invoice_with_items(invoice_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice {} not found", invoice_id)))?;

    Ok(Json(json!({ "data": { "invoice": invoice, "items": items } })))
}

/// PUT /api/invoices/:id
#[tracing::instrument(skip(state, request), fields(invoice_id = %invoice_id))]
pub async fn replace_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
    Json(request): Json<NewInvoice>,
) -> Result<Json<Value>, AppError> {
    request.validate()?;
    for item in &request.items {
        item.validate()?;
    }

    let invoice = state.db.replace_invoice(invoice_id, &request).await?;

    Ok(Json(json!({ "data": invoice })))
}

/// PATCH /api/invoices/:id
#[tracing::instrument(skip(state, request), fields(invoice_id = %invoice_id))]
pub async fn patch_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
    Json(request): Json<InvoicePatch>,
) -> Result<Json<Value>, AppError> {
    if let Some(amount) = request.amount_paid {
        if amount.is_sign_negative() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "amount_paid cannot be negative"
            )));
        }
    }

    let invoice = state
        .db
        .patch_invoice(
            invoice_id,
            &request,
            state.config.strict_status_transitions,
        )
        .await?;

    Ok(Json(json!({ "data": invoice })))
}

/// DELETE /api/invoices/:id
#[tracing::instrument(skip(state))]
pub async fn delete_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    state.db.delete_invoice(invoice_id).await?;

    Ok(Json(json!({ "success": true })))
}
