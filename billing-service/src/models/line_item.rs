//! Invoice line item model.

use crate::models::money::TaxType;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Persisted invoice line. Description, price, and tax are snapshotted from
/// the request at creation time and do not follow later product edits.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoiceItem {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub product_id: Option<Uuid>,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub discount: Decimal,
    pub tax_rate: Decimal,
    pub tax_type: String,
    pub line_total: Decimal,
    pub created_at: DateTime<Utc>,
}

/// One line of an incoming create or replace request.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewInvoiceItem {
    pub product_id: Option<Uuid>,
    #[validate(length(min = 1, message = "description is required"))]
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    #[serde(default)]
    pub discount: Decimal,
    #[serde(default)]
    pub tax_rate: Decimal,
    #[serde(default)]
    pub tax_type: TaxType,
}
