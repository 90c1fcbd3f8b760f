//! Invoice model and lifecycle rules.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use crate::models::line_item::NewInvoiceItem;

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Draft,
    Issued,
    PartiallyPaid,
    Paid,
    Overdue,
    Void,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "DRAFT",
            InvoiceStatus::Issued => "ISSUED",
            InvoiceStatus::PartiallyPaid => "PARTIALLY_PAID",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Overdue => "OVERDUE",
            InvoiceStatus::Void => "VOID",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "ISSUED" => InvoiceStatus::Issued,
            "PARTIALLY_PAID" => InvoiceStatus::PartiallyPaid,
            "PAID" => InvoiceStatus::Paid,
            "OVERDUE" => InvoiceStatus::Overdue,
            "VOID" => InvoiceStatus::Void,
            _ => InvoiceStatus::Draft,
        }
    }
}

/// Whether `from -> to` is allowed when strict transition checking is on.
/// VOID is terminal; PAID can only be voided or reopened as partially paid.
/// Everything else may move freely, matching the historically permissive
/// behavior as closely as possible.
pub fn can_transition(from: InvoiceStatus, to: InvoiceStatus) -> bool {
    if from == to {
        return true;
    }
    match from {
        InvoiceStatus::Void => false,
        InvoiceStatus::Paid => {
            matches!(to, InvoiceStatus::Void | InvoiceStatus::PartiallyPaid)
        }
        _ => true,
    }
}

/// Format an invoice number from the business counter settings.
pub fn format_invoice_number(prefix: &str, next_number: i32, padding: i32) -> String {
    let width = padding.max(0) as usize;
    format!("{}{:0>width$}", prefix, next_number, width = width)
}

/// Persisted invoice header.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub id: Uuid,
    pub shop_id: Uuid,
    pub business_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub number: String,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub status: String,
    pub notes: Option<String>,
    pub sub_total: Decimal,
    pub discount_total: Decimal,
    pub tax_total: Decimal,
    pub grand_total: Decimal,
    pub amount_paid: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Invoice header joined with the customer display name, used by reads.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoiceWithCustomer {
    pub id: Uuid,
    pub shop_id: Uuid,
    pub business_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub number: String,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub status: String,
    pub notes: Option<String>,
    pub sub_total: Decimal,
    pub discount_total: Decimal,
    pub tax_total: Decimal,
    pub grand_total: Decimal,
    pub amount_paid: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub customer_name: Option<String>,
}

/// Compact row returned by invoice listings.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoiceSummary {
    pub id: Uuid,
    pub number: String,
    pub status: String,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub sub_total: Decimal,
    pub discount_total: Decimal,
    pub tax_total: Decimal,
    pub grand_total: Decimal,
    pub amount_paid: Decimal,
    pub business_id: Uuid,
    pub shop_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub customer_name: Option<String>,
}

/// Body of a create or replace request.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewInvoice {
    pub business_id: Uuid,
    pub shop_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub status: Option<InvoiceStatus>,
    #[validate(length(min = 1, max = 64))]
    pub idempotency_key: Option<String>,
    pub items: Vec<NewInvoiceItem>,
}

/// Body of a status/payment patch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvoicePatch {
    pub status: Option<InvoiceStatus>,
    pub amount_paid: Option<Decimal>,
}

/// Result of resolving a patch against the current row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// Nothing would change; skip the write and return the row as-is.
    Unchanged,
    Apply {
        status: InvoiceStatus,
        amount_paid: Decimal,
    },
}

/// Resolve a patch against the current status and payment state.
///
/// Setting `PAID` without an explicit amount settles the invoice in full.
/// An explicit amount is stored exactly as given, including overpayment.
pub fn resolve_patch(
    current_status: InvoiceStatus,
    current_amount_paid: Decimal,
    grand_total: Decimal,
    patch: &InvoicePatch,
) -> PatchOutcome {
    let status = patch.status.unwrap_or(current_status);

    let amount_paid = if status == InvoiceStatus::Paid && patch.amount_paid.is_none() {
        grand_total
    } else {
        patch.amount_paid.unwrap_or(current_amount_paid)
    };

    if status == current_status && amount_paid == current_amount_paid {
        PatchOutcome::Unchanged
    } else {
        PatchOutcome::Apply {
            status,
            amount_paid,
        }
    }
}

/// Filter parameters for listing invoices.
#[derive(Debug, Clone)]
pub struct ListInvoicesFilter {
    pub business_id: Option<Uuid>,
    pub shop_id: Option<Uuid>,
    pub search: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for ListInvoicesFilter {
    fn default() -> Self {
        Self {
            business_id: None,
            shop_id: None,
            search: None,
            limit: 20,
            offset: 0,
        }
    }
}
