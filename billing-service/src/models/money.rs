//! Monetary line and invoice total calculations.
//!
//! All arithmetic runs on `Decimal`; amounts are rounded to two decimal
//! places only when they are about to be persisted.

use crate::models::line_item::NewInvoiceItem;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;

/// Tax classification for a line item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaxType {
    None,
    Gst,
    Vat,
}

impl TaxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaxType::None => "NONE",
            TaxType::Gst => "GST",
            TaxType::Vat => "VAT",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "NONE" => TaxType::None,
            "VAT" => TaxType::Vat,
            _ => TaxType::Gst,
        }
    }
}

impl Default for TaxType {
    fn default() -> Self {
        TaxType::Gst
    }
}

/// Amounts computed for a single invoice line, unrounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineAmounts {
    pub line_base: Decimal,
    pub taxable_amount: Decimal,
    pub line_tax: Decimal,
    pub line_total: Decimal,
}

/// Invoice-level totals, rounded to two decimal places.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvoiceTotals {
    pub sub_total: Decimal,
    pub discount_total: Decimal,
    pub tax_total: Decimal,
    pub grand_total: Decimal,
}

/// Round a monetary amount to two decimal places, midpoint away from zero.
/// Matches how Postgres rounds values stored into `numeric(12,2)`.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Compute the amounts for one line.
///
/// The discount applies before tax and can never push the taxable base
/// below zero. A `NONE` tax type short-circuits the tax to zero regardless
/// of the rate carried on the line.
pub fn compute_line(
    quantity: Decimal,
    unit_price: Decimal,
    discount: Decimal,
    tax_rate: Decimal,
    tax_type: TaxType,
) -> Result<LineAmounts, AppError> {
    if quantity <= Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Item quantity must be positive"
        )));
    }
    if unit_price < Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Item unit_price must not be negative"
        )));
    }
    if discount < Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Item discount must not be negative"
        )));
    }
    if tax_rate < Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Item tax_rate must not be negative"
        )));
    }

    let line_base = quantity * unit_price;
    let taxable_amount = (line_base - discount).max(Decimal::ZERO);
    let line_tax = match tax_type {
        TaxType::None => Decimal::ZERO,
        TaxType::Gst | TaxType::Vat => taxable_amount * tax_rate / Decimal::ONE_HUNDRED,
    };
    let line_total = taxable_amount + line_tax;

    Ok(LineAmounts {
        line_base,
        taxable_amount,
        line_tax,
        line_total,
    })
}

/// Aggregate line results into invoice totals.
///
/// Components are summed unrounded and rounded once at the end; the grand
/// total is derived from the rounded components so that
/// `grand_total = sub_total - discount_total + tax_total` holds exactly on
/// the stored values.
pub fn compute_totals(items: &[NewInvoiceItem]) -> Result<InvoiceTotals, AppError> {
    if items.is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "items must be a non-empty array"
        )));
    }

    let mut sub_total = Decimal::ZERO;
    let mut discount_total = Decimal::ZERO;
    let mut tax_total = Decimal::ZERO;

    for item in items {
        if item.description.trim().is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Item description is required"
            )));
        }
        let amounts = compute_line(
            item.quantity,
            item.unit_price,
            item.discount,
            item.tax_rate,
            item.tax_type,
        )?;
        sub_total += amounts.line_base;
        discount_total += item.discount;
        tax_total += amounts.line_tax;
    }

    let sub_total = round_money(sub_total);
    let discount_total = round_money(discount_total);
    let tax_total = round_money(tax_total);
    let grand_total = sub_total - discount_total + tax_total;

    Ok(InvoiceTotals {
        sub_total,
        discount_total,
        tax_total,
        grand_total,
    })
}
