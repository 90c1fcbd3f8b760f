use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// A catalog product or service offered by a business.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub id: Uuid,
    pub business_id: Uuid,
    pub sku: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub unit_price: Decimal,
    pub tax_rate: Decimal,
    pub tax_type: String,
    pub hsn_code: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Body of a product create request.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewProduct {
    pub business_id: Uuid,
    pub sku: Option<String>,
    #[validate(length(min = 1, message = "name is required"))]
    pub name: String,
    pub description: Option<String>,
    pub unit_price: Decimal,
    #[serde(default)]
    pub tax_rate: Decimal,
    pub tax_type: Option<String>,
    pub hsn_code: Option<String>,
    pub is_active: Option<bool>,
}

/// Partial update of a product record.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateProduct {
    pub sku: Option<String>,
    #[validate(length(min = 1))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub unit_price: Option<Decimal>,
    pub tax_rate: Option<Decimal>,
    pub tax_type: Option<String>,
    pub hsn_code: Option<String>,
    pub is_active: Option<bool>,
}

/// Filter parameters for listing products.
#[derive(Debug, Clone)]
pub struct ListProductsFilter {
    pub business_id: Option<Uuid>,
    pub search: Option<String>,
    pub active_only: bool,
    pub limit: i64,
    pub offset: i64,
}

impl Default for ListProductsFilter {
    fn default() -> Self {
        Self {
            business_id: None,
            search: None,
            active_only: false,
            limit: 20,
            offset: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_requires_name() {
        let product: NewProduct = serde_json::from_value(serde_json::json!({
            "business_id": "7b41ad2e-8f82-4a2f-a8d1-d5ae9b2a6f3c",
            "name": "",
            "unit_price": "99.00"
        }))
        .unwrap();
        assert!(product.validate().is_err());
    }

    #[test]
    fn test_product_defaults_tax_rate_to_zero() {
        let product: NewProduct = serde_json::from_value(serde_json::json!({
            "business_id": "7b41ad2e-8f82-4a2f-a8d1-d5ae9b2a6f3c",
            "name": "Masala Chai",
            "unit_price": "15.00"
        }))
        .unwrap();
        assert!(product.validate().is_ok());
        assert_eq!(product.tax_rate, Decimal::ZERO);
        assert!(product.tax_type.is_none());
    }
}
