use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// A registered business, owner of numbering settings and tax defaults.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Business {
    pub id: Uuid,
    pub name: String,
    pub legal_name: Option<String>,
    pub gst_number: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: String,
    pub pincode: Option<String>,
    pub currency: String,
    pub default_tax_type: String,
    pub default_tax_rate: Decimal,
    pub default_hsn: Option<String>,
    pub invoice_prefix: String,
    pub invoice_next_number: i32,
    pub invoice_number_padding: i32,
    pub brand_logo: Option<String>,
    pub brand_color: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update of business profile and invoice numbering settings.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateBusinessSettings {
    #[validate(length(min = 1))]
    pub name: Option<String>,
    pub legal_name: Option<String>,
    pub gst_number: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub pincode: Option<String>,
    pub currency: Option<String>,
    pub default_tax_type: Option<String>,
    pub default_tax_rate: Option<Decimal>,
    pub default_hsn: Option<String>,
    pub invoice_prefix: Option<String>,
    #[validate(range(min = 1))]
    pub invoice_next_number: Option<i32>,
    #[validate(range(min = 0, max = 12))]
    pub invoice_number_padding: Option<i32>,
    pub brand_logo: Option<String>,
    pub brand_color: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_number_must_be_positive() {
        let update = UpdateBusinessSettings {
            invoice_next_number: Some(0),
            ..Default::default()
        };
        assert!(update.validate().is_err());

        let update = UpdateBusinessSettings {
            invoice_next_number: Some(1),
            ..Default::default()
        };
        assert!(update.validate().is_ok());
    }

    #[test]
    fn test_empty_body_is_valid() {
        assert!(UpdateBusinessSettings::default().validate().is_ok());
    }
}
