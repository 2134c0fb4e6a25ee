use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::entities::shipment_document::ShipmentStatus;

/// Largest number of decimal places a stored quantity keeps.
pub const QUANTITY_SCALE: u32 = 4;

fn validate_quantity(quantity: &Decimal) -> Result<(), ValidationError> {
    if quantity.is_sign_negative() || quantity.is_zero() {
        let mut err = ValidationError::new("quantity_not_positive");
        err.message = Some("Quantity must be greater than zero".into());
        return Err(err);
    }
    if quantity.normalize().scale() > QUANTITY_SCALE {
        let mut err = ValidationError::new("quantity_scale");
        err.message = Some("Quantity supports at most 4 decimal places".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Deserialize, Validate, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DocumentItemRequest {
    pub resource_id: i32,
    pub unit_id: i32,
    #[validate(custom = "validate_quantity")]
    pub quantity: Decimal,
}

/// Body for creating or fully replacing a receipt. Items replace the stored set.
#[derive(Debug, Clone, Deserialize, Validate, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ReceiptRequest {
    #[validate(length(min = 1, max = 64))]
    pub number: String,
    pub date: NaiveDate,
    #[validate]
    #[serde(default)]
    pub items: Vec<DocumentItemRequest>,
}

/// Body for creating or fully replacing a draft shipment.
///
/// `sign` signs the document once it is saved.
#[derive(Debug, Clone, Deserialize, Validate, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ShipmentRequest {
    #[validate(length(min = 1, max = 64))]
    pub number: String,
    pub date: NaiveDate,
    pub client_id: i32,
    #[validate(length(min = 1, message = "A shipment needs at least one item"))]
    #[validate]
    pub items: Vec<DocumentItemRequest>,
    #[serde(default)]
    pub sign: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentItemResponse {
    pub id: i32,
    pub resource_id: i32,
    pub resource_name: String,
    pub unit_id: i32,
    pub unit_name: String,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptResponse {
    pub id: i32,
    pub number: String,
    pub date: NaiveDate,
    pub items: Vec<DocumentItemResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentResponse {
    pub id: i32,
    pub number: String,
    pub date: NaiveDate,
    pub client_id: i32,
    pub client_name: String,
    pub status: ShipmentStatus,
    pub items: Vec<DocumentItemResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn item(quantity: Decimal) -> DocumentItemRequest {
        DocumentItemRequest {
            resource_id: 1,
            unit_id: 1,
            quantity,
        }
    }

    #[test]
    fn quantity_must_be_positive() {
        assert!(item(dec!(0.5)).validate().is_ok());
        assert!(item(dec!(0)).validate().is_err());
        assert!(item(dec!(-3)).validate().is_err());
    }

    #[test]
    fn quantity_scale_is_bounded() {
        assert!(item(dec!(1.2500)).validate().is_ok());
        assert!(item(dec!(1.00001)).validate().is_err());
    }

    #[test]
    fn shipment_requires_items() {
        let request = ShipmentRequest {
            number: "S-1".into(),
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            client_id: 1,
            items: Vec::new(),
            sign: false,
        };
        let errors = request.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("items"));
    }

    #[test]
    fn receipt_may_be_empty_but_items_are_checked() {
        let mut request = ReceiptRequest {
            number: "R-1".into(),
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            items: Vec::new(),
        };
        assert!(request.validate().is_ok());

        request.items.push(item(dec!(0)));
        assert!(request.validate().is_err());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let parsed: Result<ReceiptRequest, _> =
            serde_json::from_str(r#"{"number":"R-1","date":"2024-03-01","colour":"red"}"#);
        assert!(parsed.is_err());
    }
}
