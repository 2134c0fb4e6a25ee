use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Available quantity for one resource measured in one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub resource_id: i32,
    pub resource_name: String,
    pub unit_id: i32,
    pub unit_name: String,
    pub quantity: Decimal,
}
