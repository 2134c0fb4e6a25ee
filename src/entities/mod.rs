//! Database entities.
//!
//! Every table carries an integer identifier, `created_at` and an optional
//! `updated_at`. Directory records (clients, resources, units) are archivable.

pub mod balance;
pub mod client;
pub mod receipt_document;
pub mod receipt_item;
pub mod resource;
pub mod shipment_document;
pub mod shipment_item;
pub mod unit;

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, Set};

/// Stamps `created_at` on insert and `updated_at` on every update.
pub(crate) fn stamp(
    insert: bool,
    created_at: &mut ActiveValue<DateTime<Utc>>,
    updated_at: &mut ActiveValue<Option<DateTime<Utc>>>,
) {
    let now = Utc::now();
    if insert {
        if !created_at.is_set() {
            *created_at = Set(now);
        }
    } else {
        *updated_at = Set(Some(now));
    }
}
