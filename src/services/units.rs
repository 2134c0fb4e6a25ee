use async_trait::async_trait;
use sea_orm::Set;

use super::directory::{references, DirectoryRecord, DirectoryService};
use crate::db::DbPool;
use crate::dto::{UnitRequest, UnitResponse};
use crate::entities::{balance, receipt_item, shipment_item, unit};
use crate::errors::ServiceError;

/// Service for units of measure
pub type UnitService = DirectoryService<unit::Entity>;

#[async_trait]
impl DirectoryRecord for unit::Entity {
    type Request = UnitRequest;
    type Response = UnitResponse;

    fn name_column() -> unit::Column {
        unit::Column::Name
    }

    fn requested_name(input: &UnitRequest) -> &str {
        &input.name
    }

    fn new_row(name: String, _input: &UnitRequest) -> unit::ActiveModel {
        unit::ActiveModel {
            name: Set(name),
            is_archived: Set(false),
            ..Default::default()
        }
    }

    fn apply(model: &mut unit::Model, name: String, _input: &UnitRequest) {
        model.name = name;
    }

    /// Document items and stored balances.
    async fn usages(db: &DbPool, id: i32) -> Result<u64, ServiceError> {
        Ok(
            references::<receipt_item::Entity, _>(db, receipt_item::Column::UnitId, id).await?
                + references::<shipment_item::Entity, _>(db, shipment_item::Column::UnitId, id)
                    .await?
                + references::<balance::Entity, _>(db, balance::Column::UnitId, id).await?,
        )
    }
}
