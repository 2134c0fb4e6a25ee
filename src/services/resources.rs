use async_trait::async_trait;
use sea_orm::Set;

use super::directory::{references, DirectoryRecord, DirectoryService};
use crate::db::DbPool;
use crate::dto::{ResourceRequest, ResourceResponse};
use crate::entities::{balance, receipt_item, shipment_item, resource};
use crate::errors::ServiceError;

/// Service for the resource directory
pub type ResourceService = DirectoryService<resource::Entity>;

#[async_trait]
impl DirectoryRecord for resource::Entity {
    type Request = ResourceRequest;
    type Response = ResourceResponse;

    fn name_column() -> resource::Column {
        resource::Column::Name
    }

    fn requested_name(input: &ResourceRequest) -> &str {
        &input.name
    }

    fn new_row(name: String, _input: &ResourceRequest) -> resource::ActiveModel {
        resource::ActiveModel {
            name: Set(name),
            is_archived: Set(false),
            ..Default::default()
        }
    }

    fn apply(model: &mut resource::Model, name: String, _input: &ResourceRequest) {
        model.name = name;
    }

    /// Document items and stored balances.
    async fn usages(db: &DbPool, id: i32) -> Result<u64, ServiceError> {
        Ok(
            references::<receipt_item::Entity, _>(db, receipt_item::Column::ResourceId, id).await?
                + references::<shipment_item::Entity, _>(db, shipment_item::Column::ResourceId, id)
                    .await?
                + references::<balance::Entity, _>(db, balance::Column::ResourceId, id).await?,
        )
    }
}
