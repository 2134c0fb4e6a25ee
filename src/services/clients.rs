use async_trait::async_trait;
use sea_orm::Set;

use super::directory::{references, DirectoryRecord, DirectoryService};
use crate::db::DbPool;
use crate::dto::{ClientRequest, ClientResponse};
use crate::entities::{client, shipment_document};
use crate::errors::ServiceError;

/// Client directory. Shipments are addressed to clients.
pub type ClientService = DirectoryService<client::Entity>;

#[async_trait]
impl DirectoryRecord for client::Entity {
    type Request = ClientRequest;
    type Response = ClientResponse;

    fn name_column() -> client::Column {
        client::Column::Name
    }

    fn requested_name(input: &ClientRequest) -> &str {
        &input.name
    }

    fn new_row(name: String, input: &ClientRequest) -> client::ActiveModel {
        client::ActiveModel {
            name: Set(name),
            address: Set(input.address.trim().to_string()),
            is_archived: Set(false),
            ..Default::default()
        }
    }

    fn apply(model: &mut client::Model, name: String, input: &ClientRequest) {
        model.name = name;
        model.address = input.address.trim().to_string();
    }

    async fn usages(db: &DbPool, id: i32) -> Result<u64, ServiceError> {
        references::<shipment_document::Entity, _>(db, shipment_document::Column::ClientId, id)
            .await
    }
}
