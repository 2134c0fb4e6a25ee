use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use tracing::{info, instrument, warn};
use validator::Validate;

use super::balances;
use super::directory::unique_value;
use super::documents::{
    check_item_references, document_filters, keys_of, ItemColumns, ItemNames, ItemRow,
};
use super::ModelService;
use crate::db::{self, DbPool};
use crate::dto::{DocumentItemRequest, ShipmentRequest, ShipmentResponse};
use crate::entities::shipment_document::ShipmentStatus;
use crate::entities::{client, shipment_document, shipment_item};
use crate::errors::ServiceError;
use crate::repositories::{Page, Record, Repository, SearchModel};

const LABEL: &str = <shipment_document::Entity as Record>::LABEL;

/// Outgoing stock. Drafts do not affect balances; signing deducts the items
/// and is final.
#[derive(Clone)]
pub struct ShipmentService {
    db: Arc<DbPool>,
}

impl ShipmentService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    fn item_columns() -> ItemColumns<shipment_item::Column> {
        ItemColumns {
            document_id: shipment_item::Column::DocumentId,
            resource_id: shipment_item::Column::ResourceId,
            unit_id: shipment_item::Column::UnitId,
        }
    }

    async fn load_items<C: ConnectionTrait>(
        conn: &C,
        document_id: i32,
    ) -> Result<Vec<ItemRow>, ServiceError> {
        Ok(shipment_item::Entity::find()
            .filter(shipment_item::Column::DocumentId.eq(document_id))
            .all(conn)
            .await?
            .into_iter()
            .map(ItemRow::from)
            .collect())
    }

    async fn replace_items<C: ConnectionTrait>(
        conn: &C,
        document_id: i32,
        items: &[DocumentItemRequest],
    ) -> Result<(), ServiceError> {
        shipment_item::Entity::delete_many()
            .filter(shipment_item::Column::DocumentId.eq(document_id))
            .exec(conn)
            .await?;

        let repo = Repository::<shipment_item::Entity, C>::new(conn);
        for item in items {
            repo.create(shipment_item::ActiveModel {
                document_id: Set(document_id),
                resource_id: Set(item.resource_id),
                unit_id: Set(item.unit_id),
                quantity: Set(item.quantity),
                ..Default::default()
            })
            .await?;
        }
        Ok(())
    }

    /// The client must exist and be active, unless it is the client the
    /// document already had.
    async fn check_client<C: ConnectionTrait>(
        conn: &C,
        client_id: i32,
        current: Option<i32>,
    ) -> Result<(), ServiceError> {
        let client = Repository::<client::Entity, C>::new(conn)
            .get_by_id(client_id)
            .await?
            .ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "Client with ID {} does not exist",
                    client_id
                ))
            })?;

        if client.is_archived && current != Some(client_id) {
            warn!(client_id, "Shipment references archived client");
            return Err(ServiceError::ValidationError(format!(
                "Client '{}' is archived",
                client.name
            )));
        }
        Ok(())
    }

    fn ensure_draft(document: &shipment_document::Model, action: &str) -> Result<(), ServiceError> {
        if document.status == ShipmentStatus::Signed {
            warn!(shipment_id = document.id, action, "Signed shipment is immutable");
            return Err(ServiceError::InvalidOperation(format!(
                "Shipment '{}' is signed and cannot be {}",
                document.number, action
            )));
        }
        Ok(())
    }

    /// Marks a draft as signed and deducts its items from the balances.
    async fn sign_in<C: ConnectionTrait>(
        conn: &C,
        document: &shipment_document::Model,
    ) -> Result<(), ServiceError> {
        let repo = Repository::<shipment_document::Entity, C>::new(conn);
        let mut signed = repo.detach(document);
        signed.status = ShipmentStatus::Signed;
        repo.update(signed).await?;

        let keys = keys_of(&Self::load_items(conn, document.id).await?);
        balances::recalculate(conn, &keys).await?;
        counter!("warehouse_documents.shipments_signed", 1);
        Ok(())
    }

    async fn client_names(
        &self,
        ids: impl IntoIterator<Item = i32>,
    ) -> Result<HashMap<i32, String>, ServiceError> {
        let ids: Vec<i32> = ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        Ok(Repository::<client::Entity>::new(&*self.db)
            .get_many(&ids)
            .await?
            .into_iter()
            .map(|c| (c.id, c.name))
            .collect())
    }

    fn response(
        document: shipment_document::Model,
        items: Vec<ItemRow>,
        client_names: &HashMap<i32, String>,
        names: &ItemNames,
    ) -> ShipmentResponse {
        ShipmentResponse {
            id: document.id,
            number: document.number,
            date: document.date,
            client_id: document.client_id,
            client_name: client_names
                .get(&document.client_id)
                .cloned()
                .unwrap_or_default(),
            status: document.status,
            items: names.responses(items),
            created_at: document.created_at,
            updated_at: document.updated_at,
        }
    }

    /// Signs a draft shipment. Rejected when any balance would go negative.
    #[instrument(skip(self))]
    pub async fn sign(&self, id: i32) -> Result<ShipmentResponse, ServiceError> {
        let txn = db::begin(&self.db, "shipments.sign").await?;
        let document = Repository::<shipment_document::Entity, _>::new(&txn)
            .get_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found(LABEL, id))?;
        Self::ensure_draft(&document, "signed again")?;

        Self::sign_in(&txn, &document).await?;
        db::commit(txn, "shipments.sign").await?;

        info!(shipment_id = id, "Shipment signed");
        self.get_by_id(id).await
    }
}

#[async_trait]
impl ModelService for ShipmentService {
    const LABEL: &'static str = LABEL;

    type Create = ShipmentRequest;
    type Update = ShipmentRequest;
    type Response = ShipmentResponse;

    #[instrument(skip(self, input), fields(number = %input.number, sign = input.sign))]
    async fn create(&self, input: ShipmentRequest) -> Result<ShipmentResponse, ServiceError> {
        input.validate()?;

        let txn = db::begin(&self.db, "shipments.create").await?;
        let number = unique_value::<shipment_document::Entity, _>(
            &txn,
            shipment_document::Column::Number,
            "number",
            &input.number,
            None,
        )
        .await?;
        Self::check_client(&txn, input.client_id, None).await?;
        check_item_references(&txn, &input.items, &BTreeSet::new()).await?;

        let document = Repository::<shipment_document::Entity, _>::new(&txn)
            .create(shipment_document::ActiveModel {
                number: Set(number),
                client_id: Set(input.client_id),
                date: Set(input.date),
                status: Set(ShipmentStatus::Draft),
                ..Default::default()
            })
            .await?;
        Self::replace_items(&txn, document.id, &input.items).await?;
        if input.sign {
            Self::sign_in(&txn, &document).await?;
        }
        db::commit(txn, "shipments.create").await?;

        counter!("warehouse_documents.shipments_created", 1);
        info!(shipment_id = document.id, signed = input.sign, "Shipment created");
        self.get_by_id(document.id).await
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, id: i32) -> Result<ShipmentResponse, ServiceError> {
        let (document, items) = Repository::<shipment_document::Entity>::new(&*self.db)
            .get_by_id_with::<shipment_item::Entity>(id)
            .await?
            .ok_or_else(|| ServiceError::not_found(LABEL, id))?;

        let items: Vec<ItemRow> = items.into_iter().map(ItemRow::from).collect();
        let names = ItemNames::load(&*self.db, items.iter()).await?;
        let clients = self.client_names([document.client_id]).await?;
        Ok(Self::response(document, items, &clients, &names))
    }

    #[instrument(skip(self, search))]
    async fn query(&self, mut search: SearchModel) -> Result<Page<ShipmentResponse>, ServiceError> {
        let extra = document_filters::<shipment_item::Entity, _>(
            &mut search,
            shipment_document::Column::Id,
            shipment_document::Column::Date,
            Self::item_columns(),
        )?;

        let page = Repository::<shipment_document::Entity>::new(&*self.db)
            .query_by_with::<shipment_item::Entity>(&search, extra)
            .await?
            .map(|(document, items)| {
                let items: Vec<ItemRow> = items.into_iter().map(ItemRow::from).collect();
                (document, items)
            });

        let names = ItemNames::load(
            &*self.db,
            page.items.iter().flat_map(|(_, items)| items.iter()),
        )
        .await?;
        let clients = self
            .client_names(page.items.iter().map(|(document, _)| document.client_id))
            .await?;
        Ok(page.map(|(document, items)| Self::response(document, items, &clients, &names)))
    }

    #[instrument(skip(self, input), fields(number = %input.number, sign = input.sign))]
    async fn update(&self, id: i32, input: ShipmentRequest) -> Result<ShipmentResponse, ServiceError> {
        input.validate()?;

        let txn = db::begin(&self.db, "shipments.update").await?;
        let repo = Repository::<shipment_document::Entity, _>::new(&txn);
        let existing = repo
            .get_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found(LABEL, id))?;
        Self::ensure_draft(&existing, "modified")?;

        let number = unique_value::<shipment_document::Entity, _>(
            &txn,
            shipment_document::Column::Number,
            "number",
            &input.number,
            Some(id),
        )
        .await?;
        Self::check_client(&txn, input.client_id, Some(existing.client_id)).await?;
        let previous = keys_of(&Self::load_items(&txn, id).await?);
        check_item_references(&txn, &input.items, &previous).await?;

        let mut document = repo.detach(&existing);
        document.number = number;
        document.client_id = input.client_id;
        document.date = input.date;
        let document = repo.update(document).await?;
        Self::replace_items(&txn, id, &input.items).await?;
        if input.sign {
            Self::sign_in(&txn, &document).await?;
        }
        db::commit(txn, "shipments.update").await?;

        info!(shipment_id = id, signed = input.sign, "Shipment updated");
        self.get_by_id(id).await
    }

    /// Deletes a draft. Signed shipments are permanent.
    #[instrument(skip(self))]
    async fn delete(&self, id: i32, _hard: bool) -> Result<bool, ServiceError> {
        let txn = db::begin(&self.db, "shipments.delete").await?;
        let repo = Repository::<shipment_document::Entity, _>::new(&txn);
        let Some(existing) = repo.get_by_id(id).await? else {
            return Ok(false);
        };
        Self::ensure_draft(&existing, "deleted")?;

        Self::replace_items(&txn, id, &[]).await?;
        repo.hard_delete(id).await?;
        db::commit(txn, "shipments.delete").await?;

        info!(shipment_id = id, "Shipment deleted");
        Ok(true)
    }
}
