use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use tracing::{info, instrument};
use validator::Validate;

use super::balances;
use super::directory::unique_value;
use super::documents::{
    check_item_references, document_filters, keys_of, requested_keys, ItemColumns, ItemNames,
    ItemRow,
};
use super::ModelService;
use crate::db::{self, DbPool};
use crate::dto::{DocumentItemRequest, ReceiptRequest, ReceiptResponse};
use crate::entities::{receipt_document, receipt_item};
use crate::errors::ServiceError;
use crate::repositories::{Page, Record, Repository, SearchModel};

const LABEL: &str = <receipt_document::Entity as Record>::LABEL;

/// Incoming stock. Every write recomputes the balances it touches in the same
/// transaction.
#[derive(Clone)]
pub struct ReceiptService {
    db: Arc<DbPool>,
}

impl ReceiptService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    fn item_columns() -> ItemColumns<receipt_item::Column> {
        ItemColumns {
            document_id: receipt_item::Column::DocumentId,
            resource_id: receipt_item::Column::ResourceId,
            unit_id: receipt_item::Column::UnitId,
        }
    }

    async fn load_items<C: ConnectionTrait>(
        conn: &C,
        document_id: i32,
    ) -> Result<Vec<ItemRow>, ServiceError> {
        Ok(receipt_item::Entity::find()
            .filter(receipt_item::Column::DocumentId.eq(document_id))
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
        receipt_item::Entity::delete_many()
            .filter(receipt_item::Column::DocumentId.eq(document_id))
            .exec(conn)
            .await?;

        let repo = Repository::<receipt_item::Entity, C>::new(conn);
        for item in items {
            repo.create(receipt_item::ActiveModel {
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

    fn response(
        document: receipt_document::Model,
        items: Vec<ItemRow>,
        names: &ItemNames,
    ) -> ReceiptResponse {
        ReceiptResponse {
            id: document.id,
            number: document.number,
            date: document.date,
            items: names.responses(items),
            created_at: document.created_at,
            updated_at: document.updated_at,
        }
    }
}

#[async_trait]
impl ModelService for ReceiptService {
    const LABEL: &'static str = LABEL;

    type Create = ReceiptRequest;
    type Update = ReceiptRequest;
    type Response = ReceiptResponse;

    #[instrument(skip(self, input), fields(number = %input.number, items = input.items.len()))]
    async fn create(&self, input: ReceiptRequest) -> Result<ReceiptResponse, ServiceError> {
        input.validate()?;

        let txn = db::begin(&self.db, "receipts.create").await?;
        let number = unique_value::<receipt_document::Entity, _>(
            &txn,
            receipt_document::Column::Number,
            "number",
            &input.number,
            None,
        )
        .await?;
        check_item_references(&txn, &input.items, &BTreeSet::new()).await?;

        let document = Repository::<receipt_document::Entity, _>::new(&txn)
            .create(receipt_document::ActiveModel {
                number: Set(number),
                date: Set(input.date),
                ..Default::default()
            })
            .await?;
        Self::replace_items(&txn, document.id, &input.items).await?;
        balances::recalculate(&txn, &requested_keys(&input.items)).await?;
        db::commit(txn, "receipts.create").await?;

        counter!("warehouse_documents.receipts_created", 1);
        info!(receipt_id = document.id, "Receipt created");
        self.get_by_id(document.id).await
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, id: i32) -> Result<ReceiptResponse, ServiceError> {
        let (document, items) = Repository::<receipt_document::Entity>::new(&*self.db)
            .get_by_id_with::<receipt_item::Entity>(id)
            .await?
            .ok_or_else(|| ServiceError::not_found(LABEL, id))?;

        let items: Vec<ItemRow> = items.into_iter().map(ItemRow::from).collect();
        let names = ItemNames::load(&*self.db, items.iter()).await?;
        Ok(Self::response(document, items, &names))
    }

    #[instrument(skip(self, search))]
    async fn query(&self, mut search: SearchModel) -> Result<Page<ReceiptResponse>, ServiceError> {
        let extra = document_filters::<receipt_item::Entity, _>(
            &mut search,
            receipt_document::Column::Id,
            receipt_document::Column::Date,
            Self::item_columns(),
        )?;

        let page = Repository::<receipt_document::Entity>::new(&*self.db)
            .query_by_with::<receipt_item::Entity>(&search, extra)
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
        Ok(page.map(|(document, items)| Self::response(document, items, &names)))
    }

    #[instrument(skip(self, input), fields(number = %input.number, items = input.items.len()))]
    async fn update(&self, id: i32, input: ReceiptRequest) -> Result<ReceiptResponse, ServiceError> {
        input.validate()?;

        let txn = db::begin(&self.db, "receipts.update").await?;
        let repo = Repository::<receipt_document::Entity, _>::new(&txn);
        let existing = repo
            .get_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found(LABEL, id))?;
        let number = unique_value::<receipt_document::Entity, _>(
            &txn,
            receipt_document::Column::Number,
            "number",
            &input.number,
            Some(id),
        )
        .await?;

        let previous = keys_of(&Self::load_items(&txn, id).await?);
        check_item_references(&txn, &input.items, &previous).await?;

        let mut document = repo.detach(&existing);
        document.number = number;
        document.date = input.date;
        repo.update(document).await?;
        Self::replace_items(&txn, id, &input.items).await?;

        let affected: BTreeSet<_> = previous
            .union(&requested_keys(&input.items))
            .copied()
            .collect();
        balances::recalculate(&txn, &affected).await?;
        db::commit(txn, "receipts.update").await?;

        info!(receipt_id = id, "Receipt updated");
        self.get_by_id(id).await
    }

    /// Receipts are always removed outright; `hard` makes no difference.
    #[instrument(skip(self))]
    async fn delete(&self, id: i32, _hard: bool) -> Result<bool, ServiceError> {
        let txn = db::begin(&self.db, "receipts.delete").await?;
        let repo = Repository::<receipt_document::Entity, _>::new(&txn);
        if repo.get_by_id(id).await?.is_none() {
            return Ok(false);
        }

        let affected = keys_of(&Self::load_items(&txn, id).await?);
        Self::replace_items(&txn, id, &[]).await?;
        repo.hard_delete(id).await?;
        balances::recalculate(&txn, &affected).await?;
        db::commit(txn, "receipts.delete").await?;

        counter!("warehouse_documents.receipts_deleted", 1);
        info!(receipt_id = id, "Receipt deleted");
        Ok(true)
    }
}
