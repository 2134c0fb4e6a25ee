//! Materialized stock balances.
//!
//! A balance is the sum of received quantities minus the sum of quantities on
//! signed shipments for one (resource, unit) pair. Rows are rewritten inside
//! the transaction that changes a document, and a pair whose quantity falls to
//! zero has no row.
//!
//! Each pair's row is locked before its documents are summed, so writers of
//! the same pair commit one after another and every recomputation sees the
//! documents committed before it.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, ModelTrait, QueryFilter, QuerySelect, RelationTrait,
    Select, Set,
};
use tracing::{info, instrument, warn};

use super::directory::{resources_by_id, units_by_id};
use crate::db::{self, DbPool};
use crate::dto::BalanceResponse;
use crate::entities::shipment_document::ShipmentStatus;
use crate::entities::{balance, receipt_item, resource, shipment_document, shipment_item, unit};
use crate::errors::ServiceError;
use crate::repositories::{Page, Record, Repository, SearchModel};

/// `(resource_id, unit_id)`
pub type BalanceKey = (i32, i32);

/// Recomputes the stored balance of every pair in `keys`.
///
/// Pairs are locked in key order. Fails with `InvalidOperation` when a pair
/// would become negative; the caller must then drop its transaction.
pub async fn recalculate<C: ConnectionTrait>(
    conn: &C,
    keys: &BTreeSet<BalanceKey>,
) -> Result<(), ServiceError> {
    for &(resource_id, unit_id) in keys {
        let row = lock(conn, resource_id, unit_id).await?;
        let quantity = available(conn, resource_id, unit_id).await?;
        if quantity < Decimal::ZERO {
            return Err(insufficient(conn, resource_id, unit_id, quantity).await);
        }
        store(conn, row, quantity).await?;
    }
    Ok(())
}

fn pair_row(resource_id: i32, unit_id: i32) -> Select<balance::Entity> {
    balance::Entity::find()
        .filter(balance::Column::ResourceId.eq(resource_id))
        .filter(balance::Column::UnitId.eq(unit_id))
}

/// Makes sure the pair has a row and holds it until the transaction ends.
/// SQLite has no row locks; its single writer gives the same ordering.
async fn lock<C: ConnectionTrait>(
    conn: &C,
    resource_id: i32,
    unit_id: i32,
) -> Result<balance::Model, ServiceError> {
    balance::Entity::insert(balance::ActiveModel {
        resource_id: Set(resource_id),
        unit_id: Set(unit_id),
        quantity: Set(Decimal::ZERO),
        created_at: Set(Utc::now()),
        ..Default::default()
    })
    .on_conflict(
        OnConflict::columns([balance::Column::ResourceId, balance::Column::UnitId])
            .do_nothing()
            .to_owned(),
    )
    .do_nothing()
    .exec(conn)
    .await
    .map_err(|e| ServiceError::from_db(balance::Entity::LABEL, e))?;

    pair_row(resource_id, unit_id)
        .lock_exclusive()
        .one(conn)
        .await?
        .ok_or_else(|| {
            ServiceError::InternalError(format!(
                "balance row for resource {} unit {} disappeared",
                resource_id, unit_id
            ))
        })
}

/// Received minus shipped for one pair, computed from the documents.
pub async fn available<C: ConnectionTrait>(
    conn: &C,
    resource_id: i32,
    unit_id: i32,
) -> Result<Decimal, ServiceError> {
    let received: Decimal = receipt_item::Entity::find()
        .filter(receipt_item::Column::ResourceId.eq(resource_id))
        .filter(receipt_item::Column::UnitId.eq(unit_id))
        .all(conn)
        .await?
        .iter()
        .map(|item| item.quantity)
        .sum();

    let shipped: Decimal = shipment_item::Entity::find()
        .join(
            sea_orm::JoinType::InnerJoin,
            shipment_item::Relation::Document.def(),
        )
        .filter(shipment_item::Column::ResourceId.eq(resource_id))
        .filter(shipment_item::Column::UnitId.eq(unit_id))
        .filter(shipment_document::Column::Status.eq(ShipmentStatus::Signed))
        .all(conn)
        .await?
        .iter()
        .map(|item| item.quantity)
        .sum();

    Ok(received - shipped)
}

async fn store<C: ConnectionTrait>(
    conn: &C,
    row: balance::Model,
    quantity: Decimal,
) -> Result<(), ServiceError> {
    if quantity.is_zero() {
        row.delete(conn).await?;
    } else if row.quantity != quantity {
        let repo = Repository::<balance::Entity, C>::new(conn);
        let mut model = repo.detach(&row);
        model.quantity = quantity;
        repo.update(model).await?;
    }
    Ok(())
}

async fn insufficient<C: ConnectionTrait>(
    conn: &C,
    resource_id: i32,
    unit_id: i32,
    quantity: Decimal,
) -> ServiceError {
    let resource_name = Repository::<resource::Entity, C>::new(conn)
        .get_by_id(resource_id)
        .await
        .ok()
        .flatten()
        .map(|r| r.name)
        .unwrap_or_else(|| resource_id.to_string());
    let unit_name = Repository::<unit::Entity, C>::new(conn)
        .get_by_id(unit_id)
        .await
        .ok()
        .flatten()
        .map(|u| u.name)
        .unwrap_or_else(|| unit_id.to_string());

    warn!(resource_id, unit_id, %quantity, "Balance would become negative");
    ServiceError::InvalidOperation(format!(
        "Insufficient balance of '{}' in '{}': the change would leave {}",
        resource_name, unit_name, quantity
    ))
}

/// Every pair that appears on a receipt or a signed shipment.
async fn document_keys<C: ConnectionTrait>(conn: &C) -> Result<BTreeSet<BalanceKey>, ServiceError> {
    let mut keys: BTreeSet<BalanceKey> = receipt_item::Entity::find()
        .select_only()
        .column(receipt_item::Column::ResourceId)
        .column(receipt_item::Column::UnitId)
        .distinct()
        .into_tuple::<BalanceKey>()
        .all(conn)
        .await?
        .into_iter()
        .collect();

    keys.extend(
        shipment_item::Entity::find()
            .select_only()
            .column(shipment_item::Column::ResourceId)
            .column(shipment_item::Column::UnitId)
            .distinct()
            .into_tuple::<BalanceKey>()
            .all(conn)
            .await?,
    );
    Ok(keys)
}

/// Read side of the balance table plus maintenance operations.
#[derive(Clone)]
pub struct BalanceService {
    db: Arc<DbPool>,
}

impl BalanceService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, search))]
    pub async fn query(&self, search: SearchModel) -> Result<Page<BalanceResponse>, ServiceError> {
        let page = Repository::<balance::Entity>::new(&*self.db)
            .query_by(&search)
            .await?;

        let resources =
            resources_by_id(&*self.db, page.items.iter().map(|b| b.resource_id)).await?;
        let units = units_by_id(&*self.db, page.items.iter().map(|b| b.unit_id)).await?;

        Ok(page.map(|row| BalanceResponse {
            resource_id: row.resource_id,
            resource_name: resources
                .get(&row.resource_id)
                .map(|r| r.name.clone())
                .unwrap_or_default(),
            unit_id: row.unit_id,
            unit_name: units
                .get(&row.unit_id)
                .map(|u| u.name.clone())
                .unwrap_or_default(),
            quantity: row.quantity,
        }))
    }

    /// Balance of one pair; zero when nothing is stored for it.
    #[instrument(skip(self))]
    pub async fn get(&self, resource_id: i32, unit_id: i32) -> Result<BalanceResponse, ServiceError> {
        let db = &*self.db;
        let resource = Repository::<resource::Entity>::new(db)
            .get_by_id(resource_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(resource::Entity::LABEL, resource_id))?;
        let unit = Repository::<unit::Entity>::new(db)
            .get_by_id(unit_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(unit::Entity::LABEL, unit_id))?;

        let quantity = pair_row(resource_id, unit_id)
            .one(db)
            .await?
            .map(|row| row.quantity)
            .unwrap_or(Decimal::ZERO);

        Ok(BalanceResponse {
            resource_id,
            resource_name: resource.name,
            unit_id,
            unit_name: unit.name,
            quantity,
        })
    }

    /// Drops every stored balance and recomputes them from the documents.
    /// Returns the number of non-zero balances.
    #[instrument(skip(self))]
    pub async fn rebuild(&self) -> Result<u64, ServiceError> {
        let txn = db::begin(&self.db, "balances.rebuild").await?;
        balance::Entity::delete_many().exec(&txn).await?;

        let keys = document_keys(&txn).await?;
        recalculate(&txn, &keys).await?;

        let stored = Repository::<balance::Entity, _>::new(&txn)
            .get_count(None)
            .await?;
        db::commit(txn, "balances.rebuild").await?;

        info!(pairs = keys.len(), stored, "Balances rebuilt");
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbConfig;
    use crate::entities::{receipt_document, resource, unit};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use sea_orm::{DbBackend, QueryTrait};

    async fn migrated_pool() -> DbPool {
        let pool = db::establish_connection_with_config(&DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            ..Default::default()
        })
        .await
        .unwrap();
        db::run_migrations(&pool).await.unwrap();
        pool
    }

    async fn pair(pool: &DbPool) -> BalanceKey {
        let steel = Repository::<resource::Entity>::new(pool)
            .create(resource::ActiveModel {
                name: Set("Steel".into()),
                is_archived: Set(false),
                ..Default::default()
            })
            .await
            .unwrap();
        let kg = Repository::<unit::Entity>::new(pool)
            .create(unit::ActiveModel {
                name: Set("kg".into()),
                is_archived: Set(false),
                ..Default::default()
            })
            .await
            .unwrap();
        (steel.id, kg.id)
    }

    #[test]
    fn pair_row_is_locked_for_update_on_postgres() {
        let sql = pair_row(1, 2)
            .lock_exclusive()
            .build(DbBackend::Postgres)
            .to_string();
        assert!(sql.ends_with("FOR UPDATE"), "{}", sql);
    }

    #[tokio::test]
    async fn empty_pair_leaves_no_row() {
        let pool = migrated_pool().await;
        let key = pair(&pool).await;

        recalculate(&pool, &BTreeSet::from([key])).await.unwrap();

        assert!(pair_row(key.0, key.1).one(&pool).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stored_quantity_follows_documents() {
        let pool = migrated_pool().await;
        let (resource_id, unit_id) = pair(&pool).await;
        let document = Repository::<receipt_document::Entity>::new(&pool)
            .create(receipt_document::ActiveModel {
                number: Set("R-1".into()),
                date: Set(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()),
                ..Default::default()
            })
            .await
            .unwrap();
        for quantity in [dec!(2.5), dec!(4)] {
            Repository::<receipt_item::Entity>::new(&pool)
                .create(receipt_item::ActiveModel {
                    document_id: Set(document.id),
                    resource_id: Set(resource_id),
                    unit_id: Set(unit_id),
                    quantity: Set(quantity),
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        let keys = BTreeSet::from([(resource_id, unit_id)]);
        recalculate(&pool, &keys).await.unwrap();
        recalculate(&pool, &keys).await.unwrap();

        let rows = balance::Entity::find().all(&pool).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].quantity, dec!(6.5));
    }
}
