//! Generic data access over sea-orm entities.
//!
//! [`Repository`] borrows any [`ConnectionTrait`], so the same code runs on the
//! pool or inside a [`sea_orm::DatabaseTransaction`] opened by a service.

use std::marker::PhantomData;
use std::time::Instant;

use chrono::Utc;
use metrics::{counter, histogram};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait,
    DatabaseConnection, DbErr, EntityTrait, IdenStatic, IntoActiveModel, LoaderTrait,
    PaginatorTrait, PrimaryKeyTrait, QueryFilter, QueryOrder, QuerySelect, Related,
};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::entities::{
    balance, client, receipt_document, receipt_item, resource, shipment_document, shipment_item,
    unit,
};
use crate::errors::ServiceError;

pub mod search;

pub use search::{
    SearchLimits, SearchModel, SearchRequest, SortDirection, SortSpec, DEFAULT_PAGE_SIZE,
    MAX_PAGE_SIZE,
};

/// Per-entity metadata the generic repository needs.
pub trait Record: EntityTrait {
    /// Human readable name used in error messages.
    const LABEL: &'static str;

    fn id_column() -> Self::Column;

    fn updated_at_column() -> Self::Column;

    /// Archivable records are soft deleted through this flag.
    fn archived_column() -> Option<Self::Column> {
        None
    }

    /// Columns matched by the free-text `search` term.
    fn search_columns() -> Vec<Self::Column> {
        Vec::new()
    }

    fn id_of(model: &Self::Model) -> i32;
}

macro_rules! record {
    ($module:ident, $label:literal, archived: $archived:expr, search: [$($col:ident),*]) => {
        impl Record for $module::Entity {
            const LABEL: &'static str = $label;

            fn id_column() -> Self::Column {
                $module::Column::Id
            }

            fn updated_at_column() -> Self::Column {
                $module::Column::UpdatedAt
            }

            fn archived_column() -> Option<Self::Column> {
                $archived
            }

            fn search_columns() -> Vec<Self::Column> {
                vec![$($module::Column::$col),*]
            }

            fn id_of(model: &Self::Model) -> i32 {
                model.id
            }
        }
    };
}

record!(client, "Client", archived: Some(client::Column::IsArchived), search: [Name, Address]);
record!(resource, "Resource", archived: Some(resource::Column::IsArchived), search: [Name]);
record!(unit, "Unit", archived: Some(unit::Column::IsArchived), search: [Name]);
record!(receipt_document, "Receipt document", archived: None, search: [Number]);
record!(receipt_item, "Receipt item", archived: None, search: []);
record!(shipment_document, "Shipment document", archived: None, search: [Number]);
record!(shipment_item, "Shipment item", archived: None, search: []);
record!(balance, "Balance", archived: None, search: []);

/// One page of a query plus the total number of matching rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u64 {
        if self.page_size == 0 {
            0
        } else {
            self.total.div_ceil(self.page_size)
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            page_size: self.page_size,
        }
    }
}

/// Generic repository for one entity type.
///
/// Updates are last-write-wins: no version column is checked, the latest
/// successful `update` replaces every mutable field.
pub struct Repository<'c, E, C = DatabaseConnection> {
    conn: &'c C,
    _entity: PhantomData<E>,
}

impl<'c, E, C> Repository<'c, E, C>
where
    E: Record,
    C: ConnectionTrait,
    E::Model: IntoActiveModel<E::ActiveModel> + Send + Sync + 'static,
    E::ActiveModel: ActiveModelBehavior + Send,
    <E::PrimaryKey as PrimaryKeyTrait>::ValueType: From<i32>,
{
    pub fn new(conn: &'c C) -> Self {
        Self {
            conn,
            _entity: PhantomData,
        }
    }

    fn db_error(&self, operation: &'static str, err: DbErr) -> ServiceError {
        counter!("warehouse_repository.errors", 1, "entity" => E::LABEL, "operation" => operation);
        let mapped = ServiceError::from_db(E::LABEL, err);
        if let ServiceError::DatabaseError(e) = &mapped {
            error!(entity = E::LABEL, operation, error = %e, "Persistence failure");
        }
        mapped
    }

    /// Inserts a new row. A missing referenced row is a validation error.
    pub async fn create(&self, model: E::ActiveModel) -> Result<E::Model, ServiceError> {
        let created = model
            .insert(self.conn)
            .await
            .map_err(|e| self.db_error("create", e))?;
        debug!(entity = E::LABEL, id = E::id_of(&created), "Record created");
        Ok(created)
    }

    pub async fn get_by_id(&self, id: i32) -> Result<Option<E::Model>, ServiceError> {
        E::find_by_id(id)
            .one(self.conn)
            .await
            .map_err(|e| self.db_error("get_by_id", e))
    }

    /// Loads a record together with its related `R` rows.
    pub async fn get_by_id_with<R>(
        &self,
        id: i32,
    ) -> Result<Option<(E::Model, Vec<R::Model>)>, ServiceError>
    where
        R: EntityTrait,
        R::Model: Send + Sync,
        E: Related<R>,
    {
        let Some(model) = self.get_by_id(id).await? else {
            return Ok(None);
        };
        let mut related = vec![model.clone()]
            .load_many(R::default(), self.conn)
            .await
            .map_err(|e| self.db_error("get_by_id_with", e))?;
        Ok(Some((model, related.pop().unwrap_or_default())))
    }

    pub async fn get_many(&self, ids: &[i32]) -> Result<Vec<E::Model>, ServiceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        E::find()
            .filter(E::id_column().is_in(ids.iter().copied()))
            .order_by_asc(E::id_column())
            .all(self.conn)
            .await
            .map_err(|e| self.db_error("get_many", e))
    }

    /// First match by id, or `None`.
    pub async fn get_first_or_default(
        &self,
        condition: Condition,
    ) -> Result<Option<E::Model>, ServiceError> {
        E::find()
            .filter(condition)
            .order_by_asc(E::id_column())
            .one(self.conn)
            .await
            .map_err(|e| self.db_error("get_first_or_default", e))
    }

    pub async fn get_count(&self, condition: Option<Condition>) -> Result<u64, ServiceError> {
        E::find()
            .filter(condition.unwrap_or_else(Condition::all))
            .count(self.conn)
            .await
            .map_err(|e| self.db_error("get_count", e))
    }

    pub async fn query_by(&self, search: &SearchModel) -> Result<Page<E::Model>, ServiceError> {
        self.query_by_condition(search, Condition::all()).await
    }

    /// Counts every match first, then fetches the requested page. Ordering
    /// always ends with `id ASC` so pages are deterministic.
    pub async fn query_by_condition(
        &self,
        search: &SearchModel,
        extra: Condition,
    ) -> Result<Page<E::Model>, ServiceError> {
        let start = Instant::now();
        let condition = search.condition::<E>()?.add(extra);
        let order = search.order::<E>()?;

        let total = E::find()
            .filter(condition.clone())
            .count(self.conn)
            .await
            .map_err(|e| self.db_error("query_by", e))?;

        let mut select = E::find().filter(condition);
        let mut sorted_by_id = false;
        for (column, direction) in order {
            sorted_by_id |= column.as_str() == E::id_column().as_str();
            select = select.order_by(column, direction);
        }
        if !sorted_by_id {
            select = select.order_by_asc(E::id_column());
        }

        let items = select
            .offset(search.offset()?)
            .limit(search.page_size)
            .all(self.conn)
            .await
            .map_err(|e| self.db_error("query_by", e))?;

        histogram!("warehouse_repository.query_duration", start.elapsed(), "entity" => E::LABEL);
        debug!(
            entity = E::LABEL,
            total,
            page = search.page,
            page_size = search.page_size,
            returned = items.len(),
            "Query executed"
        );

        Ok(Page {
            items,
            total,
            page: search.page,
            page_size: search.page_size,
        })
    }

    /// Like [`Repository::query_by_condition`], loading related `R` rows for
    /// each record on the page.
    pub async fn query_by_with<R>(
        &self,
        search: &SearchModel,
        extra: Condition,
    ) -> Result<Page<(E::Model, Vec<R::Model>)>, ServiceError>
    where
        R: EntityTrait,
        R::Model: Send + Sync,
        E: Related<R>,
    {
        let page = self.query_by_condition(search, extra).await?;
        let related = page
            .items
            .load_many(R::default(), self.conn)
            .await
            .map_err(|e| self.db_error("query_by_with", e))?;

        let Page {
            items,
            total,
            page,
            page_size,
        } = page;
        Ok(Page {
            items: items.into_iter().zip(related).collect(),
            total,
            page,
            page_size,
        })
    }

    /// Replaces every column of the stored row with `model`.
    pub async fn update(&self, model: E::Model) -> Result<E::Model, ServiceError> {
        let id = E::id_of(&model);
        let active = model.into_active_model().reset_all();
        match active.update(self.conn).await {
            Ok(updated) => {
                info!(entity = E::LABEL, id, "Record updated");
                Ok(updated)
            }
            Err(DbErr::RecordNotFound(_)) | Err(DbErr::RecordNotUpdated) => {
                Err(ServiceError::not_found(E::LABEL, id))
            }
            Err(e) => Err(self.db_error("update", e)),
        }
    }

    /// Archivable records are soft deleted, everything else is removed.
    /// Returns `false` when no row has `id`.
    pub async fn delete(&self, id: i32) -> Result<bool, ServiceError> {
        if E::archived_column().is_some() {
            self.set_archived_flag(id, true).await
        } else {
            self.hard_delete(id).await
        }
    }

    pub async fn hard_delete(&self, id: i32) -> Result<bool, ServiceError> {
        let result = E::delete_by_id(id)
            .exec(self.conn)
            .await
            .map_err(|e| self.db_error("hard_delete", e))?;
        if result.rows_affected > 0 {
            info!(entity = E::LABEL, id, "Record deleted");
        }
        Ok(result.rows_affected > 0)
    }

    /// Sets the archived flag and returns the stored record.
    pub async fn set_archived(
        &self,
        id: i32,
        archived: bool,
    ) -> Result<Option<E::Model>, ServiceError> {
        if !self.set_archived_flag(id, archived).await? {
            return Ok(None);
        }
        self.get_by_id(id).await
    }

    async fn set_archived_flag(&self, id: i32, archived: bool) -> Result<bool, ServiceError> {
        let column = E::archived_column().ok_or_else(|| {
            ServiceError::InvalidOperation(format!("{} cannot be archived", E::LABEL))
        })?;

        let result = E::update_many()
            .col_expr(column, Expr::value(archived))
            .col_expr(E::updated_at_column(), Expr::value(Utc::now()))
            .filter(E::id_column().eq(id))
            .exec(self.conn)
            .await
            .map_err(|e| self.db_error("set_archived", e))?;

        if result.rows_affected > 0 {
            info!(entity = E::LABEL, id, archived, "Archive flag changed");
        }
        Ok(result.rows_affected > 0)
    }

    /// Returns an owned copy of `model`. Rows are never tracked, so changes to
    /// the copy are only written by an explicit [`Repository::update`].
    pub fn detach(&self, model: &E::Model) -> E::Model {
        model.clone()
    }
}
