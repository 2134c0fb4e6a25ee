//! Archivable, uniquely named directory records (clients, resources, units).
//!
//! [`DirectoryService`] implements the CRUD pipeline once; each entity plugs
//! in its request mapping and the references that block a hard delete
//! through [`DirectoryRecord`].

use std::collections::{BTreeSet, HashMap};
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::{
    ActiveModelBehavior, ColumnTrait, Condition, ConnectionTrait, EntityTrait, IntoActiveModel,
    PaginatorTrait, PrimaryKeyTrait, QueryFilter,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{info, instrument, warn};
use validator::Validate;

use super::{ArchiveService, ModelService};
use crate::db::DbPool;
use crate::entities::{resource, unit};
use crate::errors::ServiceError;
use crate::repositories::{Page, Record, Repository, SearchModel};

/// Per-entity hooks for [`DirectoryService`].
#[async_trait]
pub trait DirectoryRecord: Record {
    type Request: DeserializeOwned + Validate + Send + Sync + 'static;
    type Response: Serialize + From<Self::Model> + Send + 'static;

    fn name_column() -> Self::Column;

    fn requested_name(input: &Self::Request) -> &str;

    /// Row for a new record; `name` is already trimmed and unique.
    fn new_row(name: String, input: &Self::Request) -> Self::ActiveModel;

    /// Copies the request onto a detached model.
    fn apply(model: &mut Self::Model, name: String, input: &Self::Request);

    /// Rows that still point at `id`. A referenced record can only be
    /// archived.
    async fn usages(db: &DbPool, id: i32) -> Result<u64, ServiceError>;
}

pub struct DirectoryService<E> {
    db: Arc<DbPool>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for DirectoryService<E> {
    fn clone(&self) -> Self {
        Self::new(self.db.clone())
    }
}

impl<E> DirectoryService<E> {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self {
            db,
            _entity: PhantomData,
        }
    }
}

impl<E> DirectoryService<E>
where
    E: DirectoryRecord,
    E::Model: IntoActiveModel<E::ActiveModel> + Send + Sync + 'static,
    E::ActiveModel: ActiveModelBehavior + Send,
    <E::PrimaryKey as PrimaryKeyTrait>::ValueType: From<i32>,
{
    fn repo(&self) -> Repository<'_, E> {
        Repository::new(&*self.db)
    }

    async fn find(&self, id: i32) -> Result<E::Model, ServiceError> {
        self.repo()
            .get_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found(E::LABEL, id))
    }

    async fn unique_name(
        &self,
        input: &E::Request,
        except_id: Option<i32>,
    ) -> Result<String, ServiceError> {
        unique_value::<E, _>(
            &*self.db,
            E::name_column(),
            "name",
            E::requested_name(input),
            except_id,
        )
        .await
    }

    async fn set_archived(&self, id: i32, archived: bool) -> Result<E::Response, ServiceError> {
        let model = self
            .repo()
            .set_archived(id, archived)
            .await?
            .ok_or_else(|| ServiceError::not_found(E::LABEL, id))?;
        Ok(model.into())
    }
}

#[async_trait]
impl<E> ModelService for DirectoryService<E>
where
    E: DirectoryRecord,
    E::Model: IntoActiveModel<E::ActiveModel> + Send + Sync + 'static,
    E::ActiveModel: ActiveModelBehavior + Send,
    <E::PrimaryKey as PrimaryKeyTrait>::ValueType: From<i32>,
{
    const LABEL: &'static str = E::LABEL;

    type Create = E::Request;
    type Update = E::Request;
    type Response = E::Response;

    #[instrument(skip(self, input), fields(entity = E::LABEL))]
    async fn create(&self, input: E::Request) -> Result<E::Response, ServiceError> {
        input.validate()?;
        let name = self.unique_name(&input, None).await?;
        let created = self.repo().create(E::new_row(name, &input)).await?;

        info!(entity = E::LABEL, id = E::id_of(&created), "Directory record created");
        Ok(created.into())
    }

    #[instrument(skip(self), fields(entity = E::LABEL))]
    async fn get_by_id(&self, id: i32) -> Result<E::Response, ServiceError> {
        Ok(self.find(id).await?.into())
    }

    #[instrument(skip(self, search), fields(entity = E::LABEL))]
    async fn query(&self, search: SearchModel) -> Result<Page<E::Response>, ServiceError> {
        Ok(self.repo().query_by(&search).await?.map(Into::into))
    }

    #[instrument(skip(self, input), fields(entity = E::LABEL))]
    async fn update(&self, id: i32, input: E::Request) -> Result<E::Response, ServiceError> {
        input.validate()?;
        let existing = self.find(id).await?;
        let name = self.unique_name(&input, Some(id)).await?;

        let mut model = self.repo().detach(&existing);
        E::apply(&mut model, name, &input);
        Ok(self.repo().update(model).await?.into())
    }

    #[instrument(skip(self), fields(entity = E::LABEL))]
    async fn delete(&self, id: i32, hard: bool) -> Result<bool, ServiceError> {
        if !hard {
            return self.repo().delete(id).await;
        }
        if self.repo().get_by_id(id).await?.is_none() {
            return Ok(false);
        }
        let usages = E::usages(&self.db, id).await?;
        if usages > 0 {
            return Err(in_use(E::LABEL, id, usages));
        }
        self.repo().hard_delete(id).await
    }
}

#[async_trait]
impl<E> ArchiveService for DirectoryService<E>
where
    E: DirectoryRecord,
    E::Model: IntoActiveModel<E::ActiveModel> + Send + Sync + 'static,
    E::ActiveModel: ActiveModelBehavior + Send,
    <E::PrimaryKey as PrimaryKeyTrait>::ValueType: From<i32>,
{
    #[instrument(skip(self), fields(entity = E::LABEL))]
    async fn archive(&self, id: i32) -> Result<E::Response, ServiceError> {
        self.set_archived(id, true).await
    }

    #[instrument(skip(self), fields(entity = E::LABEL))]
    async fn unarchive(&self, id: i32) -> Result<E::Response, ServiceError> {
        self.set_archived(id, false).await
    }
}

/// Trims `value` and rejects it when another record already stores it in
/// `column`. Returns the trimmed value.
pub(crate) async fn unique_value<E, C>(
    conn: &C,
    column: E::Column,
    field: &str,
    value: &str,
    except_id: Option<i32>,
) -> Result<String, ServiceError>
where
    E: Record,
    E::Model: Send + Sync + 'static,
    C: ConnectionTrait,
{
    let value = value.trim();
    if value.is_empty() {
        return Err(ServiceError::ValidationError(format!(
            "{} {} must not be blank",
            E::LABEL,
            field
        )));
    }

    let mut condition = Condition::all().add(column.eq(value));
    if let Some(id) = except_id {
        condition = condition.add(E::id_column().ne(id));
    }

    let taken = E::find().filter(condition).count(conn).await?;
    if taken > 0 {
        warn!(entity = E::LABEL, field, value, "Duplicate value rejected");
        return Err(ServiceError::ValidationError(format!(
            "{} with {} '{}' already exists",
            E::LABEL,
            field,
            value
        )));
    }
    Ok(value.to_string())
}

/// Counts rows of `E` whose `column` points at `id`.
pub(crate) async fn references<E, C>(conn: &C, column: E::Column, id: i32) -> Result<u64, ServiceError>
where
    E: EntityTrait,
    E::Model: Send + Sync + 'static,
    C: ConnectionTrait,
{
    Ok(E::find().filter(column.eq(id)).count(conn).await?)
}

pub(crate) fn in_use(label: &str, id: i32, usages: u64) -> ServiceError {
    warn!(entity = label, id, usages, "Hard delete refused for referenced record");
    ServiceError::InvalidOperation(format!(
        "{} with ID {} is used by {} record(s); archive it instead",
        label, id, usages
    ))
}

/// Loads the resources with the given ids, keyed by id.
pub(crate) async fn resources_by_id<C: ConnectionTrait>(
    conn: &C,
    ids: impl IntoIterator<Item = i32>,
) -> Result<HashMap<i32, resource::Model>, ServiceError> {
    let ids: BTreeSet<i32> = ids.into_iter().collect();
    let ids: Vec<i32> = ids.into_iter().collect();
    Ok(Repository::<resource::Entity, C>::new(conn)
        .get_many(&ids)
        .await?
        .into_iter()
        .map(|model| (model.id, model))
        .collect())
}

/// Loads the units with the given ids, keyed by id.
pub(crate) async fn units_by_id<C: ConnectionTrait>(
    conn: &C,
    ids: impl IntoIterator<Item = i32>,
) -> Result<HashMap<i32, unit::Model>, ServiceError> {
    let ids: BTreeSet<i32> = ids.into_iter().collect();
    let ids: Vec<i32> = ids.into_iter().collect();
    Ok(Repository::<unit::Entity, C>::new(conn)
        .get_many(&ids)
        .await?
        .into_iter()
        .map(|model| (model.id, model))
        .collect())
}
