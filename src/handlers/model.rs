//! Generic CRUD routes for any [`ModelService`].
//!
//! A service is exposed by implementing `FromRef<AppState>` for
//! `ModelState<S>`; the routes below are then mounted with
//! [`crud_routes`] or [`directory_routes`].

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        FromRef, Path, Query, State,
    },
    response::Response,
    routing::{get, post},
    Json, Router,
};

use super::common::{
    created_response, json_body, no_content_response, path_params, success_response,
    validated_body, DeleteParams, PaginatedResponse,
};
use crate::errors::{ApiError, ServiceError};
use crate::repositories::{SearchLimits, SearchRequest};
use crate::services::{ArchiveService, ModelService};
use crate::AppState;

/// Handler state: the service plus the page limits from configuration.
pub struct ModelState<S> {
    pub service: Arc<S>,
    pub limits: SearchLimits,
}

impl<S> ModelState<S> {
    pub fn new(service: Arc<S>, limits: SearchLimits) -> Self {
        Self { service, limits }
    }
}

impl<S> Clone for ModelState<S> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            limits: self.limits,
        }
    }
}

/// List, query, get, create, update and delete.
pub fn crud_routes<S>() -> Router<AppState>
where
    S: ModelService,
    ModelState<S>: FromRef<AppState>,
{
    Router::new()
        .route("/", get(list::<S>).post(create::<S>))
        .route("/query", post(query::<S>))
        .route(
            "/:id",
            get(get_one::<S>).put(update::<S>).delete(delete::<S>),
        )
}

/// CRUD routes plus archive and unarchive.
pub fn directory_routes<S>() -> Router<AppState>
where
    S: ArchiveService,
    ModelState<S>: FromRef<AppState>,
{
    crud_routes::<S>()
        .route("/:id/archive", post(archive::<S>))
        .route("/:id/unarchive", post(unarchive::<S>))
}

async fn list<S: ModelService>(
    State(state): State<ModelState<S>>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<PaginatedResponse<S::Response>>, ApiError> {
    let search = SearchRequest::from_query_pairs(params)?.resolve(&state.limits)?;
    let page = state.service.query(search).await?;
    Ok(Json(page.into()))
}

async fn query<S: ModelService>(
    State(state): State<ModelState<S>>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<PaginatedResponse<S::Response>>, ApiError> {
    let search = json_body(payload)?.resolve(&state.limits)?;
    let page = state.service.query(search).await?;
    Ok(Json(page.into()))
}

async fn get_one<S: ModelService>(
    State(state): State<ModelState<S>>,
    id: Result<Path<i32>, PathRejection>,
) -> Result<Response, ApiError> {
    let id = path_params(id)?;
    let record = state.service.get_by_id(id).await?;
    Ok(success_response(record))
}

async fn create<S: ModelService>(
    State(state): State<ModelState<S>>,
    payload: Result<Json<S::Create>, JsonRejection>,
) -> Result<Response, ApiError> {
    let input = validated_body(payload)?;
    let created = state.service.create(input).await?;
    Ok(created_response(created))
}

async fn update<S: ModelService>(
    State(state): State<ModelState<S>>,
    id: Result<Path<i32>, PathRejection>,
    payload: Result<Json<S::Update>, JsonRejection>,
) -> Result<Response, ApiError> {
    let id = path_params(id)?;
    let input = validated_body(payload)?;
    let updated = state.service.update(id, input).await?;
    Ok(success_response(updated))
}

async fn delete<S: ModelService>(
    State(state): State<ModelState<S>>,
    id: Result<Path<i32>, PathRejection>,
    Query(params): Query<DeleteParams>,
) -> Result<Response, ApiError> {
    let id = path_params(id)?;
    if state.service.delete(id, params.hard).await? {
        Ok(no_content_response())
    } else {
        Err(ServiceError::not_found(S::LABEL, id).into())
    }
}

async fn archive<S: ArchiveService>(
    State(state): State<ModelState<S>>,
    id: Result<Path<i32>, PathRejection>,
) -> Result<Response, ApiError> {
    let id = path_params(id)?;
    let record = state.service.archive(id).await?;
    Ok(success_response(record))
}

async fn unarchive<S: ArchiveService>(
    State(state): State<ModelState<S>>,
    id: Result<Path<i32>, PathRejection>,
) -> Result<Response, ApiError> {
    let id = path_params(id)?;
    let record = state.service.unarchive(id).await?;
    Ok(success_response(record))
}
