use axum::{
    extract::{rejection::PathRejection, Path, Query, State},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use super::common::{path_params, success_response, PaginatedResponse};
use super::model::ModelState;
use crate::dto::BalanceResponse;
use crate::errors::ApiError;
use crate::repositories::SearchRequest;
use crate::services::BalanceService;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct RebuildResponse {
    pub balances: u64,
}

pub fn balance_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_balances))
        .route("/rebuild", post(rebuild_balances))
        .route("/:resource_id/:unit_id", get(get_balance))
}

/// List stored balances. Accepts the same query parameters as other lists,
/// e.g. `filter[resource_id]=3`.
async fn list_balances(
    State(state): State<ModelState<BalanceService>>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<PaginatedResponse<BalanceResponse>>, ApiError> {
    let search = SearchRequest::from_query_pairs(params)?.resolve(&state.limits)?;
    let page = state.service.query(search).await?;
    Ok(Json(page.into()))
}

async fn get_balance(
    State(state): State<ModelState<BalanceService>>,
    pair: Result<Path<(i32, i32)>, PathRejection>,
) -> Result<Response, ApiError> {
    let (resource_id, unit_id) = path_params(pair)?;
    let balance = state.service.get(resource_id, unit_id).await?;
    Ok(success_response(balance))
}

async fn rebuild_balances(
    State(state): State<ModelState<BalanceService>>,
) -> Result<Response, ApiError> {
    let balances = state.service.rebuild().await?;
    Ok(success_response(RebuildResponse { balances }))
}
