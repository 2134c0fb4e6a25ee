use axum::{
    extract::{rejection::PathRejection, Path, State},
    response::Response,
    routing::post,
    Router,
};
use tracing::info;

use super::common::{path_params, success_response};
use super::model::{crud_routes, ModelState};
use crate::errors::ApiError;
use crate::services::ShipmentService;
use crate::AppState;

/// Shipment CRUD plus `POST /:id/sign`.
pub fn shipment_routes() -> Router<AppState> {
    crud_routes::<ShipmentService>().route("/:id/sign", post(sign_shipment))
}

/// Sign a draft shipment, deducting its items from stock
async fn sign_shipment(
    State(state): State<ModelState<ShipmentService>>,
    id: Result<Path<i32>, PathRejection>,
) -> Result<Response, ApiError> {
    let id = path_params(id)?;
    let shipment = state.service.sign(id).await?;
    info!(shipment_id = id, "Shipment signed via API");
    Ok(success_response(shipment))
}
