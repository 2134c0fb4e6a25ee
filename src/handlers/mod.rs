pub mod balances;
pub mod common;
pub mod model;
pub mod shipments;

use std::sync::Arc;

use axum::extract::FromRef;

use crate::db::DbPool;
use crate::services::{
    BalanceService, ClientService, ReceiptService, ResourceService, ShipmentService, UnitService,
};
use model::ModelState;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub clients: Arc<ClientService>,
    pub resources: Arc<ResourceService>,
    pub units: Arc<UnitService>,
    pub receipts: Arc<ReceiptService>,
    pub shipments: Arc<ShipmentService>,
    pub balances: Arc<BalanceService>,
}

impl AppServices {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self {
            clients: Arc::new(ClientService::new(db_pool.clone())),
            resources: Arc::new(ResourceService::new(db_pool.clone())),
            units: Arc::new(UnitService::new(db_pool.clone())),
            receipts: Arc::new(ReceiptService::new(db_pool.clone())),
            shipments: Arc::new(ShipmentService::new(db_pool.clone())),
            balances: Arc::new(BalanceService::new(db_pool)),
        }
    }
}

macro_rules! model_state {
    ($service:ty, $field:ident) => {
        impl FromRef<AppState> for ModelState<$service> {
            fn from_ref(state: &AppState) -> Self {
                ModelState::new(state.services.$field.clone(), state.search_limits())
            }
        }
    };
}

model_state!(ClientService, clients);
model_state!(ResourceService, resources);
model_state!(UnitService, units);
model_state!(ReceiptService, receipts);
model_state!(ShipmentService, shipments);
model_state!(BalanceService, balances);
