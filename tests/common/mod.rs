#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;
use warehouse_api::{
    config::AppConfig,
    db,
    dto::{
        ClientRequest, ClientResponse, DocumentItemRequest, ReceiptRequest, ReceiptResponse,
        ResourceRequest, ResourceResponse, ShipmentRequest, UnitRequest, UnitResponse,
    },
    services::ModelService,
    AppState,
};

/// Helper harness for spinning up an application state backed by a throwaway
/// SQLite file.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _dir: TempDir,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let db_file = dir.path().join("warehouse_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_file.display()),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.api_max_page_size = 50;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let state = AppState::new(Arc::new(pool), cfg);
        let router = warehouse_api::app_router(state.clone());

        Self {
            router,
            state,
            _dir: dir,
        }
    }

    /// Send a request against the router.
    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn resource(&self, name: &str) -> ResourceResponse {
        self.state
            .services
            .resources
            .create(ResourceRequest { name: name.into() })
            .await
            .expect("create resource")
    }

    pub async fn unit(&self, name: &str) -> UnitResponse {
        self.state
            .services
            .units
            .create(UnitRequest { name: name.into() })
            .await
            .expect("create unit")
    }

    pub async fn client(&self, name: &str) -> ClientResponse {
        self.state
            .services
            .clients
            .create(ClientRequest {
                name: name.into(),
                address: format!("{} street 1", name),
            })
            .await
            .expect("create client")
    }

    pub async fn receipt(&self, number: &str, items: Vec<DocumentItemRequest>) -> ReceiptResponse {
        self.state
            .services
            .receipts
            .create(receipt_request(number, items))
            .await
            .expect("create receipt")
    }

    pub async fn balance(&self, resource_id: i32, unit_id: i32) -> Decimal {
        self.state
            .services
            .balances
            .get(resource_id, unit_id)
            .await
            .expect("balance")
            .quantity
    }
}

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).expect("valid date")
}

pub fn item(resource_id: i32, unit_id: i32, quantity: Decimal) -> DocumentItemRequest {
    DocumentItemRequest {
        resource_id,
        unit_id,
        quantity,
    }
}

pub fn receipt_request(number: &str, items: Vec<DocumentItemRequest>) -> ReceiptRequest {
    ReceiptRequest {
        number: number.into(),
        date: day(1),
        items,
    }
}

pub fn shipment_request(
    number: &str,
    client_id: i32,
    items: Vec<DocumentItemRequest>,
    sign: bool,
) -> ShipmentRequest {
    ShipmentRequest {
        number: number.into(),
        date: day(2),
        client_id,
        items,
        sign,
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}
