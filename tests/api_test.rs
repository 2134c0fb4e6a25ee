mod common;

use axum::http::{Method, StatusCode};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use warehouse_api::tracing::REQUEST_ID_HEADER;

use common::{item, response_json, TestApp};

#[tokio::test]
async fn status_and_health_respond() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/api/v1/status", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    let body = response_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["service"], "warehouse-api");

    let response = app.request(Method::GET, "/api/v1/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn resource_crud_over_http() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/resources",
            Some(json!({ "name": "Steel" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = response_json(response).await;
    let id = created["id"].as_i64().expect("id");
    assert_eq!(created["is_archived"], false);

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/resources/{}", id),
            Some(json!({ "name": "Stainless steel" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["name"], "Stainless steel");

    let response = app
        .request(Method::POST, &format!("/api/v1/resources/{}/archive", id), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["is_archived"], true);

    let response = app
        .request(Method::DELETE, &format!("/api/v1/resources/{}?hard=true", id), None)
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .request(Method::GET, &format!("/api/v1/resources/{}", id), None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = response_json(response).await;
    assert_eq!(body["error"], "Not Found");
    assert!(body["request_id"].is_string());
}

#[tokio::test]
async fn list_endpoint_paginates() {
    let app = TestApp::new().await;
    for name in ["kg", "pcs", "m", "l", "t"] {
        app.unit(name).await;
    }

    let response = app
        .request(Method::GET, "/api/v1/units?page=2&page_size=2&sort=name", None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["pagination"]["total"], 5);
    assert_eq!(body["pagination"]["total_pages"], 3);
    assert_eq!(body["pagination"]["page"], 2);
    let names: Vec<&str> = body["data"]
        .as_array()
        .expect("data array")
        .iter()
        .map(|u| u["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["m", "pcs"]);

    let response = app
        .request(
            Method::POST,
            "/api/v1/units/query",
            Some(json!({ "search": "k", "page": 1, "page_size": 10 })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["pagination"]["total"], 1);
    assert_eq!(body["data"][0]["name"], "kg");
}

#[tokio::test]
async fn malformed_requests_are_bad_requests() {
    let app = TestApp::new().await;

    let unknown = app.request(Method::GET, "/api/v1/units?colour=red", None).await;
    assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);

    let too_big = app
        .request(Method::GET, "/api/v1/units?page_size=5000", None)
        .await;
    assert_eq!(too_big.status(), StatusCode::BAD_REQUEST);

    let zero_page = app.request(Method::GET, "/api/v1/units?page=0", None).await;
    assert_eq!(zero_page.status(), StatusCode::BAD_REQUEST);

    let far_page = app
        .request(
            Method::GET,
            "/api/v1/resources?page=18446744073709551615&per_page=2",
            None,
        )
        .await;
    assert_eq!(far_page.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response_json(far_page).await["error"], "Bad Request");

    let bad_body = app
        .request(Method::POST, "/api/v1/units", Some(json!({ "title": "kg" })))
        .await;
    assert_eq!(bad_body.status(), StatusCode::BAD_REQUEST);

    let missing = app.request(Method::DELETE, "/api/v1/receipts/77", None).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn field_errors_are_reported_per_field() {
    let app = TestApp::new().await;

    let response = app
        .request(Method::POST, "/api/v1/units", Some(json!({ "name": "" })))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["message"], "Validation failed");
    assert!(body["details"]["name"].is_array());
}

#[tokio::test]
async fn unparsable_ids_get_json_errors() {
    let app = TestApp::new().await;

    for uri in [
        "/api/v1/resources/abc",
        "/api/v1/shipments/x/sign",
        "/api/v1/balances/1/kg",
    ] {
        let method = if uri.ends_with("/sign") {
            Method::POST
        } else {
            Method::GET
        };
        let response = app.request(method, uri, None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
        let body = response_json(response).await;
        assert_eq!(body["error"], "Bad Request");
        assert!(body["request_id"].is_string());
    }
}

#[tokio::test]
async fn shipment_sign_flow_over_http() {
    let app = TestApp::new().await;
    let steel = app.resource("Steel").await;
    let kg = app.unit("kg").await;
    let client = app.client("Acme").await;
    app.receipt("R-1", vec![item(steel.id, kg.id, dec!(10))]).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/shipments",
            Some(json!({
                "number": "S-1",
                "date": "2024-03-02",
                "client_id": client.id,
                "items": [{ "resource_id": steel.id, "unit_id": kg.id, "quantity": "4" }]
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let shipment = response_json(response).await;
    assert_eq!(shipment["status"], "draft");
    let id = shipment["id"].as_i64().expect("id");

    let response = app
        .request(Method::POST, &format!("/api/v1/shipments/{}/sign", id), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["status"], "signed");

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/balances/{}/{}", steel.id, kg.id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let balance = response_json(response).await;
    assert_eq!(balance["resource_name"], "Steel");
    let quantity: Decimal = balance["quantity"]
        .as_str()
        .expect("decimal as string")
        .parse()
        .unwrap();
    assert_eq!(quantity, dec!(6));

    let response = app
        .request(Method::DELETE, &format!("/api/v1/shipments/{}", id), None)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.request(Method::POST, "/api/v1/balances/rebuild", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["balances"], 1);

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/balances?filter%5Bresource_id%5D={}", steel.id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["pagination"]["total"], 1);
}
