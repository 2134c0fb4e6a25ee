mod common;

use assert_matches::assert_matches;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use warehouse_api::{
    entities::shipment_document::ShipmentStatus,
    errors::ServiceError,
    repositories::SearchModel,
    services::{ArchiveService, ModelService},
};

use common::{item, receipt_request, shipment_request, TestApp};

struct Stock {
    app: TestApp,
    steel: i32,
    copper: i32,
    kg: i32,
    client: i32,
}

async fn stock() -> Stock {
    let app = TestApp::new().await;
    let steel = app.resource("Steel").await.id;
    let copper = app.resource("Copper").await.id;
    let kg = app.unit("kg").await.id;
    let client = app.client("Acme").await.id;
    Stock {
        app,
        steel,
        copper,
        kg,
        client,
    }
}

#[tokio::test]
async fn receipt_increases_balance() {
    let s = stock().await;
    let receipt = s
        .app
        .receipt("R-1", vec![item(s.steel, s.kg, dec!(10))])
        .await;

    assert_eq!(receipt.items.len(), 1);
    assert_eq!(receipt.items[0].resource_name, "Steel");
    assert_eq!(receipt.items[0].unit_name, "kg");
    assert_eq!(s.app.balance(s.steel, s.kg).await, dec!(10));
    assert_eq!(s.app.balance(s.copper, s.kg).await, Decimal::ZERO);
}

#[tokio::test]
async fn receipt_numbers_are_unique() {
    let s = stock().await;
    s.app.receipt("R-1", vec![]).await;

    let result = s
        .app
        .state
        .services
        .receipts
        .create(receipt_request("R-1", vec![item(s.steel, s.kg, dec!(1))]))
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));
    assert_eq!(s.app.balance(s.steel, s.kg).await, Decimal::ZERO);
}

#[tokio::test]
async fn archived_resource_cannot_be_used_on_new_documents() {
    let s = stock().await;
    s.app
        .receipt("R-1", vec![item(s.steel, s.kg, dec!(10))])
        .await;
    s.app.state.services.resources.archive(s.steel).await.unwrap();

    let shipment = s
        .app
        .state
        .services
        .shipments
        .create(shipment_request(
            "S-1",
            s.client,
            vec![item(s.steel, s.kg, dec!(1))],
            false,
        ))
        .await;
    assert_matches!(shipment, Err(ServiceError::ValidationError(msg)) if msg.contains("archived"));

    let receipt = s
        .app
        .state
        .services
        .receipts
        .create(receipt_request("R-2", vec![item(s.steel, s.kg, dec!(1))]))
        .await;
    assert_matches!(receipt, Err(ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn archived_pair_may_stay_on_an_existing_receipt() {
    let s = stock().await;
    let receipt = s
        .app
        .receipt("R-1", vec![item(s.steel, s.kg, dec!(10))])
        .await;
    s.app.state.services.units.archive(s.kg).await.unwrap();

    let updated = s
        .app
        .state
        .services
        .receipts
        .update(
            receipt.id,
            receipt_request("R-1", vec![item(s.steel, s.kg, dec!(12))]),
        )
        .await
        .unwrap();
    assert_eq!(updated.items[0].quantity, dec!(12));
    assert_eq!(s.app.balance(s.steel, s.kg).await, dec!(12));

    let added = s
        .app
        .state
        .services
        .receipts
        .update(
            receipt.id,
            receipt_request(
                "R-1",
                vec![item(s.steel, s.kg, dec!(12)), item(s.copper, s.kg, dec!(1))],
            ),
        )
        .await;
    assert_matches!(added, Err(ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn unknown_references_are_validation_errors() {
    let s = stock().await;
    let result = s
        .app
        .state
        .services
        .receipts
        .create(receipt_request("R-1", vec![item(999, s.kg, dec!(1))]))
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));

    let result = s
        .app
        .state
        .services
        .shipments
        .create(shipment_request(
            "S-1",
            999,
            vec![item(s.steel, s.kg, dec!(1))],
            false,
        ))
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn quantities_must_be_positive() {
    let s = stock().await;
    let result = s
        .app
        .state
        .services
        .receipts
        .create(receipt_request("R-1", vec![item(s.steel, s.kg, dec!(-2))]))
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn draft_shipment_leaves_balance_until_signed() {
    let s = stock().await;
    s.app
        .receipt("R-1", vec![item(s.steel, s.kg, dec!(10))])
        .await;
    let shipments = &s.app.state.services.shipments;

    let draft = shipments
        .create(shipment_request(
            "S-1",
            s.client,
            vec![item(s.steel, s.kg, dec!(4))],
            false,
        ))
        .await
        .unwrap();
    assert_eq!(draft.status, ShipmentStatus::Draft);
    assert_eq!(draft.client_name, "Acme");
    assert_eq!(s.app.balance(s.steel, s.kg).await, dec!(10));

    let signed = shipments.sign(draft.id).await.unwrap();
    assert_eq!(signed.status, ShipmentStatus::Signed);
    assert_eq!(s.app.balance(s.steel, s.kg).await, dec!(6));
}

#[tokio::test]
async fn signing_beyond_stock_is_rejected() {
    let s = stock().await;
    s.app
        .receipt("R-1", vec![item(s.steel, s.kg, dec!(3))])
        .await;
    let shipments = &s.app.state.services.shipments;

    let result = shipments
        .create(shipment_request(
            "S-1",
            s.client,
            vec![item(s.steel, s.kg, dec!(5))],
            true,
        ))
        .await;
    assert_matches!(result, Err(ServiceError::InvalidOperation(_)));
    assert_eq!(s.app.balance(s.steel, s.kg).await, dec!(3));
    assert_eq!(shipments.query(SearchModel::default()).await.unwrap().total, 0);

    let draft = shipments
        .create(shipment_request(
            "S-2",
            s.client,
            vec![item(s.steel, s.kg, dec!(5))],
            false,
        ))
        .await
        .unwrap();
    assert_matches!(
        shipments.sign(draft.id).await,
        Err(ServiceError::InvalidOperation(_))
    );
    assert_eq!(
        shipments.get_by_id(draft.id).await.unwrap().status,
        ShipmentStatus::Draft
    );
}

#[tokio::test]
async fn signed_shipments_are_immutable() {
    let s = stock().await;
    s.app
        .receipt("R-1", vec![item(s.steel, s.kg, dec!(10))])
        .await;
    let shipments = &s.app.state.services.shipments;
    let signed = shipments
        .create(shipment_request(
            "S-1",
            s.client,
            vec![item(s.steel, s.kg, dec!(2))],
            true,
        ))
        .await
        .unwrap();

    let update = shipments
        .update(
            signed.id,
            shipment_request("S-1", s.client, vec![item(s.steel, s.kg, dec!(1))], false),
        )
        .await;
    assert_matches!(update, Err(ServiceError::InvalidOperation(_)));
    assert_matches!(
        shipments.delete(signed.id, false).await,
        Err(ServiceError::InvalidOperation(_))
    );
    assert_matches!(
        shipments.sign(signed.id).await,
        Err(ServiceError::InvalidOperation(_))
    );
    assert_eq!(s.app.balance(s.steel, s.kg).await, dec!(8));
}

#[tokio::test]
async fn draft_shipments_can_be_edited_and_deleted() {
    let s = stock().await;
    s.app
        .receipt("R-1", vec![item(s.steel, s.kg, dec!(10))])
        .await;
    let shipments = &s.app.state.services.shipments;
    let draft = shipments
        .create(shipment_request(
            "S-1",
            s.client,
            vec![item(s.steel, s.kg, dec!(2))],
            false,
        ))
        .await
        .unwrap();

    let edited = shipments
        .update(
            draft.id,
            shipment_request("S-1b", s.client, vec![item(s.steel, s.kg, dec!(7))], false),
        )
        .await
        .unwrap();
    assert_eq!(edited.number, "S-1b");
    assert_eq!(edited.items[0].quantity, dec!(7));

    assert!(shipments.delete(draft.id, false).await.unwrap());
    assert!(!shipments.delete(draft.id, false).await.unwrap());
    assert_eq!(s.app.balance(s.steel, s.kg).await, dec!(10));
}

#[tokio::test]
async fn shipment_requires_items() {
    let s = stock().await;
    let result = s
        .app
        .state
        .services
        .shipments
        .create(shipment_request("S-1", s.client, vec![], false))
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn receipt_changes_cannot_drive_balance_negative() {
    let s = stock().await;
    let receipt = s
        .app
        .receipt("R-1", vec![item(s.steel, s.kg, dec!(10))])
        .await;
    let receipts = &s.app.state.services.receipts;
    s.app
        .state
        .services
        .shipments
        .create(shipment_request(
            "S-1",
            s.client,
            vec![item(s.steel, s.kg, dec!(6))],
            true,
        ))
        .await
        .unwrap();

    let shrink = receipts
        .update(
            receipt.id,
            receipt_request("R-1", vec![item(s.steel, s.kg, dec!(5))]),
        )
        .await;
    assert_matches!(shrink, Err(ServiceError::InvalidOperation(msg)) if msg.contains("Steel"));
    assert_matches!(
        receipts.delete(receipt.id, false).await,
        Err(ServiceError::InvalidOperation(_))
    );

    assert_eq!(s.app.balance(s.steel, s.kg).await, dec!(4));
    assert_eq!(receipts.get_by_id(receipt.id).await.unwrap().items[0].quantity, dec!(10));

    let fine = receipts
        .update(
            receipt.id,
            receipt_request("R-1", vec![item(s.steel, s.kg, dec!(6))]),
        )
        .await
        .unwrap();
    assert_eq!(fine.items.len(), 1);
    assert_eq!(s.app.balance(s.steel, s.kg).await, Decimal::ZERO);
    assert_eq!(
        s.app
            .state
            .services
            .balances
            .query(SearchModel::default())
            .await
            .unwrap()
            .total,
        0
    );
}

#[tokio::test]
async fn deleting_a_receipt_removes_its_stock() {
    let s = stock().await;
    let receipt = s
        .app
        .receipt(
            "R-1",
            vec![item(s.steel, s.kg, dec!(10)), item(s.copper, s.kg, dec!(2.5))],
        )
        .await;
    let receipts = &s.app.state.services.receipts;

    assert!(receipts.delete(receipt.id, false).await.unwrap());
    assert!(!receipts.delete(receipt.id, false).await.unwrap());
    assert_eq!(s.app.balance(s.steel, s.kg).await, Decimal::ZERO);
    assert_eq!(s.app.balance(s.copper, s.kg).await, Decimal::ZERO);
}

#[tokio::test]
async fn document_filters_narrow_lists() {
    let s = stock().await;
    s.app
        .receipt("R-1", vec![item(s.steel, s.kg, dec!(1))])
        .await;
    s.app
        .receipt("R-2", vec![item(s.copper, s.kg, dec!(1))])
        .await;
    let receipts = &s.app.state.services.receipts;

    let steel_only = receipts
        .query(SearchModel::default().filter("resource_id", s.steel.to_string()))
        .await
        .unwrap();
    assert_eq!(steel_only.total, 1);
    assert_eq!(steel_only.items[0].number, "R-1");

    let both = receipts
        .query(SearchModel::default().filter("resource_id", format!("{},{}", s.steel, s.copper)))
        .await
        .unwrap();
    assert_eq!(both.total, 2);

    let none = receipts
        .query(SearchModel::default().filter("date_from", "2024-04-01"))
        .await
        .unwrap();
    assert_eq!(none.total, 0);

    let mut search = SearchModel::default();
    search.search = Some("R-2".into());
    assert_eq!(receipts.query(search).await.unwrap().total, 1);
}

#[tokio::test]
async fn rebuild_restores_balances() {
    let s = stock().await;
    s.app
        .receipt("R-1", vec![item(s.steel, s.kg, dec!(10)), item(s.copper, s.kg, dec!(4))])
        .await;
    s.app
        .state
        .services
        .shipments
        .create(shipment_request(
            "S-1",
            s.client,
            vec![item(s.steel, s.kg, dec!(3))],
            true,
        ))
        .await
        .unwrap();

    let balances = &s.app.state.services.balances;
    assert_eq!(balances.rebuild().await.unwrap(), 2);
    assert_eq!(s.app.balance(s.steel, s.kg).await, dec!(7));
    assert_eq!(s.app.balance(s.copper, s.kg).await, dec!(4));

    let listed = balances.query(SearchModel::default()).await.unwrap();
    assert_eq!(listed.total, 2);
    assert!(listed.items.iter().all(|b| b.unit_name == "kg"));
}

#[tokio::test]
async fn balance_of_unknown_resource_is_not_found() {
    let s = stock().await;
    assert_matches!(
        s.app.state.services.balances.get(999, s.kg).await,
        Err(ServiceError::NotFound(_))
    );
}
