//! Inbound, outbound and transfer movements, adjustments and reservations.

mod common;

use axum::http::StatusCode;
use common::{unique_email, Session, TestApp};
use serde_json::{json, Value};

struct Fixture {
    app: TestApp,
    session: Session,
    product: String,
    east: String,
    west: String,
}

async fn fixture(company: &str) -> Fixture {
    let app = TestApp::new().await;
    let session = app.register(company, &unique_email("owner")).await;
    let product = app.create_product(&session, "MOV-1", "10.00").await;
    let east = app.create_warehouse(&session, "EAST").await;
    let west = app.create_warehouse(&session, "WEST").await;
    Fixture {
        app,
        session,
        product,
        east,
        west,
    }
}

fn quantity(row: &Option<Value>) -> i64 {
    row.as_ref().map(|r| r["quantity"].as_i64().unwrap()).unwrap_or(0)
}

#[tokio::test]
async fn inbound_creates_the_stock_row() {
    let f = fixture("Inbound Co").await;

    let movement = f.app.receive(&f.session, &f.product, &f.east, 40).await;
    assert_eq!(movement.status, StatusCode::CREATED, "{}", movement.body);
    assert_eq!(movement.data()["movement_type"], "inbound");
    assert_eq!(movement.data()["quantity_before"], 0);
    assert_eq!(movement.data()["quantity_after"], 40);
    assert_eq!(movement.data()["processed_by"], f.session.user_id.as_str());

    let row = f.app.stock_row(&f.session, &f.product, &f.east).await;
    assert_eq!(quantity(&row), 40);
    assert_eq!(row.unwrap()["available_quantity"], 40);
}

#[tokio::test]
async fn outbound_beyond_available_is_unprocessable() {
    let f = fixture("Outbound Co").await;
    f.app.receive(&f.session, &f.product, &f.east, 5).await;

    let too_many = f
        .app
        .post(
            "/api/v1/stock-movements",
            json!({
                "movement_type": "outbound",
                "product_id": f.product,
                "from_warehouse_id": f.east,
                "quantity": 6,
            }),
            &f.session.token,
        )
        .await;
    assert_eq!(too_many.status, StatusCode::UNPROCESSABLE_ENTITY);

    let ok = f
        .app
        .post(
            "/api/v1/stock-movements",
            json!({
                "movement_type": "outbound",
                "product_id": f.product,
                "from_warehouse_id": f.east,
                "quantity": 5,
                "reference": "SO-1",
            }),
            &f.session.token,
        )
        .await;
    assert_eq!(ok.status, StatusCode::CREATED, "{}", ok.body);
    assert_eq!(ok.data()["quantity_after"], 0);
}

#[tokio::test]
async fn transfer_moves_units_between_warehouses() {
    let f = fixture("Transfer Co").await;
    f.app.receive(&f.session, &f.product, &f.east, 30).await;

    let transfer = f
        .app
        .post(
            "/api/v1/stock-movements",
            json!({
                "movement_type": "transfer",
                "product_id": f.product,
                "from_warehouse_id": f.east,
                "to_warehouse_id": f.west,
                "quantity": 12,
            }),
            &f.session.token,
        )
        .await;
    assert_eq!(transfer.status, StatusCode::CREATED, "{}", transfer.body);
    assert_eq!(transfer.data()["quantity_before"], 30);
    assert_eq!(transfer.data()["quantity_after"], 18);
    assert_eq!(transfer.data()["destination_quantity_before"], 0);
    assert_eq!(transfer.data()["destination_quantity_after"], 12);

    assert_eq!(quantity(&f.app.stock_row(&f.session, &f.product, &f.east).await), 18);
    assert_eq!(quantity(&f.app.stock_row(&f.session, &f.product, &f.west).await), 12);
}

#[tokio::test]
async fn failed_transfer_changes_neither_side() {
    let f = fixture("Atomic Co").await;
    f.app.receive(&f.session, &f.product, &f.east, 8).await;
    f.app.receive(&f.session, &f.product, &f.west, 2).await;

    let transfer = f
        .app
        .post(
            "/api/v1/stock-movements",
            json!({
                "movement_type": "transfer",
                "product_id": f.product,
                "from_warehouse_id": f.east,
                "to_warehouse_id": f.west,
                "quantity": 9,
            }),
            &f.session.token,
        )
        .await;
    assert_eq!(transfer.status, StatusCode::UNPROCESSABLE_ENTITY);

    assert_eq!(quantity(&f.app.stock_row(&f.session, &f.product, &f.east).await), 8);
    assert_eq!(quantity(&f.app.stock_row(&f.session, &f.product, &f.west).await), 2);

    let ledger = f
        .app
        .get("/api/v1/stock-movements?movement_type=transfer", &f.session.token)
        .await;
    assert_eq!(ledger.status, StatusCode::OK);
    assert_eq!(ledger.data()["total"], 0);
}

#[tokio::test]
async fn transfer_needs_two_distinct_warehouses() {
    let f = fixture("Same Co").await;
    f.app.receive(&f.session, &f.product, &f.east, 8).await;

    let same = f
        .app
        .post(
            "/api/v1/stock-movements",
            json!({
                "movement_type": "transfer",
                "product_id": f.product,
                "from_warehouse_id": f.east,
                "to_warehouse_id": f.east,
                "quantity": 1,
            }),
            &f.session.token,
        )
        .await;
    assert_eq!(same.status, StatusCode::BAD_REQUEST);

    let missing = f
        .app
        .post(
            "/api/v1/stock-movements",
            json!({
                "movement_type": "inbound",
                "product_id": f.product,
                "quantity": 1,
            }),
            &f.session.token,
        )
        .await;
    assert_eq!(missing.status, StatusCode::BAD_REQUEST);

    let zero = f
        .app
        .post(
            "/api/v1/stock-movements",
            json!({
                "movement_type": "inbound",
                "product_id": f.product,
                "to_warehouse_id": f.east,
                "quantity": 0,
            }),
            &f.session.token,
        )
        .await;
    assert_eq!(zero.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn lots_are_tracked_separately() {
    let f = fixture("Lots Co").await;
    for (lot, qty, expiry) in [("L-A", 4, "2030-01-31"), ("L-B", 6, "2030-06-30")] {
        let response = f
            .app
            .post(
                "/api/v1/stock-movements",
                json!({
                    "movement_type": "inbound",
                    "product_id": f.product,
                    "to_warehouse_id": f.east,
                    "quantity": qty,
                    "lot_number": lot,
                    "expiry_date": expiry,
                }),
                &f.session.token,
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
    }

    let rows = f
        .app
        .get(
            &format!("/api/v1/inventory?product_id={}", f.product),
            &f.session.token,
        )
        .await;
    assert_eq!(rows.data()["total"], 2);

    let lot_a_short = f
        .app
        .post(
            "/api/v1/stock-movements",
            json!({
                "movement_type": "outbound",
                "product_id": f.product,
                "from_warehouse_id": f.east,
                "quantity": 5,
                "lot_number": "L-A",
            }),
            &f.session.token,
        )
        .await;
    assert_eq!(lot_a_short.status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn adjustment_records_a_ledger_entry() {
    let f = fixture("Adjust Co").await;
    f.app.receive(&f.session, &f.product, &f.east, 10).await;
    let item_id = f.app.stock_row(&f.session, &f.product, &f.east).await.unwrap()["id"]
        .as_str()
        .unwrap()
        .to_string();

    let adjusted = f
        .app
        .post(
            &format!("/api/v1/inventory/{}/adjust", item_id),
            json!({ "set": 7, "reason": "cycle count" }),
            &f.session.token,
        )
        .await;
    assert_eq!(adjusted.status, StatusCode::OK, "{}", adjusted.body);
    assert_eq!(adjusted.data()["item"]["quantity"], 7);
    assert_eq!(adjusted.data()["movement"]["movement_type"], "adjustment");
    assert_eq!(adjusted.data()["movement"]["quantity"], 3);

    let below_zero = f
        .app
        .post(
            &format!("/api/v1/inventory/{}/adjust", item_id),
            json!({ "delta": -8, "reason": "shrinkage" }),
            &f.session.token,
        )
        .await;
    assert_eq!(below_zero.status, StatusCode::UNPROCESSABLE_ENTITY);

    let via_movement = f
        .app
        .post(
            "/api/v1/stock-movements",
            json!({
                "movement_type": "adjustment",
                "product_id": f.product,
                "to_warehouse_id": f.east,
                "quantity": 1,
            }),
            &f.session.token,
        )
        .await;
    assert_eq!(via_movement.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn reservations_limit_what_can_leave() {
    let f = fixture("Reserve Co").await;
    f.app.receive(&f.session, &f.product, &f.east, 10).await;
    let item_id = f.app.stock_row(&f.session, &f.product, &f.east).await.unwrap()["id"]
        .as_str()
        .unwrap()
        .to_string();

    let reserved = f
        .app
        .post(
            &format!("/api/v1/inventory/{}/reserve", item_id),
            json!({ "quantity": 8 }),
            &f.session.token,
        )
        .await;
    assert_eq!(reserved.status, StatusCode::OK, "{}", reserved.body);
    assert_eq!(reserved.data()["available_quantity"], 2);

    let over = f
        .app
        .post(
            &format!("/api/v1/inventory/{}/reserve", item_id),
            json!({ "quantity": 3 }),
            &f.session.token,
        )
        .await;
    assert_eq!(over.status, StatusCode::UNPROCESSABLE_ENTITY);

    let outbound = f
        .app
        .post(
            "/api/v1/stock-movements",
            json!({
                "movement_type": "outbound",
                "product_id": f.product,
                "from_warehouse_id": f.east,
                "quantity": 3,
            }),
            &f.session.token,
        )
        .await;
    assert_eq!(outbound.status, StatusCode::UNPROCESSABLE_ENTITY);

    let released = f
        .app
        .post(
            &format!("/api/v1/inventory/{}/release", item_id),
            json!({ "quantity": 8 }),
            &f.session.token,
        )
        .await;
    assert_eq!(released.status, StatusCode::OK);
    assert_eq!(released.data()["available_quantity"], 10);
}

#[tokio::test]
async fn ledger_filters_by_warehouse() {
    let f = fixture("Ledger Co").await;
    f.app.receive(&f.session, &f.product, &f.east, 3).await;
    f.app.receive(&f.session, &f.product, &f.west, 4).await;

    let east_only = f
        .app
        .get(
            &format!("/api/v1/stock-movements?warehouse_id={}", f.east),
            &f.session.token,
        )
        .await;
    assert_eq!(east_only.status, StatusCode::OK);
    assert_eq!(east_only.data()["total"], 1);

    let id = east_only.data()["items"][0]["id"].as_str().unwrap().to_string();
    let one = f
        .app
        .get(&format!("/api/v1/stock-movements/{}", id), &f.session.token)
        .await;
    assert_eq!(one.status, StatusCode::OK);
    assert_eq!(one.data()["quantity"], 3);
}
