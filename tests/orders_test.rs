//! Order lifecycle and the reports built on top of it.

mod common;

use axum::http::StatusCode;
use common::{unique_email, Session, TestApp};
use serde_json::{json, Value};

struct Shop {
    app: TestApp,
    session: Session,
    product: String,
    warehouse: String,
}

async fn shop(company: &str, stock: i32) -> Shop {
    let app = TestApp::new().await;
    let session = app.register(company, &unique_email("owner")).await;
    let product = app.create_product(&session, "ORD-SKU", "5.00").await;
    let warehouse = app.create_warehouse(&session, "MAIN").await;
    if stock > 0 {
        let received = app.receive(&session, &product, &warehouse, stock).await;
        assert_eq!(received.status, StatusCode::CREATED, "{}", received.body);
    }
    Shop {
        app,
        session,
        product,
        warehouse,
    }
}

fn decimal(value: &Value) -> f64 {
    match value {
        Value::String(s) => s.parse().unwrap(),
        other => other.as_f64().unwrap(),
    }
}

impl Shop {
    async fn order(&self, quantity: i32) -> String {
        let created = self
            .app
            .post(
                "/api/v1/orders",
                json!({
                    "customer_name": "Jane Buyer",
                    "customer_email": "jane@example.com",
                    "warehouse_id": self.warehouse,
                    "items": [{ "product_id": self.product, "quantity": quantity }],
                }),
                &self.session.token,
            )
            .await;
        assert_eq!(created.status, StatusCode::CREATED, "{}", created.body);
        created.id()
    }

    async fn action(&self, id: &str, action: &str) -> common::TestResponse {
        self.app
            .post(
                &format!("/api/v1/orders/{}/{}", id, action),
                json!({}),
                &self.session.token,
            )
            .await
    }

    async fn on_hand(&self) -> (i64, i64) {
        let row = self
            .app
            .stock_row(&self.session, &self.product, &self.warehouse)
            .await
            .expect("stock row");
        (
            row["quantity"].as_i64().unwrap(),
            row["reserved_quantity"].as_i64().unwrap(),
        )
    }
}

#[tokio::test]
async fn create_prices_lines_from_the_catalogue() {
    let s = shop("Pricing Co", 0).await;
    let created = s
        .app
        .post(
            "/api/v1/orders",
            json!({
                "customer_name": "Jane Buyer",
                "warehouse_id": s.warehouse,
                "items": [
                    { "product_id": s.product, "quantity": 3 },
                    { "product_id": s.product, "quantity": 1, "unit_price": "2.50" },
                ],
            }),
            &s.session.token,
        )
        .await;
    assert_eq!(created.status, StatusCode::CREATED, "{}", created.body);

    let order = created.data();
    assert_eq!(order["status"], "pending");
    assert_eq!(decimal(&order["total_amount"]), 17.5);
    assert_eq!(order["items"].as_array().unwrap().len(), 2);
    assert!(order["order_number"].as_str().unwrap().starts_with("ORD-"));
}

#[tokio::test]
async fn order_without_lines_is_rejected() {
    let s = shop("Empty Co", 0).await;
    let response = s
        .app
        .post(
            "/api/v1/orders",
            json!({ "customer_name": "Nobody", "warehouse_id": s.warehouse, "items": [] }),
            &s.session.token,
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn confirm_reserves_and_fulfil_ships() {
    let s = shop("Lifecycle Co", 10).await;
    let id = s.order(4).await;

    let confirmed = s.action(&id, "confirm").await;
    assert_eq!(confirmed.status, StatusCode::OK, "{}", confirmed.body);
    assert_eq!(confirmed.data()["status"], "confirmed");
    assert_eq!(s.on_hand().await, (10, 4));

    let fulfilled = s.action(&id, "fulfill").await;
    assert_eq!(fulfilled.status, StatusCode::OK, "{}", fulfilled.body);
    assert_eq!(fulfilled.data()["status"], "fulfilled");
    assert!(fulfilled.data()["fulfilled_at"].is_string());
    assert_eq!(s.on_hand().await, (6, 0));

    let ledger = s
        .app
        .get("/api/v1/stock-movements?movement_type=outbound", &s.session.token)
        .await;
    assert_eq!(ledger.data()["total"], 1);
    let reference = ledger.data()["items"][0]["reference"].clone();
    assert_eq!(reference, fulfilled.data()["order_number"]);
}

#[tokio::test]
async fn confirm_without_enough_stock_is_unprocessable() {
    let s = shop("Short Co", 2).await;
    let id = s.order(3).await;

    let response = s.action(&id, "confirm").await;
    assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(s.on_hand().await, (2, 0));

    let order = s.app.get(&format!("/api/v1/orders/{}", id), &s.session.token).await;
    assert_eq!(order.data()["status"], "pending");
}

#[tokio::test]
async fn cancel_releases_the_reservation() {
    let s = shop("Cancel Co", 10).await;
    let id = s.order(6).await;
    s.action(&id, "confirm").await;
    assert_eq!(s.on_hand().await, (10, 6));

    let cancelled = s.action(&id, "cancel").await;
    assert_eq!(cancelled.status, StatusCode::OK);
    assert_eq!(cancelled.data()["status"], "cancelled");
    assert_eq!(s.on_hand().await, (10, 0));

    let deleted = s
        .app
        .delete(&format!("/api/v1/orders/{}", id), &s.session.token)
        .await;
    assert_eq!(deleted.status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn transitions_outside_the_lifecycle_are_rejected() {
    let s = shop("Strict Co", 10).await;
    let id = s.order(1).await;

    assert_eq!(s.action(&id, "fulfill").await.status, StatusCode::BAD_REQUEST);

    s.action(&id, "confirm").await;
    s.action(&id, "fulfill").await;
    assert_eq!(s.action(&id, "cancel").await.status, StatusCode::BAD_REQUEST);

    let edit = s
        .app
        .put(
            &format!("/api/v1/orders/{}", id),
            json!({ "notes": "too late" }),
            &s.session.token,
        )
        .await;
    assert_eq!(edit.status, StatusCode::BAD_REQUEST);

    let delete = s
        .app
        .delete(&format!("/api/v1/orders/{}", id), &s.session.token)
        .await;
    assert_eq!(delete.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn orders_filter_by_status() {
    let s = shop("Filter Co", 10).await;
    let first = s.order(1).await;
    s.order(1).await;
    s.action(&first, "confirm").await;

    let pending = s
        .app
        .get("/api/v1/orders?status=pending", &s.session.token)
        .await;
    assert_eq!(pending.status, StatusCode::OK);
    assert_eq!(pending.data()["total"], 1);
}

#[tokio::test]
async fn reports_summarise_stock_and_orders() {
    let s = shop("Reports Co", 3).await;
    let id = s.order(2).await;
    s.action(&id, "confirm").await;
    s.action(&id, "fulfill").await;

    let valuation = s
        .app
        .get("/api/v1/reports/inventory-valuation", &s.session.token)
        .await;
    assert_eq!(valuation.status, StatusCode::OK, "{}", valuation.body);
    assert_eq!(valuation.data()["total_units"], 1);
    assert_eq!(decimal(&valuation.data()["total_value"]), 5.0);

    let low = s.app.get("/api/v1/reports/low-stock", &s.session.token).await;
    assert_eq!(low.status, StatusCode::OK);
    let entries = low.data().as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["sku"], "ORD-SKU");
    assert_eq!(entries[0]["available"], 1);

    let movements = s
        .app
        .get("/api/v1/reports/stock-movements", &s.session.token)
        .await;
    assert_eq!(movements.status, StatusCode::OK);
    assert_eq!(movements.data()["total_movements"], 2);

    let orders = s.app.get("/api/v1/reports/orders", &s.session.token).await;
    assert_eq!(orders.status, StatusCode::OK);
    assert_eq!(orders.data()["total_orders"], 1);
    assert_eq!(decimal(&orders.data()["fulfilled_revenue"]), 10.0);
}

#[tokio::test]
async fn expiring_report_lists_lots_inside_the_window() {
    let s = shop("Expiry Co", 0).await;
    let soon = (chrono::Utc::now() + chrono::Duration::days(5))
        .date_naive()
        .to_string();
    let later = (chrono::Utc::now() + chrono::Duration::days(200))
        .date_naive()
        .to_string();

    for (lot, expiry) in [("SOON", soon), ("LATER", later)] {
        let response = s
            .app
            .post(
                "/api/v1/stock-movements",
                json!({
                    "movement_type": "inbound",
                    "product_id": s.product,
                    "to_warehouse_id": s.warehouse,
                    "quantity": 2,
                    "lot_number": lot,
                    "expiry_date": expiry,
                }),
                &s.session.token,
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
    }

    let report = s
        .app
        .get("/api/v1/reports/expiring?days=30", &s.session.token)
        .await;
    assert_eq!(report.status, StatusCode::OK, "{}", report.body);
    let lots = report.data().as_array().unwrap();
    assert_eq!(lots.len(), 1);
    assert_eq!(lots[0]["lot_number"], "SOON");
}

#[tokio::test]
async fn report_range_must_be_ordered() {
    let s = shop("Range Co", 0).await;
    let response = s
        .app
        .get(
            "/api/v1/reports/orders?from=2024-02-01T00:00:00Z&to=2024-01-01T00:00:00Z",
            &s.session.token,
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

impl Shop {
    async fn receive_lot(&self, lot: &str, expiry: &str, quantity: i32) {
        let response = self
            .app
            .post(
                "/api/v1/stock-movements",
                json!({
                    "movement_type": "inbound",
                    "product_id": self.product,
                    "to_warehouse_id": self.warehouse,
                    "quantity": quantity,
                    "lot_number": lot,
                    "expiry_date": expiry,
                }),
                &self.session.token,
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
    }

    /// (lot, quantity, reserved) for every stock row of the product.
    async fn lots(&self) -> Vec<(String, i64, i64)> {
        let rows = self
            .app
            .get(
                &format!("/api/v1/inventory?product_id={}", self.product),
                &self.session.token,
            )
            .await;
        let mut lots: Vec<(String, i64, i64)> = rows.data()["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|row| {
                (
                    row["lot_number"].as_str().unwrap_or_default().to_string(),
                    row["quantity"].as_i64().unwrap(),
                    row["reserved_quantity"].as_i64().unwrap(),
                )
            })
            .collect();
        lots.sort();
        lots
    }
}

#[tokio::test]
async fn repeated_lines_for_a_product_are_reserved_together() {
    let s = shop("Repeat Co", 6).await;
    let created = s
        .app
        .post(
            "/api/v1/orders",
            json!({
                "customer_name": "Jane Buyer",
                "warehouse_id": s.warehouse,
                "items": [
                    { "product_id": s.product, "quantity": 3 },
                    { "product_id": s.product, "quantity": 4 },
                ],
            }),
            &s.session.token,
        )
        .await;
    assert_eq!(created.status, StatusCode::CREATED, "{}", created.body);

    let short = s.action(&created.id(), "confirm").await;
    assert_eq!(short.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(s.on_hand().await, (6, 0));

    s.app.receive(&s.session, &s.product, &s.warehouse, 1).await;
    let confirmed = s.action(&created.id(), "confirm").await;
    assert_eq!(confirmed.status, StatusCode::OK, "{}", confirmed.body);
    assert_eq!(s.on_hand().await, (7, 7));
}

#[tokio::test]
async fn line_quantities_that_overflow_are_rejected() {
    let s = shop("Huge Co", 10).await;
    let response = s
        .app
        .post(
            "/api/v1/orders",
            json!({
                "customer_name": "Bulk Buyer",
                "warehouse_id": s.warehouse,
                "items": [
                    { "product_id": s.product, "quantity": 2_000_000_000 },
                    { "product_id": s.product, "quantity": 2_000_000_000 },
                ],
            }),
            &s.session.token,
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let listed = s.app.get("/api/v1/orders", &s.session.token).await;
    assert_eq!(listed.data()["total"], 0);
}

#[tokio::test]
async fn orders_ship_and_release_the_lots_they_reserved() {
    let s = shop("Lots Order Co", 0).await;
    s.receive_lot("A", "2030-01-31", 5).await;
    s.receive_lot("B", "2031-01-31", 5).await;

    let first = s.order(5).await;
    let second = s.order(5).await;
    assert_eq!(s.action(&first, "confirm").await.status, StatusCode::OK);
    assert_eq!(s.action(&second, "confirm").await.status, StatusCode::OK);
    assert_eq!(
        s.lots().await,
        vec![("A".to_string(), 5, 5), ("B".to_string(), 5, 5)]
    );

    let fulfilled = s.action(&second, "fulfill").await;
    assert_eq!(fulfilled.status, StatusCode::OK, "{}", fulfilled.body);
    let ledger = s
        .app
        .get("/api/v1/stock-movements?movement_type=outbound", &s.session.token)
        .await;
    assert_eq!(ledger.data()["total"], 1);
    assert_eq!(ledger.data()["items"][0]["lot_number"], "B");
    assert_eq!(
        s.lots().await,
        vec![("A".to_string(), 5, 5), ("B".to_string(), 0, 0)]
    );

    let cancelled = s.action(&first, "cancel").await;
    assert_eq!(cancelled.status, StatusCode::OK, "{}", cancelled.body);
    assert_eq!(
        s.lots().await,
        vec![("A".to_string(), 5, 0), ("B".to_string(), 0, 0)]
    );
}

#[tokio::test]
async fn manual_release_leaves_order_holds_alone() {
    let s = shop("Hold Co", 10).await;
    let id = s.order(4).await;
    assert_eq!(s.action(&id, "confirm").await.status, StatusCode::OK);

    let item_id = s
        .app
        .stock_row(&s.session, &s.product, &s.warehouse)
        .await
        .unwrap()["id"]
        .as_str()
        .unwrap()
        .to_string();
    let hold = s
        .app
        .post(
            &format!("/api/v1/inventory/{}/reserve", item_id),
            json!({ "quantity": 2 }),
            &s.session.token,
        )
        .await;
    assert_eq!(hold.status, StatusCode::OK, "{}", hold.body);
    assert_eq!(s.on_hand().await, (10, 6));

    let release = |quantity: i32| {
        let path = format!("/api/v1/inventory/{}/release", item_id);
        let app = &s.app;
        let token = &s.session.token;
        async move { app.post(&path, json!({ "quantity": quantity }), token).await }
    };
    assert_eq!(release(3).await.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(release(2).await.status, StatusCode::OK);
    assert_eq!(s.on_hand().await, (10, 4));

    let fulfilled = s.action(&id, "fulfill").await;
    assert_eq!(fulfilled.status, StatusCode::OK, "{}", fulfilled.body);
    assert_eq!(s.on_hand().await, (6, 0));
}
