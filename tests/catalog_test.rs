//! Products, suppliers and warehouses, including tenant isolation.

mod common;

use axum::http::StatusCode;
use common::{unique_email, TestApp};
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn product_crud_round_trip() {
    let app = TestApp::new().await;
    let session = app.register("Crud Co", &unique_email("owner")).await;

    let created = app
        .post(
            "/api/v1/products",
            json!({ "sku": "WID-001", "name": "Widget", "price": "12.50", "category": "widgets" }),
            &session.token,
        )
        .await;
    assert_eq!(created.status, StatusCode::CREATED, "{}", created.body);
    assert_eq!(created.data()["currency"], "USD");
    let id = created.id();

    let updated = app
        .put(
            &format!("/api/v1/products/{}", id),
            json!({ "name": "Widget Pro", "price": "14.00" }),
            &session.token,
        )
        .await;
    assert_eq!(updated.status, StatusCode::OK, "{}", updated.body);
    assert_eq!(updated.data()["name"], "Widget Pro");
    assert_eq!(updated.data()["sku"], "WID-001");

    let fetched = app
        .get(&format!("/api/v1/products/{}", id), &session.token)
        .await;
    assert_eq!(fetched.status, StatusCode::OK);
    assert_eq!(fetched.data()["suppliers"], json!([]));

    let listed = app
        .get("/api/v1/products?search=widget", &session.token)
        .await;
    assert_eq!(listed.status, StatusCode::OK);
    assert_eq!(listed.data()["total"], 1);
    assert_eq!(listed.data()["total_pages"], 1);

    let deleted = app
        .delete(&format!("/api/v1/products/{}", id), &session.token)
        .await;
    assert_eq!(deleted.status, StatusCode::NO_CONTENT);

    let gone = app
        .get(&format!("/api/v1/products/{}", id), &session.token)
        .await;
    assert_eq!(gone.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn product_payload_errors_are_bad_requests() {
    let app = TestApp::new().await;
    let session = app.register("Invalid Co", &unique_email("owner")).await;

    let missing_name = app
        .post("/api/v1/products", json!({ "sku": "X-1", "price": "1.00" }), &session.token)
        .await;
    assert_eq!(missing_name.status, StatusCode::BAD_REQUEST);

    let negative = app
        .post(
            "/api/v1/products",
            json!({ "sku": "X-2", "name": "Negative", "price": "-1.00" }),
            &session.token,
        )
        .await;
    assert_eq!(negative.status, StatusCode::BAD_REQUEST);

    let blank_sku = app
        .post(
            "/api/v1/products",
            json!({ "sku": "", "name": "Blank", "price": "1.00" }),
            &session.token,
        )
        .await;
    assert_eq!(blank_sku.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn duplicate_sku_conflicts_within_a_company_only() {
    let app = TestApp::new().await;
    let first = app.register("Sku One Co", &unique_email("one")).await;
    let second = app.register("Sku Two Co", &unique_email("two")).await;

    app.create_product(&first, "DUP-1", "5.00").await;

    let clash = app
        .post(
            "/api/v1/products",
            json!({ "sku": "DUP-1", "name": "Again", "price": "5.00" }),
            &first.token,
        )
        .await;
    assert_eq!(clash.status, StatusCode::CONFLICT);
    assert!(clash.body["message"]
        .as_str()
        .unwrap()
        .contains("already exists"));

    let other_tenant = app
        .post(
            "/api/v1/products",
            json!({ "sku": "DUP-1", "name": "Theirs", "price": "7.00" }),
            &second.token,
        )
        .await;
    assert_eq!(other_tenant.status, StatusCode::CREATED);
}

#[tokio::test]
async fn other_tenants_records_are_not_found() {
    let app = TestApp::new().await;
    let owner = app.register("Owner Co", &unique_email("owner")).await;
    let intruder = app.register("Intruder Co", &unique_email("intruder")).await;

    let product = app.create_product(&owner, "PRIV-1", "9.99").await;
    let warehouse = app.create_warehouse(&owner, "PRIV").await;

    for uri in [
        format!("/api/v1/products/{}", product),
        format!("/api/v1/warehouses/{}", warehouse),
    ] {
        let response = app.get(&uri, &intruder.token).await;
        assert_eq!(response.status, StatusCode::NOT_FOUND, "{}", uri);
    }

    let update = app
        .put(
            &format!("/api/v1/products/{}", product),
            json!({ "name": "Hijacked" }),
            &intruder.token,
        )
        .await;
    assert_eq!(update.status, StatusCode::NOT_FOUND);

    let delete = app
        .delete(&format!("/api/v1/products/{}", product), &intruder.token)
        .await;
    assert_eq!(delete.status, StatusCode::NOT_FOUND);

    let listed = app.get("/api/v1/products", &intruder.token).await;
    assert_eq!(listed.data()["total"], 0);

    let receive = app.receive(&intruder, &product, &warehouse, 5).await;
    assert_eq!(receive.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_id_is_not_found() {
    let app = TestApp::new().await;
    let session = app.register("Unknown Co", &unique_email("owner")).await;
    let response = app
        .get(&format!("/api/v1/products/{}", Uuid::new_v4()), &session.token)
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.body["error"], "Not Found");
}

#[tokio::test]
async fn product_with_stock_cannot_be_deleted() {
    let app = TestApp::new().await;
    let session = app.register("Stocked Co", &unique_email("owner")).await;
    let warehouse = app.create_warehouse(&session, "A").await;
    let product = app.create_product(&session, "STK-1", "2.00").await;
    assert_eq!(
        app.receive(&session, &product, &warehouse, 3).await.status,
        StatusCode::CREATED
    );

    let response = app
        .delete(&format!("/api/v1/products/{}", product), &session.token)
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);

    let warehouse_delete = app
        .delete(&format!("/api/v1/warehouses/{}", warehouse), &session.token)
        .await;
    assert_eq!(warehouse_delete.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn warehouse_codes_are_unique_per_company() {
    let app = TestApp::new().await;
    let session = app.register("Codes Co", &unique_email("owner")).await;
    app.create_warehouse(&session, "EAST").await;

    let clash = app
        .post(
            "/api/v1/warehouses",
            json!({ "name": "Another East", "code": "EAST" }),
            &session.token,
        )
        .await;
    assert_eq!(clash.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn product_suppliers_are_replaced_as_a_set() {
    let app = TestApp::new().await;
    let session = app.register("Sourcing Co", &unique_email("owner")).await;
    let product = app.create_product(&session, "SRC-1", "4.00").await;

    let mut suppliers = Vec::new();
    for name in ["Bolt Bros", "Acme Parts"] {
        let created = app
            .post(
                "/api/v1/suppliers",
                json!({ "name": name, "email": "sales@example.com" }),
                &session.token,
            )
            .await;
        assert_eq!(created.status, StatusCode::CREATED, "{}", created.body);
        suppliers.push(created.id());
    }

    let replaced = app
        .put(
            &format!("/api/v1/products/{}/suppliers", product),
            json!({ "suppliers": [
                { "supplier_id": suppliers[0], "supplier_sku": "BB-9", "unit_cost": "2.10" },
                { "supplier_id": suppliers[1] },
            ]}),
            &session.token,
        )
        .await;
    assert_eq!(replaced.status, StatusCode::OK, "{}", replaced.body);
    let linked = replaced.data()["suppliers"].as_array().unwrap();
    assert_eq!(linked.len(), 2);
    assert_eq!(linked[0]["supplier_name"], "Acme Parts");

    let duplicated = app
        .put(
            &format!("/api/v1/products/{}/suppliers", product),
            json!({ "suppliers": [
                { "supplier_id": suppliers[0] },
                { "supplier_id": suppliers[0] },
            ]}),
            &session.token,
        )
        .await;
    assert_eq!(duplicated.status, StatusCode::BAD_REQUEST);

    let removed = app
        .delete(&format!("/api/v1/suppliers/{}", suppliers[1]), &session.token)
        .await;
    assert_eq!(removed.status, StatusCode::NO_CONTENT);

    let fetched = app
        .get(&format!("/api/v1/products/{}", product), &session.token)
        .await;
    assert_eq!(fetched.data()["suppliers"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn supplier_email_is_validated() {
    let app = TestApp::new().await;
    let session = app.register("Supplier Co", &unique_email("owner")).await;
    let response = app
        .post(
            "/api/v1/suppliers",
            json!({ "name": "Bad Mail", "email": "not-an-email" }),
            &session.token,
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn pagination_is_clamped() {
    let app = TestApp::new().await;
    let session = app.register("Paging Co", &unique_email("owner")).await;
    for i in 0..3 {
        app.create_product(&session, &format!("PG-{}", i), "1.00").await;
    }

    let page = app
        .get("/api/v1/products?page=2&per_page=2", &session.token)
        .await;
    assert_eq!(page.status, StatusCode::OK);
    assert_eq!(page.data()["items"].as_array().unwrap().len(), 1);
    assert_eq!(page.data()["total"], 3);
    assert_eq!(page.data()["total_pages"], 2);

    let huge = app
        .get("/api/v1/products?per_page=100000", &session.token)
        .await;
    assert_eq!(huge.data()["per_page"], 100);
}
