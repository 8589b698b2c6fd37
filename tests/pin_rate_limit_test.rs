//! PIN setup, verification and the per-IP failure limiter.

mod common;

use axum::http::{header, Method, StatusCode};
use common::{unique_email, Session, TestApp, PASSWORD};
use serde_json::json;

async fn with_pin(app: &TestApp, company: &str) -> Session {
    let session = app.register(company, &unique_email("pin")).await;
    let set = app
        .put("/auth/pin", json!({ "pin": "4321" }), &session.token)
        .await;
    assert_eq!(set.status, StatusCode::OK, "{}", set.body);
    session
}

async fn verify_pin(app: &TestApp, session: &Session, ip: &str, pin: &str) -> common::TestResponse {
    app.request_from(
        ip,
        Method::POST,
        "/auth/pin/verify",
        Some(json!({ "pin": pin })),
        Some(&session.token),
    )
    .await
}

#[tokio::test]
async fn pin_must_be_digits_of_valid_length() {
    let app = TestApp::new().await;
    let session = app.register("Pin Format Co", &unique_email("pin")).await;

    for pin in ["12", "123456789", "12a4"] {
        let response = app
            .put("/auth/pin", json!({ "pin": pin }), &session.token)
            .await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST, "pin {}", pin);
    }
}

#[tokio::test]
async fn replacing_a_pin_requires_the_password() {
    let app = TestApp::new().await;
    let session = with_pin(&app, "Pin Replace Co").await;

    let without = app
        .put("/auth/pin", json!({ "pin": "9999" }), &session.token)
        .await;
    assert_eq!(without.status, StatusCode::BAD_REQUEST);

    let with = app
        .put(
            "/auth/pin",
            json!({ "pin": "9999", "current_password": PASSWORD }),
            &session.token,
        )
        .await;
    assert_eq!(with.status, StatusCode::OK);
    assert_eq!(
        verify_pin(&app, &session, "10.0.0.1", "9999").await.status,
        StatusCode::OK
    );
}

#[tokio::test]
async fn verify_without_a_pin_is_a_bad_request() {
    let app = TestApp::new().await;
    let session = app.register("No Pin Co", &unique_email("pin")).await;
    let response = verify_pin(&app, &session, "10.0.0.1", "1234").await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn correct_pin_returns_a_token() {
    let app = TestApp::new().await;
    let session = with_pin(&app, "Pin Ok Co").await;

    let response = verify_pin(&app, &session, "10.0.0.1", "4321").await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.body);
    assert!(response.data()["access_token"].is_string());
}

#[tokio::test]
async fn repeated_failures_lock_the_ip_with_retry_after() {
    let app = TestApp::with_config(|cfg| {
        cfg.pin_max_attempts = 3;
        cfg.pin_lockout_secs = 120;
    })
    .await;
    let session = with_pin(&app, "Pin Lock Co").await;

    for _ in 0..2 {
        let response = verify_pin(&app, &session, "203.0.113.7", "0000").await;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    }

    let third = verify_pin(&app, &session, "203.0.113.7", "0000").await;
    assert_eq!(third.status, StatusCode::TOO_MANY_REQUESTS);

    let locked = verify_pin(&app, &session, "203.0.113.7", "4321").await;
    assert_eq!(locked.status, StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = locked
        .headers
        .get(header::RETRY_AFTER)
        .expect("Retry-After header")
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0 && retry_after <= 120);
}

#[tokio::test]
async fn lockout_is_scoped_to_the_client_ip() {
    let app = TestApp::with_config(|cfg| cfg.pin_max_attempts = 2).await;
    let session = with_pin(&app, "Pin Scope Co").await;

    for _ in 0..2 {
        verify_pin(&app, &session, "198.51.100.1", "0000").await;
    }
    assert_eq!(
        verify_pin(&app, &session, "198.51.100.1", "4321").await.status,
        StatusCode::TOO_MANY_REQUESTS
    );

    let other = verify_pin(&app, &session, "198.51.100.2", "4321").await;
    assert_eq!(other.status, StatusCode::OK);
}

#[tokio::test]
async fn success_clears_earlier_failures() {
    let app = TestApp::with_config(|cfg| cfg.pin_max_attempts = 3).await;
    let session = with_pin(&app, "Pin Reset Co").await;
    let ip = "192.0.2.10";

    for _ in 0..2 {
        verify_pin(&app, &session, ip, "0000").await;
    }
    assert_eq!(verify_pin(&app, &session, ip, "4321").await.status, StatusCode::OK);

    for _ in 0..2 {
        let response = verify_pin(&app, &session, ip, "0000").await;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn stock_changes_need_a_pin_token_when_required() {
    let app = TestApp::with_config(|cfg| cfg.pin_required_for_stock_changes = true).await;
    let session = with_pin(&app, "Pin Gate Co").await;
    let warehouse = app.create_warehouse(&session, "MAIN").await;
    let product = app.create_product(&session, "GATE-1", "3.00").await;

    let plain = app.receive(&session, &product, &warehouse, 5).await;
    assert_eq!(plain.status, StatusCode::FORBIDDEN);

    let pin_token = verify_pin(&app, &session, "10.1.1.1", "4321").await.data()["access_token"]
        .as_str()
        .unwrap()
        .to_string();
    let pinned = Session {
        token: pin_token,
        ..session.clone()
    };
    let received = app.receive(&pinned, &product, &warehouse, 5).await;
    assert_eq!(received.status, StatusCode::CREATED, "{}", received.body);

    let listed = app
        .request(Method::GET, "/api/v1/stock-movements", None, Some(&session.token))
        .await;
    assert_eq!(listed.status, StatusCode::OK);
}
