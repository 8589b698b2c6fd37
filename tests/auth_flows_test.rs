//! Sign-up and every sign-in flow through the HTTP surface.

mod common;

use axum::http::{Method, StatusCode};
use common::{unique_email, TestApp, PASSWORD};
use serde_json::json;
use stockroom_api::notifications::NotificationKind;

#[tokio::test]
async fn register_returns_company_admin_and_tokens() {
    let app = TestApp::new().await;
    let email = unique_email("owner");
    let session = app.register("Acme Supplies", &email).await;

    let me = app.get("/auth/me", &session.token).await;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.data()["email"], email.as_str());
    assert_eq!(me.data()["role"], "admin");
    assert!(me.data().get("password_hash").is_none());

    let company = app.get("/api/v1/company", &session.token).await;
    assert_eq!(company.status, StatusCode::OK);
    assert_eq!(company.data()["id"], session.company_id.as_str());
}

#[tokio::test]
async fn register_rejects_duplicate_email_and_weak_password() {
    let app = TestApp::new().await;
    let email = unique_email("owner");
    app.register("First Co", &email).await;

    let duplicate = app
        .request(
            Method::POST,
            "/auth/register",
            Some(json!({
                "company_name": "Second Co",
                "name": "Someone",
                "email": email,
                "password": PASSWORD,
            })),
            None,
        )
        .await;
    assert_eq!(duplicate.status, StatusCode::CONFLICT);

    let weak = app
        .request(
            Method::POST,
            "/auth/register",
            Some(json!({
                "company_name": "Third Co",
                "name": "Someone",
                "email": unique_email("weak"),
                "password": "short",
            })),
            None,
        )
        .await;
    assert_eq!(weak.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn register_with_missing_field_is_a_bad_request() {
    let app = TestApp::new().await;
    let response = app
        .request(
            Method::POST,
            "/auth/register",
            Some(json!({ "company_name": "No Email Co", "name": "X", "password": PASSWORD })),
            None,
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["error"], "Bad Request");
}

#[tokio::test]
async fn login_with_wrong_password_is_unauthorized() {
    let app = TestApp::new().await;
    let email = unique_email("owner");
    app.register("Login Co", &email).await;

    let ok = app.login(&email, PASSWORD).await;
    assert_eq!(ok.status, StatusCode::OK);
    assert_eq!(ok.data()["token_type"], "Bearer");

    let bad = app.login(&email, "Wrong-Password-1").await;
    assert_eq!(bad.status, StatusCode::UNAUTHORIZED);

    let unknown = app.login(&unique_email("ghost"), PASSWORD).await;
    assert_eq!(unknown.status, StatusCode::UNAUTHORIZED);
    assert_eq!(bad.body["message"], unknown.body["message"]);
}

#[tokio::test]
async fn refresh_rotates_and_rejects_reuse() {
    let app = TestApp::new().await;
    let session = app.register("Refresh Co", &unique_email("owner")).await;

    let refreshed = app
        .request(
            Method::POST,
            "/auth/refresh",
            Some(json!({ "refresh_token": session.refresh_token })),
            None,
        )
        .await;
    assert_eq!(refreshed.status, StatusCode::OK);
    assert_ne!(refreshed.data()["refresh_token"], session.refresh_token.as_str());

    let reused = app
        .request(
            Method::POST,
            "/auth/refresh",
            Some(json!({ "refresh_token": session.refresh_token })),
            None,
        )
        .await;
    assert_eq!(reused.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_invalidates_the_access_token() {
    let app = TestApp::new().await;
    let session = app.register("Logout Co", &unique_email("owner")).await;

    let out = app
        .request(Method::POST, "/auth/logout", None, Some(&session.token))
        .await;
    assert_eq!(out.status, StatusCode::OK);

    let me = app.get("/auth/me", &session.token).await;
    assert_eq!(me.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn otp_code_signs_in_once() {
    let app = TestApp::new().await;
    let email = unique_email("otp");
    app.register("Otp Co", &email).await;

    let requested = app
        .request(
            Method::POST,
            "/auth/otp/request",
            Some(json!({ "email": email })),
            None,
        )
        .await;
    assert_eq!(requested.status, StatusCode::ACCEPTED);

    let code = app.last_secret(&email, NotificationKind::OtpCode).await;
    assert_eq!(code.len(), 6);

    let verify = || {
        app.request(
            Method::POST,
            "/auth/otp/verify",
            Some(json!({ "email": email, "code": code })),
            None,
        )
    };
    let first = verify().await;
    assert_eq!(first.status, StatusCode::OK, "{}", first.body);
    assert!(first.data()["access_token"].is_string());

    let second = verify().await;
    assert_eq!(second.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn otp_request_for_unknown_email_is_accepted_silently() {
    let app = TestApp::new().await;
    let email = unique_email("nobody");

    let response = app
        .request(
            Method::POST,
            "/auth/otp/request",
            Some(json!({ "email": email })),
            None,
        )
        .await;
    assert_eq!(response.status, StatusCode::ACCEPTED);
    assert!(app.notifier.sent().await.is_empty());
}

#[tokio::test]
async fn wrong_otp_guesses_burn_the_code() {
    let app = TestApp::with_config(|cfg| {
        cfg.otp_max_attempts = 2;
        cfg.login_max_attempts = 50;
    })
    .await;
    let email = unique_email("otp");
    app.register("Burn Co", &email).await;

    app.request(
        Method::POST,
        "/auth/otp/request",
        Some(json!({ "email": email })),
        None,
    )
    .await;
    let code = app.last_secret(&email, NotificationKind::OtpCode).await;
    let wrong = if code == "000000" { "111111" } else { "000000" };

    for _ in 0..2 {
        let response = app
            .request(
                Method::POST,
                "/auth/otp/verify",
                Some(json!({ "email": email, "code": wrong })),
                None,
            )
            .await;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    }

    let late = app
        .request(
            Method::POST,
            "/auth/otp/verify",
            Some(json!({ "email": email, "code": code })),
            None,
        )
        .await;
    assert_eq!(late.status, StatusCode::UNAUTHORIZED);
}

fn token_from_link(link: &str) -> String {
    let url = url::Url::parse(link).expect("magic link is a url");
    url.query_pairs()
        .find(|(k, _)| k == "token")
        .map(|(_, v)| v.into_owned())
        .expect("magic link carries a token")
}

#[tokio::test]
async fn magic_link_is_single_use() {
    let app = TestApp::new().await;
    let email = unique_email("link");
    app.register("Link Co", &email).await;

    let requested = app
        .request(
            Method::POST,
            "/auth/magic-link/request",
            Some(json!({ "email": email })),
            None,
        )
        .await;
    assert_eq!(requested.status, StatusCode::ACCEPTED);

    let link = app.last_secret(&email, NotificationKind::MagicLink).await;
    assert!(link.starts_with("http://localhost:3000/auth/magic-link?token="));
    let token = token_from_link(&link);

    let first = app
        .request(
            Method::POST,
            "/auth/magic-link/verify",
            Some(json!({ "token": token })),
            None,
        )
        .await;
    assert_eq!(first.status, StatusCode::OK, "{}", first.body);

    let again = app
        .request(
            Method::GET,
            &format!("/auth/magic-link?token={}", token),
            None,
            None,
        )
        .await;
    assert_eq!(again.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn following_a_magic_link_signs_in() {
    let app = TestApp::new().await;
    let email = unique_email("link");
    app.register("Follow Co", &email).await;

    app.request(
        Method::POST,
        "/auth/magic-link/request",
        Some(json!({ "email": email })),
        None,
    )
    .await;
    let token = token_from_link(&app.last_secret(&email, NotificationKind::MagicLink).await);

    let followed = app
        .request(
            Method::GET,
            &format!("/auth/magic-link?token={}", token),
            None,
            None,
        )
        .await;
    assert_eq!(followed.status, StatusCode::OK, "{}", followed.body);
    assert!(followed.data()["access_token"].is_string());
}

#[tokio::test]
async fn password_reset_token_works_once_and_ends_sessions() {
    let app = TestApp::new().await;
    let email = unique_email("reset");
    let session = app.register("Reset Co", &email).await;

    let forgot = app
        .request(
            Method::POST,
            "/auth/password/forgot",
            Some(json!({ "email": email })),
            None,
        )
        .await;
    assert_eq!(forgot.status, StatusCode::ACCEPTED);
    let token = app.last_secret(&email, NotificationKind::PasswordReset).await;

    let reset = |password: &'static str| {
        app.request(
            Method::POST,
            "/auth/password/reset",
            Some(json!({ "token": token, "new_password": password })),
            None,
        )
    };
    let first = reset("Fresh-Start-2024").await;
    assert_eq!(first.status, StatusCode::OK, "{}", first.body);

    let second = reset("Another-Try-2025").await;
    assert_eq!(second.status, StatusCode::BAD_REQUEST);

    assert_eq!(app.login(&email, PASSWORD).await.status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.login(&email, "Fresh-Start-2024").await.status, StatusCode::OK);

    let refresh = app
        .request(
            Method::POST,
            "/auth/refresh",
            Some(json!({ "refresh_token": session.refresh_token })),
            None,
        )
        .await;
    assert_eq!(refresh.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn change_password_requires_the_current_one() {
    let app = TestApp::new().await;
    let email = unique_email("change");
    let session = app.register("Change Co", &email).await;

    let wrong = app
        .post(
            "/auth/password/change",
            json!({ "current_password": "Not-The-One-1", "new_password": "Brand-New-Pass-9" }),
            &session.token,
        )
        .await;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);

    let ok = app
        .post(
            "/auth/password/change",
            json!({ "current_password": PASSWORD, "new_password": "Brand-New-Pass-9" }),
            &session.token,
        )
        .await;
    assert_eq!(ok.status, StatusCode::OK, "{}", ok.body);
    assert_eq!(app.login(&email, "Brand-New-Pass-9").await.status, StatusCode::OK);
}

#[tokio::test]
async fn oauth_lists_no_providers_when_disabled() {
    let app = TestApp::new().await;
    let providers = app
        .request(Method::GET, "/auth/oauth2/providers", None, None)
        .await;
    assert_eq!(providers.status, StatusCode::OK);
    assert_eq!(providers.data()["providers"], json!([]));

    let unknown = app
        .request(Method::GET, "/auth/oauth2/myspace/authorize", None, None)
        .await;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn oauth_callback_with_unknown_state_is_rejected() {
    let app = TestApp::new().await;
    let response = app
        .request(
            Method::GET,
            "/auth/oauth2/google/callback?code=abc&state=never-issued",
            None,
            None,
        )
        .await;
    assert!(
        response.status == StatusCode::BAD_REQUEST
            || response.status == StatusCode::UNAUTHORIZED
            || response.status == StatusCode::NOT_FOUND,
        "unexpected status {}",
        response.status
    );
}

#[tokio::test]
async fn concurrent_wrong_otp_guesses_all_count() {
    let app = TestApp::with_config(|cfg| {
        cfg.otp_max_attempts = 3;
        cfg.login_max_attempts = 50;
    })
    .await;
    let email = unique_email("otp");
    app.register("Race Co", &email).await;

    app.request(
        Method::POST,
        "/auth/otp/request",
        Some(json!({ "email": email })),
        None,
    )
    .await;
    let code = app.last_secret(&email, NotificationKind::OtpCode).await;
    let wrong = if code == "000000" { "111111" } else { "000000" };

    let guess = |ip: &'static str| {
        app.request_from(
            ip,
            Method::POST,
            "/auth/otp/verify",
            Some(json!({ "email": email, "code": wrong })),
            None,
        )
    };
    let (a, b, c) = tokio::join!(guess("10.9.0.1"), guess("10.9.0.2"), guess("10.9.0.3"));
    for response in [a, b, c] {
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    }

    let late = app
        .request_from(
            "10.9.0.4",
            Method::POST,
            "/auth/otp/verify",
            Some(json!({ "email": email, "code": code })),
            None,
        )
        .await;
    assert_eq!(late.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn one_time_secrets_expire() {
    let app = TestApp::with_config(|cfg| {
        cfg.otp_ttl_secs = 0;
        cfg.magic_link_ttl_secs = 0;
        cfg.password_reset_ttl_secs = 0;
    })
    .await;
    let email = unique_email("expiry");
    app.register("Expiry Co", &email).await;

    for uri in ["/auth/otp/request", "/auth/magic-link/request", "/auth/password/forgot"] {
        let response = app
            .request(Method::POST, uri, Some(json!({ "email": email })), None)
            .await;
        assert_eq!(response.status, StatusCode::ACCEPTED, "{}", uri);
    }
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let code = app.last_secret(&email, NotificationKind::OtpCode).await;
    let otp = app
        .request(
            Method::POST,
            "/auth/otp/verify",
            Some(json!({ "email": email, "code": code })),
            None,
        )
        .await;
    assert_eq!(otp.status, StatusCode::UNAUTHORIZED);

    let token = token_from_link(&app.last_secret(&email, NotificationKind::MagicLink).await);
    let link = app
        .request(
            Method::POST,
            "/auth/magic-link/verify",
            Some(json!({ "token": token })),
            None,
        )
        .await;
    assert_eq!(link.status, StatusCode::UNAUTHORIZED);

    let reset_token = app.last_secret(&email, NotificationKind::PasswordReset).await;
    let reset = app
        .request(
            Method::POST,
            "/auth/password/reset",
            Some(json!({ "token": reset_token, "new_password": "Fresh-Start-2024" })),
            None,
        )
        .await;
    assert_eq!(reset.status, StatusCode::BAD_REQUEST);
    assert_eq!(app.login(&email, PASSWORD).await.status, StatusCode::OK);
}
