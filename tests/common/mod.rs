#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{HeaderMap, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use stockroom_api::{
    config::AppConfig,
    db,
    events::{self, EventSender},
    notifications::{InMemoryNotifier, NotificationKind},
    AppState,
};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

pub const PASSWORD: &str = "Warehouse-42-Keys";
const JWT_SECRET: &str = "k7Q2vN9xR4tB8mW1zL6pH3sJ0fD5gY9aC2eU7iO4nV8bX1qT6rM3wK5jG0hF9dS2";

/// Application backed by a throwaway SQLite file, driven through the router.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub notifier: InMemoryNotifier,
    _db_dir: TempDir,
    _event_task: tokio::task::JoinHandle<u64>,
}

/// Status, headers and JSON body of one response.
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    /// The `data` member of the success envelope.
    pub fn data(&self) -> &Value {
        &self.body["data"]
    }

    pub fn id(&self) -> String {
        self.data()["id"]
            .as_str()
            .unwrap_or_else(|| panic!("response has no id: {}", self.body))
            .to_string()
    }
}

/// A signed-in user of one company.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub refresh_token: String,
    pub user_id: String,
    pub company_id: String,
    pub email: String,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Builds the app after letting the caller adjust the configuration.
    pub async fn with_config(configure: impl FnOnce(&mut AppConfig)) -> Self {
        let db_dir = tempfile::tempdir().expect("temp dir");
        let db_path = db_dir.path().join("stockroom.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            JWT_SECRET.to_string(),
            3600,
            86_400,
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 4;
        cfg.db_min_connections = 1;
        cfg.magic_link_base_url = Some("http://localhost:3000/auth/magic-link".to_string());
        configure(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to open test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_sender, event_rx) = EventSender::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let notifier = InMemoryNotifier::new();
        let state = AppState::new(
            Arc::new(pool),
            cfg,
            event_sender,
            Arc::new(notifier.clone()),
        );
        let router = stockroom_api::build_router(state.clone());

        Self {
            router,
            state,
            notifier,
            _db_dir: db_dir,
            _event_task: event_task,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> TestResponse {
        self.request_with_headers(method, uri, body, token, &[]).await
    }

    /// Same as [`request`](Self::request) but as seen from `ip`.
    pub async fn request_from(
        &self,
        ip: &str,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> TestResponse {
        self.request_with_headers(method, uri, body, token, &[("x-forwarded-for", ip)])
            .await
    }

    pub async fn request_with_headers(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).expect("serialize request body"))
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).expect("build request"))
            .await
            .expect("router error during test request");

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body bytes");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };

        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str, token: &str) -> TestResponse {
        self.request(Method::GET, uri, None, Some(token)).await
    }

    pub async fn post(&self, uri: &str, body: Value, token: &str) -> TestResponse {
        self.request(Method::POST, uri, Some(body), Some(token)).await
    }

    pub async fn put(&self, uri: &str, body: Value, token: &str) -> TestResponse {
        self.request(Method::PUT, uri, Some(body), Some(token)).await
    }

    pub async fn delete(&self, uri: &str, token: &str) -> TestResponse {
        self.request(Method::DELETE, uri, None, Some(token)).await
    }

    /// Registers a new company and returns its admin's session.
    pub async fn register(&self, company: &str, email: &str) -> Session {
        let response = self
            .request(
                Method::POST,
                "/auth/register",
                Some(json!({
                    "company_name": company,
                    "name": "Owner",
                    "email": email,
                    "password": PASSWORD,
                })),
                None,
            )
            .await;
        assert_eq!(
            response.status,
            StatusCode::CREATED,
            "register failed: {}",
            response.body
        );

        let data = response.data();
        Session {
            token: data["tokens"]["access_token"].as_str().unwrap().to_string(),
            refresh_token: data["tokens"]["refresh_token"].as_str().unwrap().to_string(),
            user_id: data["user"]["id"].as_str().unwrap().to_string(),
            company_id: data["company"]["id"].as_str().unwrap().to_string(),
            email: email.to_string(),
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> TestResponse {
        self.request(
            Method::POST,
            "/auth/login",
            Some(json!({ "email": email, "password": password })),
            None,
        )
        .await
    }

    /// Adds a user with `role` to the admin's company and signs them in.
    pub async fn add_user(&self, admin: &Session, role: &str, email: &str) -> Session {
        let created = self
            .post(
                "/api/v1/users",
                json!({ "name": role, "email": email, "role": role, "password": PASSWORD }),
                &admin.token,
            )
            .await;
        assert_eq!(created.status, StatusCode::CREATED, "{}", created.body);

        let login = self.login(email, PASSWORD).await;
        assert_eq!(login.status, StatusCode::OK, "{}", login.body);
        Session {
            token: login.data()["access_token"].as_str().unwrap().to_string(),
            refresh_token: login.data()["refresh_token"].as_str().unwrap().to_string(),
            user_id: created.id(),
            company_id: admin.company_id.clone(),
            email: email.to_string(),
        }
    }

    pub async fn create_warehouse(&self, session: &Session, code: &str) -> String {
        let response = self
            .post(
                "/api/v1/warehouses",
                json!({ "name": format!("Warehouse {}", code), "code": code }),
                &session.token,
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
        response.id()
    }

    pub async fn create_product(&self, session: &Session, sku: &str, price: &str) -> String {
        let response = self
            .post(
                "/api/v1/products",
                json!({
                    "sku": sku,
                    "name": format!("Product {}", sku),
                    "price": price,
                    "cost_price": price,
                    "reorder_point": 5,
                }),
                &session.token,
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
        response.id()
    }

    /// Records an inbound movement into `warehouse_id`.
    pub async fn receive(
        &self,
        session: &Session,
        product_id: &str,
        warehouse_id: &str,
        quantity: i32,
    ) -> TestResponse {
        self.post(
            "/api/v1/stock-movements",
            json!({
                "movement_type": "inbound",
                "product_id": product_id,
                "to_warehouse_id": warehouse_id,
                "quantity": quantity,
            }),
            &session.token,
        )
        .await
    }

    /// Stock row of a product in a warehouse, if any.
    pub async fn stock_row(&self, session: &Session, product_id: &str, warehouse_id: &str) -> Option<Value> {
        let response = self
            .get(
                &format!(
                    "/api/v1/inventory?product_id={}&warehouse_id={}",
                    product_id, warehouse_id
                ),
                &session.token,
            )
            .await;
        assert_eq!(response.status, StatusCode::OK, "{}", response.body);
        response.data()["items"]
            .as_array()
            .and_then(|items| items.first().cloned())
    }

    /// Latest secret sent to `email` for `kind`.
    pub async fn last_secret(&self, email: &str, kind: NotificationKind) -> String {
        self.notifier
            .last_for(email, kind)
            .await
            .unwrap_or_else(|| panic!("no {:?} sent to {}", kind, email))
            .secret
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub fn unique_email(prefix: &str) -> String {
    format!("{}-{}@example.com", prefix, Uuid::new_v4().simple())
}
