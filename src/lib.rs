//! Stockroom API library
//!
//! Multi-tenant inventory backend: accounts and sign-in flows, the product
//! catalogue, warehouses and suppliers, the stock movement ledger, orders and
//! reports, served over axum.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod metrics;
pub mod middleware_helpers;
pub mod migrator;
pub mod notifications;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    routing::{delete, get, post, put},
    Extension, Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    timeout::TimeoutLayer,
};
use utoipa::ToSchema;

use crate::auth::consts as perm;
use crate::auth::{AuthConfig, AuthRateLimiter, AuthRouterExt, AuthService, OAuth2Service};
use crate::config::AppConfig;
use crate::events::EventSender;
use crate::handlers::AppServices;
use crate::notifications::Notifier;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub event_sender: EventSender,
    pub auth: Arc<AuthService>,
    pub rate_limiter: Arc<AuthRateLimiter>,
    pub oauth: Arc<OAuth2Service>,
    pub services: AppServices,
}

impl AppState {
    /// Wires the auth components and every service from one configuration.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: AppConfig,
        event_sender: EventSender,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let auth = Arc::new(AuthService::new(AuthConfig::from(&config), db.clone()));
        let rate_limiter = Arc::new(AuthRateLimiter::new(config.auth_rate_limit_config()));
        let oauth = Arc::new(OAuth2Service::new(config.build_oauth2_config()));
        let services = AppServices::new(
            db.clone(),
            &config,
            auth.clone(),
            rate_limiter.clone(),
            oauth.clone(),
            notifier,
            event_sender.clone(),
        );

        Self {
            db,
            config: Arc::new(config),
            event_sender,
            auth,
            rate_limiter,
            oauth,
            services,
        }
    }
}

/// Success envelope shared by every JSON endpoint
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: None,
            message: Some(message.into()),
            meta: Some(ResponseMeta::capture()),
        }
    }
}

/// One page of a list endpoint
#[derive(Debug, Serialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
}

impl<T> From<services::Page<T>> for PaginatedResponse<T> {
    fn from(page: services::Page<T>) -> Self {
        let total_pages = page.total_pages();
        Self {
            items: page.items,
            total: page.total,
            page: page.page,
            per_page: page.per_page,
            total_pages,
        }
    }
}

/// Business routes under `/api/v1`, each group behind its permission.
pub fn api_v1_routes() -> Router<AppState> {
    let company_read = Router::new()
        .route("/company", get(handlers::companies::get_company))
        .with_permission(perm::COMPANY_READ);
    let company_update = Router::new()
        .route("/company", put(handlers::companies::update_company))
        .with_permission(perm::COMPANY_UPDATE);

    let users_read = Router::new()
        .route("/users", get(handlers::users::list_users))
        .route("/users/:id", get(handlers::users::get_user))
        .with_permission(perm::USERS_READ);
    let users_create = Router::new()
        .route("/users", post(handlers::users::create_user))
        .with_permission(perm::USERS_CREATE);
    let users_update = Router::new()
        .route("/users/:id", put(handlers::users::update_user))
        .with_permission(perm::USERS_UPDATE);
    let users_delete = Router::new()
        .route("/users/:id", delete(handlers::users::delete_user))
        .with_permission(perm::USERS_DELETE);

    let suppliers_read = Router::new()
        .route("/suppliers", get(handlers::suppliers::list_suppliers))
        .route("/suppliers/:id", get(handlers::suppliers::get_supplier))
        .with_permission(perm::SUPPLIERS_READ);
    let suppliers_create = Router::new()
        .route("/suppliers", post(handlers::suppliers::create_supplier))
        .with_permission(perm::SUPPLIERS_CREATE);
    let suppliers_update = Router::new()
        .route("/suppliers/:id", put(handlers::suppliers::update_supplier))
        .with_permission(perm::SUPPLIERS_UPDATE);
    let suppliers_delete = Router::new()
        .route("/suppliers/:id", delete(handlers::suppliers::delete_supplier))
        .with_permission(perm::SUPPLIERS_DELETE);

    let warehouses_read = Router::new()
        .route("/warehouses", get(handlers::warehouses::list_warehouses))
        .route("/warehouses/:id", get(handlers::warehouses::get_warehouse))
        .with_permission(perm::WAREHOUSES_READ);
    let warehouses_create = Router::new()
        .route("/warehouses", post(handlers::warehouses::create_warehouse))
        .with_permission(perm::WAREHOUSES_CREATE);
    let warehouses_update = Router::new()
        .route("/warehouses/:id", put(handlers::warehouses::update_warehouse))
        .with_permission(perm::WAREHOUSES_UPDATE);
    let warehouses_delete = Router::new()
        .route("/warehouses/:id", delete(handlers::warehouses::delete_warehouse))
        .with_permission(perm::WAREHOUSES_DELETE);

    let products_read = Router::new()
        .route("/products", get(handlers::products::list_products))
        .route("/products/:id", get(handlers::products::get_product))
        .with_permission(perm::PRODUCTS_READ);
    let products_create = Router::new()
        .route("/products", post(handlers::products::create_product))
        .with_permission(perm::PRODUCTS_CREATE);
    let products_update = Router::new()
        .route("/products/:id", put(handlers::products::update_product))
        .route(
            "/products/:id/suppliers",
            put(handlers::products::replace_product_suppliers),
        )
        .with_permission(perm::PRODUCTS_UPDATE);
    let products_delete = Router::new()
        .route("/products/:id", delete(handlers::products::delete_product))
        .with_permission(perm::PRODUCTS_DELETE);

    let inventory_read = Router::new()
        .route("/inventory", get(handlers::inventory::list_inventory))
        .route("/inventory/:id", get(handlers::inventory::get_inventory_item))
        .with_permission(perm::INVENTORY_READ);
    let inventory_create = Router::new()
        .route("/inventory", post(handlers::inventory::create_inventory_item))
        .with_permission(perm::INVENTORY_CREATE);
    let inventory_update = Router::new()
        .route("/inventory/:id", put(handlers::inventory::update_inventory_item))
        .with_permission(perm::INVENTORY_UPDATE);
    let inventory_delete = Router::new()
        .route("/inventory/:id", delete(handlers::inventory::delete_inventory_item))
        .with_permission(perm::INVENTORY_DELETE);
    let inventory_adjust = Router::new()
        .route("/inventory/:id/adjust", post(handlers::inventory::adjust_inventory))
        .with_pin()
        .with_permission(perm::INVENTORY_ADJUST);
    let inventory_reserve = Router::new()
        .route("/inventory/:id/reserve", post(handlers::inventory::reserve_inventory))
        .route("/inventory/:id/release", post(handlers::inventory::release_inventory))
        .with_permission(perm::INVENTORY_RESERVE);

    let movements_read = Router::new()
        .route(
            "/stock-movements",
            get(handlers::stock_movements::list_stock_movements),
        )
        .route(
            "/stock-movements/:id",
            get(handlers::stock_movements::get_stock_movement),
        )
        .with_permission(perm::INVENTORY_READ);
    // The handler checks adjust or transfer depending on the movement type.
    let movements_create = Router::new()
        .route(
            "/stock-movements",
            post(handlers::stock_movements::create_stock_movement),
        )
        .with_pin()
        .with_auth();

    let orders_read = Router::new()
        .route("/orders", get(handlers::orders::list_orders))
        .route("/orders/:id", get(handlers::orders::get_order))
        .with_permission(perm::ORDERS_READ);
    let orders_create = Router::new()
        .route("/orders", post(handlers::orders::create_order))
        .with_permission(perm::ORDERS_CREATE);
    let orders_update = Router::new()
        .route("/orders/:id", put(handlers::orders::update_order))
        .with_permission(perm::ORDERS_UPDATE);
    let orders_delete = Router::new()
        .route("/orders/:id", delete(handlers::orders::delete_order))
        .with_permission(perm::ORDERS_DELETE);
    let orders_confirm = Router::new()
        .route("/orders/:id/confirm", post(handlers::orders::confirm_order))
        .with_permission(perm::ORDERS_CONFIRM);
    let orders_fulfill = Router::new()
        .route("/orders/:id/fulfill", post(handlers::orders::fulfill_order))
        .with_pin()
        .with_permission(perm::ORDERS_FULFILL);
    let orders_cancel = Router::new()
        .route("/orders/:id/cancel", post(handlers::orders::cancel_order))
        .with_permission(perm::ORDERS_CANCEL);

    let reports = Router::new()
        .route(
            "/reports/inventory-valuation",
            get(handlers::reports::inventory_valuation),
        )
        .route("/reports/low-stock", get(handlers::reports::low_stock))
        .route(
            "/reports/stock-movements",
            get(handlers::reports::stock_movement_report),
        )
        .route("/reports/orders", get(handlers::reports::order_report))
        .route("/reports/expiring", get(handlers::reports::expiring_lots))
        .with_permission(perm::REPORTS_READ);

    Router::new()
        .route("/status", get(handlers::health::api_status))
        .merge(company_read)
        .merge(company_update)
        .merge(users_read)
        .merge(users_create)
        .merge(users_update)
        .merge(users_delete)
        .merge(suppliers_read)
        .merge(suppliers_create)
        .merge(suppliers_update)
        .merge(suppliers_delete)
        .merge(warehouses_read)
        .merge(warehouses_create)
        .merge(warehouses_update)
        .merge(warehouses_delete)
        .merge(products_read)
        .merge(products_create)
        .merge(products_update)
        .merge(products_delete)
        .merge(inventory_read)
        .merge(inventory_create)
        .merge(inventory_update)
        .merge(inventory_delete)
        .merge(inventory_adjust)
        .merge(inventory_reserve)
        .merge(movements_read)
        .merge(movements_create)
        .merge(orders_read)
        .merge(orders_create)
        .merge(orders_update)
        .merge(orders_delete)
        .merge(orders_confirm)
        .merge(orders_fulfill)
        .merge(orders_cancel)
        .merge(reports)
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let restricted = || {
        CorsLayer::new()
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([
                header::AUTHORIZATION,
                header::CONTENT_TYPE,
                HeaderName::from_static(middleware_helpers::REQUEST_ID_HEADER),
            ])
            .max_age(Duration::from_secs(3600))
    };

    match config.cors_allowed_origins.as_deref() {
        Some(raw) if config.has_cors_allowed_origins() => {
            let origins: Vec<HeaderValue> = raw
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .filter_map(|origin| HeaderValue::from_str(origin).ok())
                .collect();
            restricted().allow_origin(AllowOrigin::list(origins))
        }
        _ if config.should_allow_permissive_cors() => CorsLayer::permissive(),
        _ => restricted(),
    }
}

/// The complete application: health, auth, the versioned API and the docs.
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    let auth_service = state.auth.clone();

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::health::metrics))
        .nest("/auth", handlers::auth::auth_router())
        .nest("/api/v1", api_v1_routes())
        .with_state(state)
        .merge(openapi::swagger_ui())
        .layer(Extension(auth_service))
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(cors)
        .layer(crate::tracing::configure_http_tracing())
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[test]
    fn message_response_omits_data() {
        let json = serde_json::to_value(ApiResponse::message("sent")).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["message"], "sent");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn pages_convert_with_total_pages() {
        let page = services::Page {
            items: vec!["a", "b"],
            total: 5,
            page: 1,
            per_page: 2,
        };
        let response = PaginatedResponse::from(page);
        assert_eq!(response.total_pages, 3);
        assert_eq!(response.items.len(), 2);
    }
}
