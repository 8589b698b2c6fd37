pub mod auth;
pub mod common;
pub mod companies;
pub mod health;
pub mod inventory;
pub mod orders;
pub mod products;
pub mod reports;
pub mod stock_movements;
pub mod suppliers;
pub mod users;
pub mod warehouses;

use crate::{
    auth::{password::PasswordPolicy, AuthRateLimiter, AuthService, OAuth2Service},
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    notifications::Notifier,
    services::{
        accounts::{AccountService, AccountSettings},
        companies::CompanyService,
        inventory::InventoryService,
        orders::OrderService,
        products::ProductService,
        reports::ReportService,
        stock_movements::StockMovementService,
        suppliers::SupplierService,
        users::UserService,
        warehouses::WarehouseService,
    },
};
use std::sync::Arc;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub accounts: Arc<AccountService>,
    pub companies: Arc<CompanyService>,
    pub users: Arc<UserService>,
    pub suppliers: Arc<SupplierService>,
    pub warehouses: Arc<WarehouseService>,
    pub products: Arc<ProductService>,
    pub inventory: Arc<InventoryService>,
    pub stock_movements: Arc<StockMovementService>,
    pub orders: Arc<OrderService>,
    pub reports: Arc<ReportService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DbPool>,
        config: &AppConfig,
        auth: Arc<AuthService>,
        rate_limiter: Arc<AuthRateLimiter>,
        oauth: Arc<OAuth2Service>,
        notifier: Arc<dyn Notifier>,
        event_sender: EventSender,
    ) -> Self {
        let accounts = AccountService::new(
            db.clone(),
            auth,
            rate_limiter,
            oauth,
            notifier,
            event_sender.clone(),
            PasswordPolicy::default(),
            AccountSettings::from(config),
        );

        Self {
            accounts: Arc::new(accounts),
            companies: Arc::new(CompanyService::new(db.clone())),
            users: Arc::new(UserService::new(db.clone(), event_sender.clone())),
            suppliers: Arc::new(SupplierService::new(db.clone())),
            warehouses: Arc::new(WarehouseService::new(db.clone())),
            products: Arc::new(ProductService::new(
                db.clone(),
                event_sender.clone(),
                config.default_currency.clone(),
            )),
            inventory: Arc::new(InventoryService::new(db.clone(), event_sender.clone())),
            stock_movements: Arc::new(StockMovementService::new(
                db.clone(),
                event_sender.clone(),
            )),
            orders: Arc::new(OrderService::new(
                db.clone(),
                event_sender,
                config.default_currency.clone(),
            )),
            reports: Arc::new(ReportService::new(db)),
        }
    }
}
