//! sea-orm entities for the tenant-scoped business tables.
//!
//! Authentication tables (users, tokens, codes) live next to the auth code in
//! `crate::auth`.

pub mod company;
pub mod inventory_item;
pub mod order;
pub mod order_allocation;
pub mod order_item;
pub mod product;
pub mod product_supplier;
pub mod stock_movement;
pub mod supplier;
pub mod warehouse;

pub use order::OrderStatus;
pub use stock_movement::MovementType;
