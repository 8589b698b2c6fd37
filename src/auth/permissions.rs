/*!
 * # Permissions Module
 *
 * Permission strings are `resource:action`. A grant of `resource:*` covers
 * every action on the resource and `*` covers everything.
 */

/// Permission actions
pub struct Actions;

impl Actions {
    pub const READ: &'static str = "read";
    pub const CREATE: &'static str = "create";
    pub const UPDATE: &'static str = "update";
    pub const DELETE: &'static str = "delete";
    pub const ALL: &'static str = "*";
}

/// Resource types
pub struct Resources;

impl Resources {
    pub const COMPANY: &'static str = "company";
    pub const USERS: &'static str = "users";
    pub const SUPPLIERS: &'static str = "suppliers";
    pub const WAREHOUSES: &'static str = "warehouses";
    pub const PRODUCTS: &'static str = "products";
    pub const INVENTORY: &'static str = "inventory";
    pub const ORDERS: &'static str = "orders";
    pub const REPORTS: &'static str = "reports";
}

/// Common permission string constants for compile-time safety
pub mod consts {
    pub const COMPANY_READ: &str = "company:read";
    pub const COMPANY_UPDATE: &str = "company:update";

    pub const USERS_READ: &str = "users:read";
    pub const USERS_CREATE: &str = "users:create";
    pub const USERS_UPDATE: &str = "users:update";
    pub const USERS_DELETE: &str = "users:delete";

    pub const SUPPLIERS_READ: &str = "suppliers:read";
    pub const SUPPLIERS_CREATE: &str = "suppliers:create";
    pub const SUPPLIERS_UPDATE: &str = "suppliers:update";
    pub const SUPPLIERS_DELETE: &str = "suppliers:delete";

    pub const WAREHOUSES_READ: &str = "warehouses:read";
    pub const WAREHOUSES_CREATE: &str = "warehouses:create";
    pub const WAREHOUSES_UPDATE: &str = "warehouses:update";
    pub const WAREHOUSES_DELETE: &str = "warehouses:delete";

    pub const PRODUCTS_READ: &str = "products:read";
    pub const PRODUCTS_CREATE: &str = "products:create";
    pub const PRODUCTS_UPDATE: &str = "products:update";
    pub const PRODUCTS_DELETE: &str = "products:delete";

    // Inventory and stock movements
    pub const INVENTORY_READ: &str = "inventory:read";
    pub const INVENTORY_CREATE: &str = "inventory:create";
    pub const INVENTORY_UPDATE: &str = "inventory:update";
    pub const INVENTORY_DELETE: &str = "inventory:delete";
    pub const INVENTORY_ADJUST: &str = "inventory:adjust";
    pub const INVENTORY_TRANSFER: &str = "inventory:transfer";
    pub const INVENTORY_RESERVE: &str = "inventory:reserve";

    pub const ORDERS_READ: &str = "orders:read";
    pub const ORDERS_CREATE: &str = "orders:create";
    pub const ORDERS_UPDATE: &str = "orders:update";
    pub const ORDERS_DELETE: &str = "orders:delete";
    pub const ORDERS_CONFIRM: &str = "orders:confirm";
    pub const ORDERS_FULFILL: &str = "orders:fulfill";
    pub const ORDERS_CANCEL: &str = "orders:cancel";

    pub const REPORTS_READ: &str = "reports:read";
}

/// Format a permission string
pub fn format_permission(resource: &str, action: &str) -> String {
    format!("{}:{}", resource, action)
}

/// Whether a granted permission covers the required one.
pub fn permission_implies(granted: &str, required: &str) -> bool {
    if granted == required || granted == Actions::ALL {
        return true;
    }

    match (granted.split_once(':'), required.split_once(':')) {
        (Some((granted_resource, Actions::ALL)), Some((required_resource, _))) => {
            granted_resource == required_resource
        }
        _ => false,
    }
}
