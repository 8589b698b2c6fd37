use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Stockroom API",
        description = r#"
# Stockroom inventory API

Multi-tenant inventory backend: products, warehouses, stock movements, orders,
suppliers and reports. Every company only ever sees its own records; ids that
belong to another company answer 404.

## Authentication

Sign in through `/auth/*` (password, emailed code, magic link or OAuth2) and
send the access token on every `/api/v1` request:

```
Authorization: Bearer <access-token>
```

Deployments can require the PIN secondary factor for stock-changing routes.
`POST /auth/pin/verify` returns an access token that satisfies it.

## Errors

```json
{
  "error": "Conflict",
  "message": "Conflict: product with SKU WID-001 already exists",
  "request_id": "4c1f0a9e-5d5b-4d8e-9d0b-2d6f3c1a7e11",
  "timestamp": "2024-01-01T00:00:00Z"
}
```

## Pagination

List endpoints accept `page` (from 1) and `per_page`.
        "#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers((url = "http://localhost:8080", description = "Local development")),
    tags(
        (name = "auth", description = "Sign-up, sign-in flows and the PIN factor"),
        (name = "company", description = "The caller's company"),
        (name = "users", description = "Users of the company"),
        (name = "suppliers", description = "Suppliers"),
        (name = "warehouses", description = "Warehouses"),
        (name = "products", description = "Product catalogue"),
        (name = "inventory", description = "Stock per product, warehouse and lot"),
        (name = "stock-movements", description = "Inbound, outbound and transfer ledger"),
        (name = "orders", description = "Orders and their lifecycle"),
        (name = "reports", description = "Valuation, low stock, movement, order and expiry reports"),
        (name = "health", description = "Liveness, status and metrics")
    ),
    modifiers(&SecurityAddon),
    paths(
        crate::handlers::auth::register,
        crate::handlers::auth::login,
        crate::handlers::auth::refresh,
        crate::handlers::auth::logout,
        crate::handlers::auth::me,
        crate::handlers::auth::request_otp,
        crate::handlers::auth::verify_otp,
        crate::handlers::auth::request_magic_link,
        crate::handlers::auth::verify_magic_link,
        crate::handlers::auth::follow_magic_link,
        crate::handlers::auth::forgot_password,
        crate::handlers::auth::reset_password,
        crate::handlers::auth::change_password,
        crate::handlers::auth::set_pin,
        crate::handlers::auth::verify_pin,
        crate::handlers::auth::oauth_providers,
        crate::handlers::auth::oauth_authorize,
        crate::handlers::auth::oauth_callback,

        crate::handlers::companies::get_company,
        crate::handlers::companies::update_company,

        crate::handlers::users::list_users,
        crate::handlers::users::get_user,
        crate::handlers::users::create_user,
        crate::handlers::users::update_user,
        crate::handlers::users::delete_user,

        crate::handlers::suppliers::list_suppliers,
        crate::handlers::suppliers::get_supplier,
        crate::handlers::suppliers::create_supplier,
        crate::handlers::suppliers::update_supplier,
        crate::handlers::suppliers::delete_supplier,

        crate::handlers::warehouses::list_warehouses,
        crate::handlers::warehouses::get_warehouse,
        crate::handlers::warehouses::create_warehouse,
        crate::handlers::warehouses::update_warehouse,
        crate::handlers::warehouses::delete_warehouse,

        crate::handlers::products::list_products,
        crate::handlers::products::get_product,
        crate::handlers::products::create_product,
        crate::handlers::products::update_product,
        crate::handlers::products::delete_product,
        crate::handlers::products::replace_product_suppliers,

        crate::handlers::inventory::list_inventory,
        crate::handlers::inventory::get_inventory_item,
        crate::handlers::inventory::create_inventory_item,
        crate::handlers::inventory::update_inventory_item,
        crate::handlers::inventory::delete_inventory_item,
        crate::handlers::inventory::adjust_inventory,
        crate::handlers::inventory::reserve_inventory,
        crate::handlers::inventory::release_inventory,

        crate::handlers::stock_movements::create_stock_movement,
        crate::handlers::stock_movements::list_stock_movements,
        crate::handlers::stock_movements::get_stock_movement,

        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::create_order,
        crate::handlers::orders::update_order,
        crate::handlers::orders::delete_order,
        crate::handlers::orders::confirm_order,
        crate::handlers::orders::fulfill_order,
        crate::handlers::orders::cancel_order,

        crate::handlers::reports::inventory_valuation,
        crate::handlers::reports::low_stock,
        crate::handlers::reports::stock_movement_report,
        crate::handlers::reports::order_report,
        crate::handlers::reports::expiring_lots,

        crate::handlers::health::health_check,
        crate::handlers::health::api_status,
        crate::handlers::health::metrics,
    ),
    components(schemas(crate::errors::ErrorResponse))
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "Bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_core_routes_and_bearer_scheme() {
        let json = ApiDoc::openapi().to_json().unwrap();
        assert!(json.contains("Stockroom API"));
        assert!(json.contains("/api/v1/stock-movements"));
        assert!(json.contains("/api/v1/orders/{id}/fulfill"));
        assert!(json.contains("/auth/pin/verify"));
        assert!(json.contains("\"Bearer\""));
    }
}
