use super::common::{
    created_response, no_content_response, paginated_response, success_response, ValidatedJson,
};
use crate::{
    auth::AuthUser,
    entities::product,
    errors::ApiError,
    services::products::{
        CreateProductRequest, ListProductsQuery, ProductDetail, ReplaceSuppliersRequest,
        UpdateProductRequest,
    },
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

#[utoipa::path(
    get,
    path = "/api/v1/products",
    tag = "products",
    params(ListProductsQuery),
    responses(
        (status = 200, description = "Products", body = crate::PaginatedResponse<product::Model>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn list_products(
    State(state): State<AppState>,
    caller: AuthUser,
    Query(query): Query<ListProductsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state.page_request(query.page, query.per_page);
    let products = state
        .services
        .products
        .list_products(&caller, query, page)
        .await?;
    Ok(paginated_response(products))
}

#[utoipa::path(
    get,
    path = "/api/v1/products/{id}",
    tag = "products",
    params(("id" = Uuid, Path, description = "Product ID")),
    responses(
        (status = 200, description = "Product with its suppliers", body = ProductDetail),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn get_product(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let product = state.services.products.get_product(&caller, id).await?;
    Ok(success_response(product))
}

#[utoipa::path(
    post,
    path = "/api/v1/products",
    tag = "products",
    request_body = CreateProductRequest,
    responses(
        (status = 201, description = "Product created", body = product::Model),
        (status = 400, description = "Missing or invalid fields", body = crate::errors::ErrorResponse),
        (status = 409, description = "SKU already used in this company", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn create_product(
    State(state): State<AppState>,
    caller: AuthUser,
    ValidatedJson(payload): ValidatedJson<CreateProductRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let product = state
        .services
        .products
        .create_product(&caller, payload)
        .await?;
    info!(product_id = %product.id, sku = %product.sku, "Product created");
    Ok(created_response(product))
}

#[utoipa::path(
    put,
    path = "/api/v1/products/{id}",
    tag = "products",
    params(("id" = Uuid, Path, description = "Product ID")),
    request_body = UpdateProductRequest,
    responses(
        (status = 200, description = "Product updated", body = product::Model),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "SKU already used in this company", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn update_product(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<UpdateProductRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let product = state
        .services
        .products
        .update_product(&caller, id, payload)
        .await?;
    Ok(success_response(product))
}

#[utoipa::path(
    delete,
    path = "/api/v1/products/{id}",
    tag = "products",
    params(("id" = Uuid, Path, description = "Product ID")),
    responses(
        (status = 204, description = "Product deleted"),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Product still has stock or history", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn delete_product(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.services.products.delete_product(&caller, id).await?;
    Ok(no_content_response())
}

#[utoipa::path(
    put,
    path = "/api/v1/products/{id}/suppliers",
    tag = "products",
    params(("id" = Uuid, Path, description = "Product ID")),
    request_body = ReplaceSuppliersRequest,
    responses(
        (status = 200, description = "Supplier references replaced", body = ProductDetail),
        (status = 400, description = "Duplicate supplier", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product or supplier not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn replace_product_suppliers(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<ReplaceSuppliersRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let product = state
        .services
        .products
        .replace_suppliers(&caller, id, payload)
        .await?;
    Ok(success_response(product))
}
