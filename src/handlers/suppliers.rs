use super::common::{
    created_response, no_content_response, paginated_response, success_response, ValidatedJson,
};
use crate::{
    auth::AuthUser,
    entities::supplier,
    errors::ApiError,
    services::suppliers::{CreateSupplierRequest, ListSuppliersQuery, UpdateSupplierRequest},
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
    path = "/api/v1/suppliers",
    tag = "suppliers",
    params(ListSuppliersQuery),
    responses(
        (status = 200, description = "Suppliers", body = crate::PaginatedResponse<supplier::Model>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn list_suppliers(
    State(state): State<AppState>,
    caller: AuthUser,
    Query(query): Query<ListSuppliersQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state.page_request(query.page, query.per_page);
    let suppliers = state
        .services
        .suppliers
        .list_suppliers(&caller, query, page)
        .await?;
    Ok(paginated_response(suppliers))
}

#[utoipa::path(
    get,
    path = "/api/v1/suppliers/{id}",
    tag = "suppliers",
    params(("id" = Uuid, Path, description = "Supplier ID")),
    responses(
        (status = 200, description = "Supplier", body = supplier::Model),
        (status = 404, description = "Supplier not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn get_supplier(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let supplier = state.services.suppliers.get_supplier(&caller, id).await?;
    Ok(success_response(supplier))
}

#[utoipa::path(
    post,
    path = "/api/v1/suppliers",
    tag = "suppliers",
    request_body = CreateSupplierRequest,
    responses(
        (status = 201, description = "Supplier created", body = supplier::Model),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn create_supplier(
    State(state): State<AppState>,
    caller: AuthUser,
    ValidatedJson(payload): ValidatedJson<CreateSupplierRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let supplier = state
        .services
        .suppliers
        .create_supplier(&caller, payload)
        .await?;
    info!(supplier_id = %supplier.id, "Supplier created");
    Ok(created_response(supplier))
}

#[utoipa::path(
    put,
    path = "/api/v1/suppliers/{id}",
    tag = "suppliers",
    params(("id" = Uuid, Path, description = "Supplier ID")),
    request_body = UpdateSupplierRequest,
    responses(
        (status = 200, description = "Supplier updated", body = supplier::Model),
        (status = 404, description = "Supplier not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn update_supplier(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<UpdateSupplierRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let supplier = state
        .services
        .suppliers
        .update_supplier(&caller, id, payload)
        .await?;
    Ok(success_response(supplier))
}

/// Product links to the supplier are removed with it.
#[utoipa::path(
    delete,
    path = "/api/v1/suppliers/{id}",
    tag = "suppliers",
    params(("id" = Uuid, Path, description = "Supplier ID")),
    responses(
        (status = 204, description = "Supplier deleted"),
        (status = 404, description = "Supplier not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn delete_supplier(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.services.suppliers.delete_supplier(&caller, id).await?;
    Ok(no_content_response())
}
