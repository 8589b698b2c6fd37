use super::common::{
    created_response, no_content_response, paginated_response, success_response, ValidatedJson,
};
use crate::{
    auth::AuthUser,
    entities::warehouse,
    errors::ApiError,
    services::warehouses::{CreateWarehouseRequest, ListWarehousesQuery, UpdateWarehouseRequest},
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
    path = "/api/v1/warehouses",
    tag = "warehouses",
    params(ListWarehousesQuery),
    responses(
        (status = 200, description = "Warehouses", body = crate::PaginatedResponse<warehouse::Model>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn list_warehouses(
    State(state): State<AppState>,
    caller: AuthUser,
    Query(query): Query<ListWarehousesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state.page_request(query.page, query.per_page);
    let warehouses = state
        .services
        .warehouses
        .list_warehouses(&caller, query, page)
        .await?;
    Ok(paginated_response(warehouses))
}

#[utoipa::path(
    get,
    path = "/api/v1/warehouses/{id}",
    tag = "warehouses",
    params(("id" = Uuid, Path, description = "Warehouse ID")),
    responses(
        (status = 200, description = "Warehouse", body = warehouse::Model),
        (status = 404, description = "Warehouse not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn get_warehouse(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let warehouse = state.services.warehouses.get_warehouse(&caller, id).await?;
    Ok(success_response(warehouse))
}

#[utoipa::path(
    post,
    path = "/api/v1/warehouses",
    tag = "warehouses",
    request_body = CreateWarehouseRequest,
    responses(
        (status = 201, description = "Warehouse created", body = warehouse::Model),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 409, description = "Code already used in this company", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn create_warehouse(
    State(state): State<AppState>,
    caller: AuthUser,
    ValidatedJson(payload): ValidatedJson<CreateWarehouseRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let warehouse = state
        .services
        .warehouses
        .create_warehouse(&caller, payload)
        .await?;
    info!(warehouse_id = %warehouse.id, code = %warehouse.code, "Warehouse created");
    Ok(created_response(warehouse))
}

#[utoipa::path(
    put,
    path = "/api/v1/warehouses/{id}",
    tag = "warehouses",
    params(("id" = Uuid, Path, description = "Warehouse ID")),
    request_body = UpdateWarehouseRequest,
    responses(
        (status = 200, description = "Warehouse updated", body = warehouse::Model),
        (status = 404, description = "Warehouse not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Code already used in this company", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn update_warehouse(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<UpdateWarehouseRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let warehouse = state
        .services
        .warehouses
        .update_warehouse(&caller, id, payload)
        .await?;
    Ok(success_response(warehouse))
}

#[utoipa::path(
    delete,
    path = "/api/v1/warehouses/{id}",
    tag = "warehouses",
    params(("id" = Uuid, Path, description = "Warehouse ID")),
    responses(
        (status = 204, description = "Warehouse deleted"),
        (status = 404, description = "Warehouse not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Warehouse still holds stock or has history", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn delete_warehouse(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.services.warehouses.delete_warehouse(&caller, id).await?;
    Ok(no_content_response())
}
