use super::common::{
    created_response, no_content_response, paginated_response, success_response, ValidatedJson,
};
use crate::{
    auth::AuthUser,
    errors::ApiError,
    services::inventory::{
        AdjustInventoryRequest, AdjustmentResult, CreateInventoryItemRequest,
        InventoryItemView, ListInventoryQuery, ReservationRequest, UpdateInventoryItemRequest,
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
    path = "/api/v1/inventory",
    tag = "inventory",
    params(ListInventoryQuery),
    responses(
        (status = 200, description = "Inventory items with available quantity", body = crate::PaginatedResponse<InventoryItemView>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn list_inventory(
    State(state): State<AppState>,
    caller: AuthUser,
    Query(query): Query<ListInventoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state.page_request(query.page, query.per_page);
    let items = state
        .services
        .inventory
        .list_inventory(&caller, query, page)
        .await?;
    Ok(paginated_response(items))
}

#[utoipa::path(
    get,
    path = "/api/v1/inventory/{id}",
    tag = "inventory",
    params(("id" = Uuid, Path, description = "Inventory item ID")),
    responses(
        (status = 200, description = "Inventory item", body = InventoryItemView),
        (status = 404, description = "Inventory item not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn get_inventory_item(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let item = state.services.inventory.get_item(&caller, id).await?;
    Ok(success_response(item))
}

#[utoipa::path(
    post,
    path = "/api/v1/inventory",
    tag = "inventory",
    request_body = CreateInventoryItemRequest,
    responses(
        (status = 201, description = "Inventory item created", body = InventoryItemView),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product or warehouse not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Product, warehouse and lot already tracked", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn create_inventory_item(
    State(state): State<AppState>,
    caller: AuthUser,
    ValidatedJson(payload): ValidatedJson<CreateInventoryItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let item = state.services.inventory.create_item(&caller, payload).await?;
    info!(inventory_item_id = %item.item.id, "Inventory item created");
    Ok(created_response(item))
}

#[utoipa::path(
    put,
    path = "/api/v1/inventory/{id}",
    tag = "inventory",
    params(("id" = Uuid, Path, description = "Inventory item ID")),
    request_body = UpdateInventoryItemRequest,
    responses(
        (status = 200, description = "Lot or expiry updated", body = InventoryItemView),
        (status = 404, description = "Inventory item not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Lot already tracked for this product and warehouse", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn update_inventory_item(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<UpdateInventoryItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let item = state
        .services
        .inventory
        .update_item(&caller, id, payload)
        .await?;
    Ok(success_response(item))
}

#[utoipa::path(
    delete,
    path = "/api/v1/inventory/{id}",
    tag = "inventory",
    params(("id" = Uuid, Path, description = "Inventory item ID")),
    responses(
        (status = 204, description = "Inventory item deleted"),
        (status = 404, description = "Inventory item not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Item still holds or reserves stock", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn delete_inventory_item(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.services.inventory.delete_item(&caller, id).await?;
    Ok(no_content_response())
}

#[utoipa::path(
    post,
    path = "/api/v1/inventory/{id}/adjust",
    tag = "inventory",
    params(("id" = Uuid, Path, description = "Inventory item ID")),
    request_body = AdjustInventoryRequest,
    responses(
        (status = 200, description = "Quantity adjusted and movement recorded", body = AdjustmentResult),
        (status = 400, description = "Neither or both of delta and set, or no change", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden or PIN verification required", body = crate::errors::ErrorResponse),
        (status = 422, description = "Result would drop below zero or below the reserved quantity", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn adjust_inventory(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<AdjustInventoryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state.services.inventory.adjust(&caller, id, payload).await?;
    Ok(success_response(result))
}

#[utoipa::path(
    post,
    path = "/api/v1/inventory/{id}/reserve",
    tag = "inventory",
    params(("id" = Uuid, Path, description = "Inventory item ID")),
    request_body = ReservationRequest,
    responses(
        (status = 200, description = "Units reserved", body = InventoryItemView),
        (status = 422, description = "Not enough available units", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn reserve_inventory(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<ReservationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let item = state.services.inventory.reserve(&caller, id, payload).await?;
    Ok(success_response(item))
}

#[utoipa::path(
    post,
    path = "/api/v1/inventory/{id}/release",
    tag = "inventory",
    params(("id" = Uuid, Path, description = "Inventory item ID")),
    request_body = ReservationRequest,
    responses(
        (status = 200, description = "Reservation released", body = InventoryItemView),
        (status = 422, description = "Fewer units reserved than requested", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn release_inventory(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<ReservationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let item = state.services.inventory.release(&caller, id, payload).await?;
    Ok(success_response(item))
}
