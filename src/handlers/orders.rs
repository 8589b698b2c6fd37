use super::common::{
    created_response, no_content_response, paginated_response, success_response, ValidatedJson,
};
use crate::{
    auth::AuthUser,
    entities::order,
    errors::ApiError,
    services::orders::{CreateOrderRequest, ListOrdersQuery, OrderDetail, UpdateOrderRequest},
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
    path = "/api/v1/orders",
    tag = "orders",
    params(ListOrdersQuery),
    responses(
        (status = 200, description = "Orders, newest first", body = crate::PaginatedResponse<order::Model>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn list_orders(
    State(state): State<AppState>,
    caller: AuthUser,
    Query(query): Query<ListOrdersQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state.page_request(query.page, query.per_page);
    let orders = state.services.orders.list_orders(&caller, query, page).await?;
    Ok(paginated_response(orders))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    tag = "orders",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order with its line items", body = OrderDetail),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn get_order(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state.services.orders.get_order(&caller, id).await?;
    Ok(success_response(order))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders",
    tag = "orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created as pending", body = OrderDetail),
        (status = 400, description = "No lines, bad quantity or inactive product", body = crate::errors::ErrorResponse),
        (status = 404, description = "Warehouse or product not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn create_order(
    State(state): State<AppState>,
    caller: AuthUser,
    ValidatedJson(payload): ValidatedJson<CreateOrderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state.services.orders.create_order(&caller, payload).await?;
    info!(
        order_id = %order.order.id,
        order_number = %order.order.order_number,
        "Order created"
    );
    Ok(created_response(order))
}

#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}",
    tag = "orders",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = UpdateOrderRequest,
    responses(
        (status = 200, description = "Order updated", body = order::Model),
        (status = 400, description = "Order is no longer pending", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn update_order(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<UpdateOrderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .update_order(&caller, id, payload)
        .await?;
    Ok(success_response(order))
}

#[utoipa::path(
    delete,
    path = "/api/v1/orders/{id}",
    tag = "orders",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 204, description = "Order deleted"),
        (status = 400, description = "Only pending or cancelled orders can be deleted", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn delete_order(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.services.orders.delete_order(&caller, id).await?;
    Ok(no_content_response())
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/confirm",
    tag = "orders",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order confirmed and stock reserved", body = OrderDetail),
        (status = 400, description = "Order is not pending", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order changed concurrently", body = crate::errors::ErrorResponse),
        (status = 422, description = "Not enough available stock in the order's warehouse", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn confirm_order(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state.services.orders.confirm_order(&caller, id).await?;
    Ok(success_response(order))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/fulfill",
    tag = "orders",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Reserved stock shipped and outbound movements recorded", body = OrderDetail),
        (status = 400, description = "Order is not confirmed", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden or PIN verification required", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order changed concurrently", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn fulfill_order(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state.services.orders.fulfill_order(&caller, id).await?;
    Ok(success_response(order))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/cancel",
    tag = "orders",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order cancelled and reservations released", body = OrderDetail),
        (status = 400, description = "Order is already fulfilled or cancelled", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order changed concurrently", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state.services.orders.cancel_order(&caller, id).await?;
    Ok(success_response(order))
}
