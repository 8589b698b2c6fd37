use super::common::{created_response, paginated_response, success_response, ValidatedJson};
use crate::{
    auth::{consts as perm, AuthUser},
    entities::{stock_movement, MovementType},
    errors::ApiError,
    services::stock_movements::{CreateStockMovementRequest, ListStockMovementsQuery},
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

/// Transfers need the transfer permission; inbound and outbound bookings
/// need the adjust permission.
fn required_permission(movement_type: MovementType) -> &'static str {
    match movement_type {
        MovementType::Transfer => perm::INVENTORY_TRANSFER,
        _ => perm::INVENTORY_ADJUST,
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/stock-movements",
    tag = "stock-movements",
    request_body = CreateStockMovementRequest,
    responses(
        (status = 201, description = "Stock moved and movement recorded", body = stock_movement::Model),
        (status = 400, description = "Missing warehouse, same source and destination, or quantity below 1", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden or PIN verification required", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product or warehouse not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Not enough available stock at the source", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn create_stock_movement(
    State(state): State<AppState>,
    caller: AuthUser,
    ValidatedJson(payload): ValidatedJson<CreateStockMovementRequest>,
) -> Result<impl IntoResponse, ApiError> {
    caller.require_permission(required_permission(payload.movement_type))?;

    let movement = state
        .services
        .stock_movements
        .create_movement(&caller, payload)
        .await?;
    info!(
        movement_id = %movement.id,
        movement_type = %movement.movement_type,
        quantity = movement.quantity,
        "Stock movement recorded"
    );
    Ok(created_response(movement))
}

#[utoipa::path(
    get,
    path = "/api/v1/stock-movements",
    tag = "stock-movements",
    params(ListStockMovementsQuery),
    responses(
        (status = 200, description = "Movements, newest first", body = crate::PaginatedResponse<stock_movement::Model>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn list_stock_movements(
    State(state): State<AppState>,
    caller: AuthUser,
    Query(query): Query<ListStockMovementsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state.page_request(query.page, query.per_page);
    let movements = state
        .services
        .stock_movements
        .list_movements(&caller, query, page)
        .await?;
    Ok(paginated_response(movements))
}

#[utoipa::path(
    get,
    path = "/api/v1/stock-movements/{id}",
    tag = "stock-movements",
    params(("id" = Uuid, Path, description = "Stock movement ID")),
    responses(
        (status = 200, description = "Stock movement", body = stock_movement::Model),
        (status = 404, description = "Stock movement not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn get_stock_movement(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let movement = state
        .services
        .stock_movements
        .get_movement(&caller, id)
        .await?;
    Ok(success_response(movement))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfers_need_the_transfer_permission() {
        assert_eq!(required_permission(MovementType::Transfer), perm::INVENTORY_TRANSFER);
        assert_eq!(required_permission(MovementType::Inbound), perm::INVENTORY_ADJUST);
        assert_eq!(required_permission(MovementType::Outbound), perm::INVENTORY_ADJUST);
    }
}
