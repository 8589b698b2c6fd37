use super::common::success_response;
use crate::{
    auth::AuthUser,
    errors::ApiError,
    services::reports::{
        ExpiringLot, ExpiringQuery, LowStockEntry, MovementReport, OrderReport,
        ReportRangeQuery, ValuationReport,
    },
    AppState,
};
use axum::{
    extract::{Query, State},
    response::IntoResponse,
};

#[utoipa::path(
    get,
    path = "/api/v1/reports/inventory-valuation",
    tag = "reports",
    responses(
        (status = 200, description = "Units and value on hand per warehouse", body = ValuationReport),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn inventory_valuation(
    State(state): State<AppState>,
    caller: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let report = state.services.reports.inventory_valuation(&caller).await?;
    Ok(success_response(report))
}

#[utoipa::path(
    get,
    path = "/api/v1/reports/low-stock",
    tag = "reports",
    responses(
        (status = 200, description = "Products at or below their reorder point", body = Vec<LowStockEntry>),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn low_stock(
    State(state): State<AppState>,
    caller: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let entries = state.services.reports.low_stock(&caller).await?;
    Ok(success_response(entries))
}

#[utoipa::path(
    get,
    path = "/api/v1/reports/stock-movements",
    tag = "reports",
    params(ReportRangeQuery),
    responses(
        (status = 200, description = "Movement counts and units per type", body = MovementReport),
        (status = 400, description = "from is after to", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn stock_movement_report(
    State(state): State<AppState>,
    caller: AuthUser,
    Query(range): Query<ReportRangeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state.services.reports.stock_movements(&caller, range).await?;
    Ok(success_response(report))
}

#[utoipa::path(
    get,
    path = "/api/v1/reports/orders",
    tag = "reports",
    params(ReportRangeQuery),
    responses(
        (status = 200, description = "Order counts per status and fulfilled revenue", body = OrderReport),
        (status = 400, description = "from is after to", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn order_report(
    State(state): State<AppState>,
    caller: AuthUser,
    Query(range): Query<ReportRangeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state.services.reports.orders(&caller, range).await?;
    Ok(success_response(report))
}

#[utoipa::path(
    get,
    path = "/api/v1/reports/expiring",
    tag = "reports",
    params(ExpiringQuery),
    responses(
        (status = 200, description = "Lots with stock expiring within the window", body = Vec<ExpiringLot>),
        (status = 400, description = "days out of range", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn expiring_lots(
    State(state): State<AppState>,
    caller: AuthUser,
    Query(query): Query<ExpiringQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let lots = state.services.reports.expiring(&caller, query).await?;
    Ok(success_response(lots))
}
