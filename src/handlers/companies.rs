use super::common::{success_response, ValidatedJson};
use crate::{
    auth::AuthUser, entities::company, errors::ApiError,
    services::companies::UpdateCompanyRequest, AppState,
};
use axum::{extract::State, response::IntoResponse};

#[utoipa::path(
    get,
    path = "/api/v1/company",
    tag = "company",
    responses(
        (status = 200, description = "The caller's company", body = company::Model),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn get_company(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let company = state.services.companies.get_company(&user).await?;
    Ok(success_response(company))
}

#[utoipa::path(
    put,
    path = "/api/v1/company",
    tag = "company",
    request_body = UpdateCompanyRequest,
    responses(
        (status = 200, description = "Company updated", body = company::Model),
        (status = 403, description = "Only admins may update the company", body = crate::errors::ErrorResponse),
        (status = 409, description = "Slug already taken", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn update_company(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(payload): ValidatedJson<UpdateCompanyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let company = state
        .services
        .companies
        .update_company(&user, payload)
        .await?;
    Ok(success_response(company))
}
