//! `/auth` routes: sign-up, every sign-in flow, token rotation and the PIN
//! secondary factor. Everything here is public except the routes merged
//! through `with_auth`.

use super::common::{
    accepted_response, created_response, success_response, validate_input, ValidatedJson,
};
use crate::{
    auth::{AccessToken, AuthRouterExt, AuthUser, OAuth2Provider, TokenPair},
    auth::oauth2::AuthorizationUrlResponse,
    errors::{ApiError, ServiceError},
    middleware_helpers::ClientIp,
    services::accounts::{
        ChangePasswordRequest, EmailRequest, LoginRequest, RefreshRequest, RegisterRequest,
        RegisterResponse, ResetPasswordRequest, SetPinRequest, TokenRequest, VerifyOtpRequest,
        VerifyPinRequest,
    },
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::{IntoParams, ToSchema};

const DELIVERY_ACCEPTED: &str =
    "If the address belongs to an active account, a message has been sent";

pub fn auth_router() -> Router<AppState> {
    let public = Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route("/otp/request", post(request_otp))
        .route("/otp/verify", post(verify_otp))
        .route("/magic-link", get(follow_magic_link))
        .route("/magic-link/request", post(request_magic_link))
        .route("/magic-link/verify", post(verify_magic_link))
        .route("/password/forgot", post(forgot_password))
        .route("/password/reset", post(reset_password))
        .route("/oauth2/providers", get(oauth_providers))
        .route("/oauth2/:provider/authorize", get(oauth_authorize))
        .route("/oauth2/:provider/callback", get(oauth_callback));

    let authenticated = Router::new()
        .route("/logout", post(logout))
        .route("/me", get(me))
        .route("/password/change", post(change_password))
        .route("/pin", put(set_pin))
        .route("/pin/verify", post(verify_pin))
        .with_auth();

    public.merge(authenticated)
}

#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Company and admin user created", body = RegisterResponse),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 409, description = "Email or company slug already taken", body = crate::errors::ErrorResponse),
    )
)]
pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let registered = state.services.accounts.register(payload).await?;
    info!(company_id = %registered.company.id, user_id = %registered.user.id, "Company registered");
    Ok(created_response(registered))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = TokenPair),
        (status = 401, description = "Invalid email or password", body = crate::errors::ErrorResponse),
        (status = 403, description = "Account disabled", body = crate::errors::ErrorResponse),
        (status = 429, description = "Too many failed attempts from this address", body = crate::errors::ErrorResponse),
    )
)]
pub async fn login(
    State(state): State<AppState>,
    client_ip: ClientIp,
    ValidatedJson(payload): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let tokens = state
        .services
        .accounts
        .login(payload, client_ip.as_str())
        .await?;
    Ok(success_response(tokens))
}

#[utoipa::path(
    post,
    path = "/auth/refresh",
    tag = "auth",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Tokens rotated", body = TokenPair),
        (status = 401, description = "Refresh token invalid, expired or already used", body = crate::errors::ErrorResponse),
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<RefreshRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let tokens = state.services.accounts.refresh(payload).await?;
    Ok(success_response(tokens))
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "auth",
    responses(
        (status = 200, description = "Access token and refresh tokens revoked"),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn logout(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    state.services.accounts.logout(&user).await?;
    Ok(success_response(serde_json::json!({ "logged_out": true })))
}

#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "Current user", body = crate::auth::user::Model),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn me(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let profile = state.services.accounts.profile(&user).await?;
    Ok(success_response(profile))
}

#[utoipa::path(
    post,
    path = "/auth/otp/request",
    tag = "auth",
    request_body = EmailRequest,
    responses((status = 202, description = "Code sent when the account exists"))
)]
pub async fn request_otp(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<EmailRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.services.accounts.request_otp(payload).await?;
    Ok(accepted_response(DELIVERY_ACCEPTED))
}

#[utoipa::path(
    post,
    path = "/auth/otp/verify",
    tag = "auth",
    request_body = VerifyOtpRequest,
    responses(
        (status = 200, description = "Signed in", body = TokenPair),
        (status = 401, description = "Invalid, expired or exhausted code", body = crate::errors::ErrorResponse),
    )
)]
pub async fn verify_otp(
    State(state): State<AppState>,
    client_ip: ClientIp,
    ValidatedJson(payload): ValidatedJson<VerifyOtpRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let tokens = state
        .services
        .accounts
        .verify_otp(payload, client_ip.as_str())
        .await?;
    Ok(success_response(tokens))
}

#[utoipa::path(
    post,
    path = "/auth/magic-link/request",
    tag = "auth",
    request_body = EmailRequest,
    responses((status = 202, description = "Link sent when the account exists"))
)]
pub async fn request_magic_link(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<EmailRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.services.accounts.request_magic_link(payload).await?;
    Ok(accepted_response(DELIVERY_ACCEPTED))
}

#[utoipa::path(
    post,
    path = "/auth/magic-link/verify",
    tag = "auth",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Signed in", body = TokenPair),
        (status = 401, description = "Invalid, expired or used link", body = crate::errors::ErrorResponse),
    )
)]
pub async fn verify_magic_link(
    State(state): State<AppState>,
    client_ip: ClientIp,
    ValidatedJson(payload): ValidatedJson<TokenRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let tokens = state
        .services
        .accounts
        .verify_magic_link(payload, client_ip.as_str())
        .await?;
    Ok(success_response(tokens))
}

/// Target of the emailed link itself (`?token=`).
#[utoipa::path(
    get,
    path = "/auth/magic-link",
    tag = "auth",
    params(("token" = String, Query, description = "Token from the emailed link")),
    responses(
        (status = 200, description = "Signed in", body = TokenPair),
        (status = 401, description = "Invalid, expired or used link", body = crate::errors::ErrorResponse),
    )
)]
pub async fn follow_magic_link(
    State(state): State<AppState>,
    client_ip: ClientIp,
    Query(payload): Query<TokenRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let tokens = state
        .services
        .accounts
        .verify_magic_link(payload, client_ip.as_str())
        .await?;
    Ok(success_response(tokens))
}

#[utoipa::path(
    post,
    path = "/auth/password/forgot",
    tag = "auth",
    request_body = EmailRequest,
    responses(
        (status = 202, description = "Reset token sent when the account exists"),
        (status = 429, description = "Too many reset requests from this address", body = crate::errors::ErrorResponse),
    )
)]
pub async fn forgot_password(
    State(state): State<AppState>,
    client_ip: ClientIp,
    ValidatedJson(payload): ValidatedJson<EmailRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .accounts
        .forgot_password(payload, client_ip.as_str())
        .await?;
    Ok(accepted_response(DELIVERY_ACCEPTED))
}

#[utoipa::path(
    post,
    path = "/auth/password/reset",
    tag = "auth",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password replaced"),
        (status = 400, description = "Password does not meet the policy", body = crate::errors::ErrorResponse),
        (status = 401, description = "Invalid, expired or used token", body = crate::errors::ErrorResponse),
    )
)]
pub async fn reset_password(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<ResetPasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.services.accounts.reset_password(payload).await?;
    Ok(success_response(serde_json::json!({ "password_reset": true })))
}

#[utoipa::path(
    post,
    path = "/auth/password/change",
    tag = "auth",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed"),
        (status = 400, description = "Password does not meet the policy", body = crate::errors::ErrorResponse),
        (status = 401, description = "Current password is wrong", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn change_password(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(payload): ValidatedJson<ChangePasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.services.accounts.change_password(&user, payload).await?;
    Ok(success_response(serde_json::json!({ "password_changed": true })))
}

#[utoipa::path(
    put,
    path = "/auth/pin",
    tag = "auth",
    request_body = SetPinRequest,
    responses(
        (status = 200, description = "PIN stored"),
        (status = 400, description = "PIN must be 4 to 8 digits", body = crate::errors::ErrorResponse),
        (status = 401, description = "Current password is wrong", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn set_pin(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(payload): ValidatedJson<SetPinRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.services.accounts.set_pin(&user, payload).await?;
    Ok(success_response(serde_json::json!({ "pin_set": true })))
}

#[utoipa::path(
    post,
    path = "/auth/pin/verify",
    tag = "auth",
    request_body = VerifyPinRequest,
    responses(
        (status = 200, description = "PIN accepted; access token now carries the pin method", body = AccessToken),
        (status = 401, description = "Wrong PIN", body = crate::errors::ErrorResponse),
        (status = 429, description = "Too many wrong PINs from this address", body = crate::errors::ErrorResponse,
            headers(("Retry-After" = u64, description = "Seconds until the address is unlocked"))
        ),
    ),
    security(("Bearer" = []))
)]
pub async fn verify_pin(
    State(state): State<AppState>,
    user: AuthUser,
    client_ip: ClientIp,
    ValidatedJson(payload): ValidatedJson<VerifyPinRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let token = state
        .services
        .accounts
        .verify_pin(&user, payload, client_ip.as_str())
        .await?;
    Ok(success_response(token))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProvidersResponse {
    pub providers: Vec<OAuth2Provider>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OAuth2CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set by the provider when the user declined
    pub error: Option<String>,
}

/// Unknown provider names are reported like unconfigured ones.
fn parse_provider(raw: &str) -> Result<OAuth2Provider, ServiceError> {
    raw.parse::<OAuth2Provider>()
        .map_err(|_| ServiceError::NotFound(format!("OAuth2 provider {} not found", raw)))
}

#[utoipa::path(
    get,
    path = "/auth/oauth2/providers",
    tag = "auth",
    responses((status = 200, description = "Configured providers", body = ProvidersResponse))
)]
pub async fn oauth_providers(State(state): State<AppState>) -> impl IntoResponse {
    success_response(ProvidersResponse {
        providers: state.services.accounts.oauth_providers(),
    })
}

#[utoipa::path(
    get,
    path = "/auth/oauth2/{provider}/authorize",
    tag = "auth",
    params(("provider" = String, Path, description = "google, github or microsoft")),
    responses(
        (status = 200, description = "Provider URL with PKCE challenge and CSRF state", body = AuthorizationUrlResponse),
        (status = 404, description = "Unknown or unconfigured provider", body = crate::errors::ErrorResponse),
    )
)]
pub async fn oauth_authorize(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let provider = parse_provider(&provider)?;
    let url = state.services.accounts.oauth_authorize(provider)?;
    Ok(success_response(url))
}

#[utoipa::path(
    get,
    path = "/auth/oauth2/{provider}/callback",
    tag = "auth",
    params(
        ("provider" = String, Path, description = "google, github or microsoft"),
        OAuth2CallbackQuery
    ),
    responses(
        (status = 200, description = "Signed in", body = TokenPair),
        (status = 400, description = "Missing code or unknown state", body = crate::errors::ErrorResponse),
        (status = 401, description = "No account matches the provider identity", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown or unconfigured provider", body = crate::errors::ErrorResponse),
    )
)]
pub async fn oauth_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<OAuth2CallbackQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let provider = parse_provider(&provider)?;
    if let Some(error) = query.error {
        return Err(ApiError::BadRequest(format!(
            "authorization was not granted: {}",
            error
        )));
    }
    let (Some(code), Some(csrf_state)) = (query.code, query.state) else {
        return Err(ApiError::BadRequest(
            "code and state query parameters are required".to_string(),
        ));
    };

    let tokens = state
        .services
        .accounts
        .oauth_callback(provider, code, csrf_state)
        .await?;
    Ok(success_response(tokens))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn provider_names_parse_from_lowercase() {
        assert_eq!(parse_provider("github").unwrap(), OAuth2Provider::GitHub);
        assert_matches!(parse_provider("myspace"), Err(ServiceError::NotFound(_)));
    }
}
