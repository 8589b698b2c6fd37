/*!
 * # Authentication and Authorization Module
 *
 * JWT access tokens (HS256) with database-backed, single-use refresh tokens,
 * the `AuthUser` extractor, and the middleware that gates routers by
 * permission and by PIN verification.
 *
 * Sign-in methods are recorded in the `amr` claim (`pwd`, `otp`,
 * `magic_link`, `oauth`, and `pin` once the secondary factor was verified).
 */

use crate::config::AppConfig;
use crate::errors::{ErrorResponse, ServiceError};
use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

// Entity modules
pub mod magic_link;
pub mod oauth_account;
pub mod otp_code;
pub mod password_reset_token;
pub mod refresh_token;
pub mod user;

// Feature modules
pub mod oauth2;
pub mod one_time;
pub mod password;
pub mod permissions;
pub mod rate_limit;
pub mod rbac;

pub use oauth2::{OAuth2Config, OAuth2Provider, OAuth2ProviderConfig, OAuth2Service};
pub use permissions::consts;
pub use rate_limit::{cleanup_rate_limits, AuthRateLimitConfig, AuthRateLimiter, RateLimitType};
pub use user::UserRole;

/// Authentication method references carried in the `amr` claim
pub mod amr {
    pub const PASSWORD: &str = "pwd";
    pub const OTP: &str = "otp";
    pub const MAGIC_LINK: &str = "magic_link";
    pub const OAUTH: &str = "oauth";
    pub const PIN: &str = "pin";
}

const ACCESS_TOKEN: &str = "access";
const REFRESH_TOKEN: &str = "refresh";

/// Claim structure for JWT tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub company_id: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub amr: Vec<String>,
    /// `access` or `refresh`
    pub typ: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    pub nbf: i64,
    pub iss: String,
    pub aud: String,
}

/// Authenticated caller, inserted into request extensions by `auth_middleware`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub company_id: Uuid,
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: UserRole,
    pub permissions: Vec<String>,
    pub amr: Vec<String>,
    pub token_id: String,
    pub expires_at: i64,
}

impl AuthUser {
    fn from_claims(claims: Claims) -> Result<Self, AuthError> {
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;
        let company_id =
            Uuid::parse_str(&claims.company_id).map_err(|_| AuthError::InvalidToken)?;
        let role = claims
            .roles
            .first()
            .and_then(|r| r.parse::<UserRole>().ok())
            .ok_or(AuthError::InvalidToken)?;

        Ok(Self {
            user_id,
            company_id,
            name: claims.name,
            email: claims.email,
            role,
            permissions: claims.permissions,
            amr: claims.amr,
            token_id: claims.jti,
            expires_at: claims.exp,
        })
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// Admins bypass permission checks.
    pub fn has_permission(&self, permission: &str) -> bool {
        self.is_admin() || rbac::grants(&self.permissions, permission)
    }

    pub fn require_permission(&self, permission: &str) -> Result<(), ServiceError> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(format!(
                "missing permission {}",
                permission
            )))
        }
    }

    pub fn has_verified_pin(&self) -> bool {
        self.amr.iter().any(|m| m == amr::PIN)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(AuthError::MissingAuth)
    }
}

/// Authentication configuration
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_audience: String,
    pub jwt_issuer: String,
    pub access_token_expiration: Duration,
    pub refresh_token_expiration: Duration,
    pub pin_required_for_stock_changes: bool,
}

impl AuthConfig {
    pub fn new(
        jwt_secret: String,
        jwt_audience: String,
        jwt_issuer: String,
        access_token_expiration: Duration,
        refresh_token_expiration: Duration,
    ) -> Self {
        Self {
            jwt_secret,
            jwt_audience,
            jwt_issuer,
            access_token_expiration,
            refresh_token_expiration,
            pin_required_for_stock_changes: false,
        }
    }
}

impl From<&AppConfig> for AuthConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            jwt_secret: cfg.jwt_secret.clone(),
            jwt_audience: cfg.auth_audience.clone(),
            jwt_issuer: cfg.auth_issuer.clone(),
            access_token_expiration: Duration::from_secs(cfg.jwt_expiration as u64),
            refresh_token_expiration: Duration::from_secs(cfg.refresh_token_expiration as u64),
            pin_required_for_stock_changes: cfg.pin_required_for_stock_changes,
        }
    }
}

/// Token pair response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    pub refresh_expires_in: i64,
}

/// Single access token, returned after PIN verification
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AccessToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Issues and validates tokens. Revoked access tokens are kept in memory
/// until they expire.
#[derive(Debug, Clone)]
pub struct AuthService {
    config: AuthConfig,
    db: Arc<DatabaseConnection>,
    blacklisted_tokens: Arc<DashMap<String, i64>>,
}

impl AuthService {
    pub fn new(config: AuthConfig, db: Arc<DatabaseConnection>) -> Self {
        Self {
            config,
            db,
            blacklisted_tokens: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    fn build_claims(
        &self,
        user: &user::Model,
        amr: &[String],
        typ: &str,
        lifetime: Duration,
    ) -> Claims {
        let now = Utc::now().timestamp();
        let access = typ == ACCESS_TOKEN;
        Claims {
            sub: user.id.to_string(),
            name: access.then(|| user.name.clone()),
            email: access.then(|| user.email.clone()),
            company_id: user.company_id.to_string(),
            roles: vec![user.role.to_string()],
            permissions: if access {
                rbac::permissions_for_role(user.role)
            } else {
                Vec::new()
            },
            amr: amr.to_vec(),
            typ: typ.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + lifetime.as_secs() as i64,
            nbf: now,
            iss: self.config.jwt_issuer.clone(),
            aud: self.config.jwt_audience.clone(),
        }
    }

    fn encode_claims(&self, claims: &Claims) -> Result<String, AuthError> {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|e| AuthError::TokenCreation(e.to_string()))
    }

    fn decode_claims(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[self.config.jwt_audience.as_str()]);
        validation.set_issuer(&[self.config.jwt_issuer.as_str()]);
        validation.leeway = 0;

        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken,
        })
    }

    /// Access token only; used when the caller already holds a refresh token.
    pub fn issue_access_token(
        &self,
        user: &user::Model,
        amr: &[String],
    ) -> Result<AccessToken, AuthError> {
        let claims = self.build_claims(user, amr, ACCESS_TOKEN, self.config.access_token_expiration);
        Ok(AccessToken {
            access_token: self.encode_claims(&claims)?,
            token_type: "Bearer".to_string(),
            expires_in: self.config.access_token_expiration.as_secs() as i64,
        })
    }

    /// Issues an access/refresh pair and records the refresh token.
    pub async fn issue_tokens<C>(
        &self,
        conn: &C,
        user: &user::Model,
        amr: &[String],
    ) -> Result<TokenPair, ServiceError>
    where
        C: ConnectionTrait,
    {
        let access = self.issue_access_token(user, amr)?;
        let refresh_claims = self.build_claims(
            user,
            amr,
            REFRESH_TOKEN,
            self.config.refresh_token_expiration,
        );
        let refresh_token = self.encode_claims(&refresh_claims)?;

        refresh_token::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user.id),
            token_id: Set(refresh_claims.jti.clone()),
            expires_at: Set(timestamp_to_datetime(refresh_claims.exp)),
            revoked: Set(false),
            created_at: Set(Utc::now()),
        }
        .insert(conn)
        .await?;

        debug!(user_id = %user.id, amr = ?amr, "Issued token pair");

        Ok(TokenPair {
            access_token: access.access_token,
            refresh_token,
            token_type: access.token_type,
            expires_in: access.expires_in,
            refresh_expires_in: self.config.refresh_token_expiration.as_secs() as i64,
        })
    }

    /// Validates an access token and checks the revocation list.
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let claims = self.decode_claims(token)?;
        if claims.typ != ACCESS_TOKEN {
            return Err(AuthError::InvalidToken);
        }
        if self.blacklisted_tokens.contains_key(&claims.jti) {
            return Err(AuthError::RevokedToken);
        }
        Ok(claims)
    }

    /// Rotates a refresh token: the presented token is revoked and a new pair
    /// is issued with the same `amr`.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ServiceError> {
        let claims = self.decode_claims(refresh_token)?;
        if claims.typ != REFRESH_TOKEN {
            return Err(AuthError::InvalidToken.into());
        }
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;

        let stored = refresh_token::Entity::find()
            .filter(refresh_token::Column::TokenId.eq(claims.jti.as_str()))
            .filter(refresh_token::Column::UserId.eq(user_id))
            .one(self.db.as_ref())
            .await?
            .ok_or(AuthError::InvalidToken)?;

        if stored.revoked {
            warn!(user_id = %user_id, "Refresh token reuse detected, revoking all sessions");
            revoke_refresh_tokens(self.db.as_ref(), user_id).await?;
            return Err(AuthError::RevokedToken.into());
        }
        if stored.expires_at <= Utc::now() {
            return Err(AuthError::TokenExpired.into());
        }

        let service = self.clone();
        crate::db::with_transaction(&self.db, move |txn| {
            Box::pin(async move {
                // Conditional update so two concurrent refreshes cannot both win.
                let rotated = refresh_token::Entity::update_many()
                    .col_expr(
                        refresh_token::Column::Revoked,
                        sea_orm::sea_query::Expr::value(true),
                    )
                    .filter(refresh_token::Column::Id.eq(stored.id))
                    .filter(refresh_token::Column::Revoked.eq(false))
                    .exec(txn)
                    .await?;
                if rotated.rows_affected != 1 {
                    return Err(AuthError::RevokedToken.into());
                }

                let user = user::Entity::find_by_id(user_id)
                    .one(txn)
                    .await?
                    .ok_or(AuthError::InvalidToken)?;
                if !user.active {
                    return Err(AuthError::InactiveUser.into());
                }

                service.issue_tokens(txn, &user, &claims.amr).await
            })
        })
        .await
    }

    /// Revokes the caller's access token and every refresh token of the user.
    pub async fn logout(&self, user: &AuthUser) -> Result<(), ServiceError> {
        self.blacklist(&user.token_id, user.expires_at);
        let revoked = revoke_refresh_tokens(self.db.as_ref(), user.user_id).await?;
        info!(user_id = %user.user_id, revoked, "User logged out");
        Ok(())
    }

    pub fn blacklist(&self, jti: &str, expires_at: i64) {
        self.blacklisted_tokens.insert(jti.to_string(), expires_at);
        let now = Utc::now().timestamp();
        self.blacklisted_tokens.retain(|_, exp| *exp > now);
    }
}

/// Marks every live refresh token of a user revoked. Returns how many were
/// revoked.
pub async fn revoke_refresh_tokens<C>(conn: &C, user_id: Uuid) -> Result<u64, ServiceError>
where
    C: ConnectionTrait,
{
    let result = refresh_token::Entity::update_many()
        .col_expr(
            refresh_token::Column::Revoked,
            sea_orm::sea_query::Expr::value(true),
        )
        .filter(refresh_token::Column::UserId.eq(user_id))
        .filter(refresh_token::Column::Revoked.eq(false))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(ts, 0).unwrap_or_else(Utc::now)
}

/// Authentication error types
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication required")]
    MissingAuth,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid authentication token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token has been revoked")]
    RevokedToken,

    #[error("Token creation failed: {0}")]
    TokenCreation(String),

    #[error("User account is disabled")]
    InactiveUser,

    #[error("Insufficient permissions")]
    InsufficientPermissions,

    #[error("PIN verification required")]
    PinRequired,

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingAuth => "AUTH_MISSING",
            Self::InvalidCredentials => "AUTH_INVALID_CREDENTIALS",
            Self::InvalidToken => "AUTH_INVALID_TOKEN",
            Self::TokenExpired => "AUTH_TOKEN_EXPIRED",
            Self::RevokedToken => "AUTH_REVOKED_TOKEN",
            Self::TokenCreation(_) => "AUTH_TOKEN_CREATION_FAILED",
            Self::InactiveUser => "AUTH_USER_INACTIVE",
            Self::InsufficientPermissions => "AUTH_INSUFFICIENT_PERMISSIONS",
            Self::PinRequired => "AUTH_PIN_REQUIRED",
            Self::InternalError(_) => "AUTH_INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InactiveUser | Self::InsufficientPermissions | Self::PinRequired => {
                StatusCode::FORBIDDEN
            }
            Self::TokenCreation(_) | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl From<AuthError> for ServiceError {
    fn from(err: AuthError) -> Self {
        match err.status_code() {
            StatusCode::FORBIDDEN => ServiceError::Forbidden(err.to_string()),
            StatusCode::INTERNAL_SERVER_ERROR => ServiceError::InternalError(err.to_string()),
            _ => ServiceError::Unauthorized(err.to_string()),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "authentication failure");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            error: self.code().to_string(),
            message,
            details: None,
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        };

        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                header::HeaderValue::from_static("Bearer"),
            );
        }
        response
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Authentication middleware that validates the bearer token and inserts
/// the `AuthUser` into request extensions.
pub async fn auth_middleware(mut request: Request, next: Next) -> Result<Response, AuthError> {
    let auth_service = request
        .extensions()
        .get::<Arc<AuthService>>()
        .cloned()
        .ok_or_else(|| AuthError::InternalError("auth service not configured".to_string()))?;

    let token = bearer_token(request.headers()).ok_or(AuthError::MissingAuth)?;
    let claims = auth_service.validate_token(token)?;
    let user = AuthUser::from_claims(claims)?;

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Permission middleware to check if a user has the required permission
pub async fn permission_middleware(
    State(required_permission): State<String>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let user = request
        .extensions()
        .get::<AuthUser>()
        .ok_or(AuthError::MissingAuth)?;

    if !user.has_permission(&required_permission) {
        debug!(
            user_id = %user.user_id,
            permission = %required_permission,
            "Permission denied"
        );
        return Err(AuthError::InsufficientPermissions);
    }

    Ok(next.run(request).await)
}

/// Rejects tokens without the `pin` method when the deployment requires PIN
/// verification for stock changes.
pub async fn require_pin_middleware(request: Request, next: Next) -> Result<Response, AuthError> {
    let pin_required = request
        .extensions()
        .get::<Arc<AuthService>>()
        .map(|svc| svc.config().pin_required_for_stock_changes)
        .unwrap_or(false);

    if pin_required {
        let user = request
            .extensions()
            .get::<AuthUser>()
            .ok_or(AuthError::MissingAuth)?;
        if !user.has_verified_pin() {
            return Err(AuthError::PinRequired);
        }
    }

    Ok(next.run(request).await)
}

/// Extension methods for Router to add auth middleware
pub trait AuthRouterExt {
    fn with_auth(self) -> Self;
    fn with_permission(self, permission: &str) -> Self;
    fn with_pin(self) -> Self;
}

impl<S> AuthRouterExt for axum::Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_auth(self) -> Self {
        self.layer(axum::middleware::from_fn(auth_middleware))
    }

    fn with_permission(self, permission: &str) -> Self {
        self.layer(axum::middleware::from_fn_with_state(
            permission.to_string(),
            permission_middleware,
        ))
        .with_auth()
    }

    /// Must be applied before `with_permission`/`with_auth` so that it runs
    /// after authentication.
    fn with_pin(self) -> Self {
        self.layer(axum::middleware::from_fn(require_pin_middleware))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request as HttpRequest, routing::get, Extension, Router};
    use tower::ServiceExt;

    fn service(pin_required: bool) -> AuthService {
        let mut config = AuthConfig::new(
            "x".repeat(64),
            "stockroom-api".into(),
            "stockroom-auth".into(),
            Duration::from_secs(900),
            Duration::from_secs(86_400),
        );
        config.pin_required_for_stock_changes = pin_required;
        AuthService::new(config, Arc::new(DatabaseConnection::default()))
    }

    fn user(role: UserRole) -> user::Model {
        user::Model {
            id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            name: "Robin".into(),
            email: "robin@example.com".into(),
            password_hash: None,
            role,
            pin_hash: None,
            pin_set_at: None,
            active: true,
            last_login_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn app(service: AuthService, permission: &str) -> Router {
        Router::new()
            .route("/guarded", get(|user: AuthUser| async move { user.role.to_string() }))
            .with_pin()
            .with_permission(permission)
            .layer(Extension(Arc::new(service)))
    }

    async fn call(app: Router, token: Option<&str>) -> StatusCode {
        let mut builder = HttpRequest::builder().uri("/guarded");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        app.oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[test]
    fn access_token_round_trips_into_auth_user() {
        let svc = service(false);
        let user = user(UserRole::Staff);
        let token = svc
            .issue_access_token(&user, &[amr::PASSWORD.to_string()])
            .unwrap();

        let claims = svc.validate_token(&token.access_token).unwrap();
        let auth_user = AuthUser::from_claims(claims).unwrap();
        assert_eq!(auth_user.user_id, user.id);
        assert_eq!(auth_user.company_id, user.company_id);
        assert_eq!(auth_user.role, UserRole::Staff);
        assert!(auth_user.has_permission(consts::INVENTORY_TRANSFER));
        assert!(!auth_user.has_permission(consts::USERS_CREATE));
        assert!(!auth_user.has_verified_pin());
    }

    #[test]
    fn tampered_and_foreign_tokens_are_rejected() {
        let svc = service(false);
        let token = svc
            .issue_access_token(&user(UserRole::Viewer), &[])
            .unwrap()
            .access_token;
        let mut tampered = token.clone();
        tampered.push('x');
        assert!(matches!(
            svc.validate_token(&tampered),
            Err(AuthError::InvalidToken)
        ));

        let other = AuthService::new(
            AuthConfig::new(
                "y".repeat(64),
                "stockroom-api".into(),
                "stockroom-auth".into(),
                Duration::from_secs(900),
                Duration::from_secs(86_400),
            ),
            Arc::new(DatabaseConnection::default()),
        );
        assert!(other.validate_token(&token).is_err());
    }

    #[test]
    fn blacklisted_token_is_revoked() {
        let svc = service(false);
        let token = svc
            .issue_access_token(&user(UserRole::Viewer), &[])
            .unwrap()
            .access_token;
        let claims = svc.validate_token(&token).unwrap();
        svc.blacklist(&claims.jti, claims.exp);
        assert!(matches!(
            svc.validate_token(&token),
            Err(AuthError::RevokedToken)
        ));
    }

    #[tokio::test]
    async fn middleware_enforces_auth_and_permissions() {
        let svc = service(false);
        let viewer = svc
            .issue_access_token(&user(UserRole::Viewer), &[])
            .unwrap()
            .access_token;
        let manager = svc
            .issue_access_token(&user(UserRole::Manager), &[])
            .unwrap()
            .access_token;

        assert_eq!(
            call(app(svc.clone(), consts::PRODUCTS_CREATE), None).await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            call(app(svc.clone(), consts::PRODUCTS_CREATE), Some(&viewer)).await,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            call(app(svc, consts::PRODUCTS_CREATE), Some(&manager)).await,
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn pin_gate_requires_pin_method_when_enabled() {
        let svc = service(true);
        let staff = user(UserRole::Staff);
        let without_pin = svc
            .issue_access_token(&staff, &[amr::PASSWORD.to_string()])
            .unwrap()
            .access_token;
        let with_pin = svc
            .issue_access_token(&staff, &[amr::PASSWORD.to_string(), amr::PIN.to_string()])
            .unwrap()
            .access_token;

        assert_eq!(
            call(app(svc.clone(), consts::INVENTORY_ADJUST), Some(&without_pin)).await,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            call(app(svc, consts::INVENTORY_ADJUST), Some(&with_pin)).await,
            StatusCode::OK
        );
    }

    #[test]
    fn auth_errors_map_to_service_errors() {
        assert!(matches!(
            ServiceError::from(AuthError::PinRequired),
            ServiceError::Forbidden(_)
        ));
        assert!(matches!(
            ServiceError::from(AuthError::InvalidCredentials),
            ServiceError::Unauthorized(_)
        ));
        assert_eq!(AuthError::PinRequired.code(), "AUTH_PIN_REQUIRED");
    }
}
