//! Sign-up and every sign-in flow: password, one-time code, magic link,
//! OAuth, password reset and the PIN secondary factor.

use crate::{
    auth::{
        amr, magic_link, oauth2::AuthorizationUrlResponse, oauth2::OAuth2Profile, oauth_account,
        one_time, otp_code,
        password::{hash_secret, verify_secret, PasswordPolicy},
        password_reset_token, revoke_refresh_tokens, user, AccessToken, AuthError, AuthService,
        AuthRateLimiter, AuthUser, OAuth2Provider, OAuth2Service, RateLimitType, TokenPair,
        UserRole,
    },
    config::AppConfig,
    db::with_transaction,
    entities::company,
    errors::ServiceError,
    events::{Event, EventSender},
    notifications::{Notification, NotificationKind, Notifier},
};
use chrono::{Duration, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

const INVALID_CREDENTIALS: &str = "invalid email or password";
const INVALID_CODE: &str = "invalid or expired code";
const INVALID_LINK: &str = "invalid or expired link";

/// Lifetimes and sizes of the one-time secrets.
#[derive(Debug, Clone)]
pub struct AccountSettings {
    pub otp_length: usize,
    pub otp_ttl: Duration,
    pub otp_max_attempts: i32,
    pub magic_link_ttl: Duration,
    pub magic_link_base_url: String,
    pub password_reset_ttl: Duration,
}

impl Default for AccountSettings {
    fn default() -> Self {
        Self {
            otp_length: 6,
            otp_ttl: Duration::minutes(10),
            otp_max_attempts: 5,
            magic_link_ttl: Duration::minutes(15),
            magic_link_base_url: "http://localhost:8080/auth/magic-link".to_string(),
            password_reset_ttl: Duration::hours(1),
        }
    }
}

impl From<&AppConfig> for AccountSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            otp_length: cfg.otp_length,
            otp_ttl: Duration::seconds(cfg.otp_ttl_secs as i64),
            otp_max_attempts: cfg.otp_max_attempts,
            magic_link_ttl: Duration::seconds(cfg.magic_link_ttl_secs as i64),
            magic_link_base_url: cfg.magic_link_base_url(),
            password_reset_ttl: Duration::seconds(cfg.password_reset_ttl_secs as i64),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 200))]
    pub company_name: String,
    /// Derived from the company name when omitted
    #[validate(length(min = 2, max = 64))]
    pub company_slug: Option<String>,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RegisterResponse {
    pub company: company::Model,
    pub user: user::Model,
    pub tokens: TokenPair,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct EmailRequest {
    #[validate(email)]
    pub email: String,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct VerifyOtpRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 4, max = 10))]
    pub code: String,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct TokenRequest {
    #[validate(length(min = 1, max = 512))]
    pub token: String,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct RefreshRequest {
    #[validate(length(min = 1))]
    pub refresh_token: String,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct ResetPasswordRequest {
    #[validate(length(min = 1, max = 512))]
    pub token: String,
    #[validate(length(min = 1))]
    pub new_password: String,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct ChangePasswordRequest {
    /// Required when the account already has a password
    pub current_password: Option<String>,
    #[validate(length(min = 1))]
    pub new_password: String,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct SetPinRequest {
    pub pin: String,
    /// Required when replacing an existing PIN
    pub current_password: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct VerifyPinRequest {
    pub pin: String,
}

#[derive(Clone)]
pub struct AccountService {
    db: Arc<DatabaseConnection>,
    auth: Arc<AuthService>,
    rate_limiter: Arc<AuthRateLimiter>,
    oauth: Arc<OAuth2Service>,
    notifier: Arc<dyn Notifier>,
    event_sender: EventSender,
    password_policy: PasswordPolicy,
    settings: AccountSettings,
}

impl AccountService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DatabaseConnection>,
        auth: Arc<AuthService>,
        rate_limiter: Arc<AuthRateLimiter>,
        oauth: Arc<OAuth2Service>,
        notifier: Arc<dyn Notifier>,
        event_sender: EventSender,
        password_policy: PasswordPolicy,
        settings: AccountSettings,
    ) -> Self {
        Self {
            db,
            auth,
            rate_limiter,
            oauth,
            notifier,
            event_sender,
            password_policy,
            settings,
        }
    }

    /// Creates a company with its first (admin) user and signs that user in.
    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn register(&self, input: RegisterRequest) -> Result<RegisterResponse, ServiceError> {
        let email = normalize_email(&input.email);
        let slug = slugify(
            input
                .company_slug
                .as_deref()
                .unwrap_or(input.company_name.as_str()),
        );
        if slug.is_empty() {
            return Err(ServiceError::ValidationError(
                "company slug must contain letters or digits".to_string(),
            ));
        }
        self.password_policy.validate(&input.password, Some(&email))?;

        if find_user_by_email(self.db.as_ref(), &email).await?.is_some() {
            return Err(ServiceError::Conflict(
                "an account with this email already exists".to_string(),
            ));
        }
        let slug_taken = company::Entity::find()
            .filter(company::Column::Slug.eq(slug.as_str()))
            .one(self.db.as_ref())
            .await?
            .is_some();
        if slug_taken {
            return Err(ServiceError::Conflict(format!(
                "company slug {} is already taken",
                slug
            )));
        }

        let password_hash = hash_secret(&input.password)?;
        let auth = self.auth.clone();
        let company_name = input.company_name.trim().to_string();
        let user_name = input.name.trim().to_string();

        let response = with_transaction(&self.db, move |txn| {
            Box::pin(async move {
                let company = company::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    name: Set(company_name),
                    slug: Set(slug),
                    ..Default::default()
                }
                .insert(txn)
                .await?;

                let user = user::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    company_id: Set(company.id),
                    name: Set(user_name),
                    email: Set(email),
                    password_hash: Set(Some(password_hash)),
                    role: Set(UserRole::Admin),
                    pin_hash: Set(None),
                    pin_set_at: Set(None),
                    active: Set(true),
                    last_login_at: Set(Some(Utc::now())),
                    ..Default::default()
                }
                .insert(txn)
                .await?;

                let tokens = auth
                    .issue_tokens(txn, &user, &[amr::PASSWORD.to_string()])
                    .await?;

                Ok(RegisterResponse {
                    company,
                    user,
                    tokens,
                })
            })
        })
        .await?;

        info!(
            company_id = %response.company.id,
            user_id = %response.user.id,
            "Company registered"
        );
        self.event_sender
            .send_or_log(Event::CompanyRegistered {
                company_id: response.company.id,
                admin_id: response.user.id,
            })
            .await;

        Ok(response)
    }

    /// Email and password sign-in, rate limited per client IP.
    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn login(&self, input: LoginRequest, client_ip: &str) -> Result<TokenPair, ServiceError> {
        self.rate_limiter.check(client_ip, RateLimitType::Login).await?;

        let email = normalize_email(&input.email);
        let user = find_user_by_email(self.db.as_ref(), &email).await?;
        let verified = match user.as_ref().and_then(|u| u.password_hash.as_deref()) {
            Some(hash) => verify_secret(&input.password, hash)?,
            None => false,
        };

        match user {
            Some(user) if verified => self.complete_sign_in(user, amr::PASSWORD, Some(client_ip)).await,
            _ => Err(self
                .reject_sign_in(client_ip, amr::PASSWORD, INVALID_CREDENTIALS)
                .await),
        }
    }

    pub async fn refresh(&self, input: RefreshRequest) -> Result<TokenPair, ServiceError> {
        self.auth.refresh(&input.refresh_token).await
    }

    pub async fn logout(&self, user: &AuthUser) -> Result<(), ServiceError> {
        self.auth.logout(user).await
    }

    pub async fn profile(&self, user: &AuthUser) -> Result<user::Model, ServiceError> {
        self.load_user(user).await
    }

    /// Emails a numeric sign-in code. Unknown addresses are ignored silently.
    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn request_otp(&self, input: EmailRequest) -> Result<(), ServiceError> {
        let Some(user) = self.find_active_user(&input.email).await? else {
            debug!("OTP requested for unknown or inactive account");
            return Ok(());
        };

        let now = Utc::now();
        otp_code::Entity::update_many()
            .col_expr(otp_code::Column::ConsumedAt, Expr::value(now))
            .filter(otp_code::Column::UserId.eq(user.id))
            .filter(otp_code::Column::ConsumedAt.is_null())
            .exec(self.db.as_ref())
            .await?;

        let code = one_time::generate_numeric_code(self.settings.otp_length);
        otp_code::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user.id),
            code_hash: Set(one_time::hash_token(&code)),
            expires_at: Set(now + self.settings.otp_ttl),
            attempts: Set(0),
            consumed_at: Set(None),
            created_at: Set(now),
        }
        .insert(self.db.as_ref())
        .await?;

        self.deliver(Notification::new(&user.email, NotificationKind::OtpCode, code))
            .await;
        Ok(())
    }

    /// Exchanges the latest code for a token pair. Wrong guesses count
    /// against the code; once exhausted it can no longer be used.
    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn verify_otp(
        &self,
        input: VerifyOtpRequest,
        client_ip: &str,
    ) -> Result<TokenPair, ServiceError> {
        self.rate_limiter.check(client_ip, RateLimitType::Login).await?;

        let email = normalize_email(&input.email);
        let Some(user) = find_user_by_email(self.db.as_ref(), &email).await? else {
            return Err(self.reject_sign_in(client_ip, amr::OTP, INVALID_CODE).await);
        };

        let pending = otp_code::Entity::find()
            .filter(otp_code::Column::UserId.eq(user.id))
            .filter(otp_code::Column::ConsumedAt.is_null())
            .order_by_desc(otp_code::Column::CreatedAt)
            .one(self.db.as_ref())
            .await?;
        let Some(code) = pending else {
            return Err(self.reject_sign_in(client_ip, amr::OTP, INVALID_CODE).await);
        };

        let usable = code.expires_at > Utc::now() && code.attempts < self.settings.otp_max_attempts;
        if !usable {
            return Err(self.reject_sign_in(client_ip, amr::OTP, INVALID_CODE).await);
        }

        let max_attempts = self.settings.otp_max_attempts;
        if !one_time::token_matches(input.code.trim(), &code.code_hash) {
            self.burn_otp_attempt(code.id, max_attempts).await?;
            return Err(self.reject_sign_in(client_ip, amr::OTP, INVALID_CODE).await);
        }

        let consumed = otp_code::Entity::update_many()
            .col_expr(otp_code::Column::ConsumedAt, Expr::value(Utc::now()))
            .filter(otp_code::Column::Id.eq(code.id))
            .filter(otp_code::Column::ConsumedAt.is_null())
            .filter(otp_code::Column::Attempts.lt(max_attempts))
            .exec(self.db.as_ref())
            .await?;
        if consumed.rows_affected != 1 {
            return Err(self.reject_sign_in(client_ip, amr::OTP, INVALID_CODE).await);
        }

        self.complete_sign_in(user, amr::OTP, Some(client_ip)).await
    }

    /// Counts a wrong guess in the database and retires the code once the
    /// attempts are used up. Concurrent guesses each increment the stored value.
    async fn burn_otp_attempt(&self, code_id: Uuid, max_attempts: i32) -> Result<(), ServiceError> {
        let db = self.db.as_ref();
        otp_code::Entity::update_many()
            .col_expr(
                otp_code::Column::Attempts,
                Expr::col(otp_code::Column::Attempts).add(1),
            )
            .filter(otp_code::Column::Id.eq(code_id))
            .filter(otp_code::Column::ConsumedAt.is_null())
            .filter(otp_code::Column::Attempts.lt(max_attempts))
            .exec(db)
            .await?;

        let retired = otp_code::Entity::update_many()
            .col_expr(otp_code::Column::ConsumedAt, Expr::value(Utc::now()))
            .filter(otp_code::Column::Id.eq(code_id))
            .filter(otp_code::Column::ConsumedAt.is_null())
            .filter(otp_code::Column::Attempts.gte(max_attempts))
            .exec(db)
            .await?;
        if retired.rows_affected > 0 {
            warn!(%code_id, "One-time code exhausted by wrong guesses");
        }
        Ok(())
    }

    /// Emails a single-use sign-in link. Unknown addresses are ignored silently.
    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn request_magic_link(&self, input: EmailRequest) -> Result<(), ServiceError> {
        let Some(user) = self.find_active_user(&input.email).await? else {
            debug!("Magic link requested for unknown or inactive account");
            return Ok(());
        };

        let token = one_time::generate_url_token();
        let link = one_time::magic_link_url(&self.settings.magic_link_base_url, &token)
            .map_err(|e| ServiceError::InternalError(format!("invalid magic link base url: {}", e)))?;

        let now = Utc::now();
        magic_link::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user.id),
            token_hash: Set(one_time::hash_token(&token)),
            expires_at: Set(now + self.settings.magic_link_ttl),
            consumed_at: Set(None),
            created_at: Set(now),
        }
        .insert(self.db.as_ref())
        .await?;

        self.deliver(Notification::new(&user.email, NotificationKind::MagicLink, link))
            .await;
        Ok(())
    }

    #[instrument(skip_all)]
    pub async fn verify_magic_link(
        &self,
        input: TokenRequest,
        client_ip: &str,
    ) -> Result<TokenPair, ServiceError> {
        self.rate_limiter.check(client_ip, RateLimitType::Login).await?;

        let stored = magic_link::Entity::find()
            .filter(magic_link::Column::TokenHash.eq(one_time::hash_token(input.token.trim())))
            .one(self.db.as_ref())
            .await?
            .filter(|link| link.consumed_at.is_none() && link.expires_at > Utc::now());
        let Some(stored) = stored else {
            return Err(self
                .reject_sign_in(client_ip, amr::MAGIC_LINK, INVALID_LINK)
                .await);
        };

        let consumed = magic_link::Entity::update_many()
            .col_expr(magic_link::Column::ConsumedAt, Expr::value(Utc::now()))
            .filter(magic_link::Column::Id.eq(stored.id))
            .filter(magic_link::Column::ConsumedAt.is_null())
            .exec(self.db.as_ref())
            .await?;
        if consumed.rows_affected != 1 {
            return Err(self
                .reject_sign_in(client_ip, amr::MAGIC_LINK, INVALID_LINK)
                .await);
        }

        let user = user::Entity::find_by_id(stored.user_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::Unauthorized(INVALID_LINK.to_string()))?;
        self.complete_sign_in(user, amr::MAGIC_LINK, Some(client_ip)).await
    }

    /// Emails a password reset token. Requests are throttled per client IP and
    /// unknown addresses are ignored silently.
    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn forgot_password(&self, input: EmailRequest, client_ip: &str) -> Result<(), ServiceError> {
        self.rate_limiter
            .check(client_ip, RateLimitType::PasswordReset)
            .await?;
        if let Err(locked) = self
            .rate_limiter
            .record_failure(client_ip, RateLimitType::PasswordReset)
            .await
        {
            debug!(retry_after = locked.retry_after(), "Password reset budget spent");
        }

        let Some(user) = self.find_active_user(&input.email).await? else {
            debug!("Password reset requested for unknown or inactive account");
            return Ok(());
        };

        let now = Utc::now();
        password_reset_token::Entity::update_many()
            .col_expr(password_reset_token::Column::UsedAt, Expr::value(now))
            .filter(password_reset_token::Column::UserId.eq(user.id))
            .filter(password_reset_token::Column::UsedAt.is_null())
            .exec(self.db.as_ref())
            .await?;

        let token = one_time::generate_url_token();
        password_reset_token::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user.id),
            token_hash: Set(one_time::hash_token(&token)),
            expires_at: Set(now + self.settings.password_reset_ttl),
            used_at: Set(None),
            created_at: Set(now),
        }
        .insert(self.db.as_ref())
        .await?;

        self.deliver(Notification::new(
            &user.email,
            NotificationKind::PasswordReset,
            token,
        ))
        .await;
        Ok(())
    }

    /// Sets a new password from a reset token and ends every session.
    #[instrument(skip_all)]
    pub async fn reset_password(&self, input: ResetPasswordRequest) -> Result<(), ServiceError> {
        let invalid = || ServiceError::BadRequest("reset token is invalid or expired".to_string());

        let stored = password_reset_token::Entity::find()
            .filter(password_reset_token::Column::TokenHash.eq(one_time::hash_token(input.token.trim())))
            .one(self.db.as_ref())
            .await?
            .filter(|t| t.used_at.is_none() && t.expires_at > Utc::now())
            .ok_or_else(invalid)?;

        let user = user::Entity::find_by_id(stored.user_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(invalid)?;
        self.password_policy
            .validate(&input.new_password, Some(&user.email))?;
        let password_hash = hash_secret(&input.new_password)?;

        let user_id = user.id;
        with_transaction(&self.db, move |txn| {
            Box::pin(async move {
                let used = password_reset_token::Entity::update_many()
                    .col_expr(password_reset_token::Column::UsedAt, Expr::value(Utc::now()))
                    .filter(password_reset_token::Column::Id.eq(stored.id))
                    .filter(password_reset_token::Column::UsedAt.is_null())
                    .exec(txn)
                    .await?;
                if used.rows_affected != 1 {
                    return Err(invalid());
                }

                let mut active: user::ActiveModel = user.into();
                active.password_hash = Set(Some(password_hash));
                active.update(txn).await?;
                revoke_refresh_tokens(txn, user_id).await?;
                Ok(())
            })
        })
        .await?;

        info!(%user_id, "Password reset");
        self.event_sender
            .send_or_log(Event::PasswordChanged { user_id })
            .await;
        Ok(())
    }

    #[instrument(skip(self, input), fields(user_id = %auth_user.user_id))]
    pub async fn change_password(
        &self,
        auth_user: &AuthUser,
        input: ChangePasswordRequest,
    ) -> Result<(), ServiceError> {
        let user = self.load_user(auth_user).await?;

        if let Some(existing) = user.password_hash.as_deref() {
            let current = input.current_password.as_deref().unwrap_or_default();
            if !verify_secret(current, existing)? {
                return Err(ServiceError::Unauthorized(
                    "current password is incorrect".to_string(),
                ));
            }
            if verify_secret(&input.new_password, existing)? {
                return Err(ServiceError::ValidationError(
                    "new password must differ from the current one".to_string(),
                ));
            }
        }
        self.password_policy
            .validate(&input.new_password, Some(&user.email))?;
        let password_hash = hash_secret(&input.new_password)?;

        let user_id = user.id;
        let mut active: user::ActiveModel = user.into();
        active.password_hash = Set(Some(password_hash));
        active.update(self.db.as_ref()).await?;
        revoke_refresh_tokens(self.db.as_ref(), user_id).await?;

        info!(%user_id, "Password changed");
        self.event_sender
            .send_or_log(Event::PasswordChanged { user_id })
            .await;
        Ok(())
    }

    /// Sets or replaces the caller's PIN.
    #[instrument(skip(self, input), fields(user_id = %auth_user.user_id))]
    pub async fn set_pin(&self, auth_user: &AuthUser, input: SetPinRequest) -> Result<(), ServiceError> {
        if !one_time::is_valid_pin(&input.pin) {
            return Err(ServiceError::ValidationError(format!(
                "PIN must be {} to {} digits",
                one_time::MIN_PIN_LENGTH,
                one_time::MAX_PIN_LENGTH
            )));
        }

        let user = self.load_user(auth_user).await?;
        if user.has_pin() {
            let current = input.current_password.as_deref().ok_or_else(|| {
                ServiceError::ValidationError(
                    "current_password is required to replace an existing PIN".to_string(),
                )
            })?;
            let verified = match user.password_hash.as_deref() {
                Some(hash) => verify_secret(current, hash)?,
                None => false,
            };
            if !verified {
                return Err(ServiceError::Unauthorized(
                    "current password is incorrect".to_string(),
                ));
            }
        }

        let pin_hash = hash_secret(&input.pin)?;
        let mut active: user::ActiveModel = user.into();
        active.pin_hash = Set(Some(pin_hash));
        active.pin_set_at = Set(Some(Utc::now()));
        active.update(self.db.as_ref()).await?;

        info!("PIN set");
        Ok(())
    }

    /// Checks the PIN and returns an access token carrying the `pin` method.
    /// Failures are counted per client IP.
    #[instrument(skip(self, input), fields(user_id = %auth_user.user_id))]
    pub async fn verify_pin(
        &self,
        auth_user: &AuthUser,
        input: VerifyPinRequest,
        client_ip: &str,
    ) -> Result<AccessToken, ServiceError> {
        self.rate_limiter.check(client_ip, RateLimitType::Pin).await?;

        let user = self.load_user(auth_user).await?;
        if !user.active {
            return Err(AuthError::InactiveUser.into());
        }
        let Some(pin_hash) = user.pin_hash.as_deref() else {
            return Err(ServiceError::BadRequest(
                "no PIN has been set for this account".to_string(),
            ));
        };

        let matches = one_time::is_valid_pin(&input.pin) && verify_secret(&input.pin, pin_hash)?;
        if !matches {
            let outcome = self
                .rate_limiter
                .record_failure(client_ip, RateLimitType::Pin)
                .await;
            warn!(client_ip, locked = outcome.is_err(), "PIN verification failed");
            self.event_sender
                .send_or_log(Event::PinRejected {
                    user_id: user.id,
                    locked: outcome.is_err(),
                })
                .await;
            outcome?;
            return Err(ServiceError::Unauthorized("invalid PIN".to_string()));
        }

        self.rate_limiter
            .record_success(client_ip, RateLimitType::Pin)
            .await;
        self.event_sender
            .send_or_log(Event::PinVerified { user_id: user.id })
            .await;

        let mut methods = auth_user.amr.clone();
        if !methods.iter().any(|m| m == amr::PIN) {
            methods.push(amr::PIN.to_string());
        }
        Ok(self.auth.issue_access_token(&user, &methods)?)
    }

    pub fn oauth_providers(&self) -> Vec<OAuth2Provider> {
        self.oauth.configured_providers()
    }

    pub fn oauth_authorize(
        &self,
        provider: OAuth2Provider,
    ) -> Result<AuthorizationUrlResponse, ServiceError> {
        Ok(self.oauth.authorization_url(provider)?)
    }

    /// Completes the provider round trip and signs the linked user in.
    #[instrument(skip(self, code, state))]
    pub async fn oauth_callback(
        &self,
        provider: OAuth2Provider,
        code: String,
        state: String,
    ) -> Result<TokenPair, ServiceError> {
        let profile = self.oauth.complete(provider, code, &state).await?;
        self.sign_in_with_oauth_profile(profile).await
    }

    /// Finds the user behind a provider identity. A known identity signs in
    /// directly; otherwise a verified email is linked to the existing account
    /// with that address. Accounts are never created here because the
    /// company cannot be inferred from a provider profile.
    #[instrument(skip(self, profile), fields(provider = %profile.provider))]
    pub async fn sign_in_with_oauth_profile(
        &self,
        profile: OAuth2Profile,
    ) -> Result<TokenPair, ServiceError> {
        let provider_key = profile.provider.to_string();
        let linked = oauth_account::Entity::find()
            .filter(oauth_account::Column::Provider.eq(provider_key.as_str()))
            .filter(oauth_account::Column::ProviderUserId.eq(profile.provider_user_id.as_str()))
            .one(self.db.as_ref())
            .await?;

        let user = match linked {
            Some(link) => user::Entity::find_by_id(link.user_id)
                .one(self.db.as_ref())
                .await?
                .ok_or_else(|| {
                    ServiceError::Unauthorized("linked account no longer exists".to_string())
                })?,
            None => {
                let email = profile
                    .email
                    .as_deref()
                    .filter(|_| profile.email_verified)
                    .map(normalize_email)
                    .ok_or_else(|| {
                        ServiceError::Unauthorized(
                            "the provider did not return a verified email address".to_string(),
                        )
                    })?;
                let user = find_user_by_email(self.db.as_ref(), &email)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::Unauthorized(
                            "no account exists for this identity".to_string(),
                        )
                    })?;

                oauth_account::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user.id),
                    provider: Set(provider_key),
                    provider_user_id: Set(profile.provider_user_id.clone()),
                    email: Set(Some(email)),
                    created_at: Set(Utc::now()),
                }
                .insert(self.db.as_ref())
                .await?;
                info!(user_id = %user.id, "Linked OAuth2 identity");
                user
            }
        };

        self.complete_sign_in(user, amr::OAUTH, None).await
    }

    async fn complete_sign_in(
        &self,
        user: user::Model,
        method: &str,
        client_ip: Option<&str>,
    ) -> Result<TokenPair, ServiceError> {
        if !user.active {
            return Err(AuthError::InactiveUser.into());
        }
        if let Some(ip) = client_ip {
            self.rate_limiter.record_success(ip, RateLimitType::Login).await;
        }

        let mut active: user::ActiveModel = user.into();
        active.last_login_at = Set(Some(Utc::now()));
        let user = active.update(self.db.as_ref()).await?;

        let tokens = self
            .auth
            .issue_tokens(self.db.as_ref(), &user, &[method.to_string()])
            .await?;
        self.event_sender
            .send_or_log(Event::SignedIn {
                user_id: user.id,
                method: method.to_string(),
            })
            .await;
        Ok(tokens)
    }

    /// Counts the failure against the caller's IP and builds the error to
    /// return: the lockout once it triggers, `Unauthorized` otherwise.
    async fn reject_sign_in(&self, client_ip: &str, method: &str, message: &str) -> ServiceError {
        self.event_sender
            .send_or_log(Event::SignInFailed {
                method: method.to_string(),
            })
            .await;
        match self
            .rate_limiter
            .record_failure(client_ip, RateLimitType::Login)
            .await
        {
            Err(locked) => locked.into(),
            Ok(()) => ServiceError::Unauthorized(message.to_string()),
        }
    }

    async fn find_active_user(&self, email: &str) -> Result<Option<user::Model>, ServiceError> {
        Ok(find_user_by_email(self.db.as_ref(), &normalize_email(email))
            .await?
            .filter(|u| u.active))
    }

    async fn load_user(&self, auth_user: &AuthUser) -> Result<user::Model, ServiceError> {
        user::Entity::find_by_id(auth_user.user_id)
            .filter(user::Column::CompanyId.eq(auth_user.company_id))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::Unauthorized("account no longer exists".to_string()))
    }

    async fn deliver(&self, notification: Notification) {
        let kind = notification.kind;
        if let Err(e) = self.notifier.send(notification).await {
            error!(?kind, error = %e, "Notification delivery failed");
        }
    }
}

pub(crate) async fn find_user_by_email<C>(
    conn: &C,
    email: &str,
) -> Result<Option<user::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    Ok(user::Entity::find()
        .filter(user::Column::Email.eq(email))
        .one(conn)
        .await?)
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Lowercase ASCII letters and digits joined by single dashes.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_dash = false;
    for c in value.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Acme Supply Co.", "acme-supply-co")]
    #[case("  north--WEST  depot ", "north-west-depot")]
    #[case("Ünïcode Store 7", "n-code-store-7")]
    #[case("!!!", "")]
    fn slugs(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(slugify(input), expected);
    }

    #[test]
    fn emails_are_normalized() {
        assert_eq!(normalize_email("  Ada@Example.COM "), "ada@example.com");
    }

    #[test]
    fn settings_follow_config() {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".into(),
            "k7Q2vN9xR4tB8mW1zL6pH3sJ0fD5gY9aC2eU7iO4nV8bX1qT6rM3wK5jG0hF9dS2".into(),
            900,
            86_400,
            "127.0.0.1".into(),
            9000,
            "development".into(),
        );
        cfg.otp_ttl_secs = 120;
        cfg.magic_link_base_url = Some("https://app.example.com/magic".into());

        let settings = AccountSettings::from(&cfg);
        assert_eq!(settings.otp_ttl, Duration::seconds(120));
        assert_eq!(settings.magic_link_base_url, "https://app.example.com/magic");
    }
}
