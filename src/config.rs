use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEV_DEFAULT_JWT_SECRET: &str =
    "stockroom_local_development_signing_key_not_for_production_use_9f3kQ7zX2mLw";

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL (postgres:// or sqlite://)
    pub database_url: String,

    /// JWT secret key (minimum 64 characters)
    #[validate(length(min = 64), custom = "validate_jwt_secret")]
    pub jwt_secret: String,

    /// Access token lifetime in seconds
    #[validate(range(min = 60, max = 86400))]
    pub jwt_expiration: usize,

    /// Refresh token lifetime in seconds
    #[validate(range(min = 3600, max = 2592000))]
    pub refresh_token_expiration: usize,

    /// JWT issuer name
    #[serde(default = "default_auth_issuer")]
    pub auth_issuer: String,

    /// JWT audience
    #[serde(default = "default_auth_audience")]
    pub auth_audience: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS outside development
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// DB pool
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,

    // ========== Pagination ==========
    #[serde(default = "default_api_page_size")]
    pub api_default_page_size: u64,
    #[serde(default = "default_api_max_page_size")]
    pub api_max_page_size: u64,

    /// Currency assigned to products and orders that do not name one
    #[serde(default = "default_currency")]
    pub default_currency: String,

    // ========== One-time codes, links and resets ==========
    /// Number of digits in an emailed one-time code
    #[serde(default = "default_otp_length")]
    #[validate(range(min = 4, max = 10))]
    pub otp_length: usize,
    #[serde(default = "default_otp_ttl_secs")]
    pub otp_ttl_secs: u64,
    /// Wrong guesses allowed before a code is burned
    #[serde(default = "default_otp_max_attempts")]
    #[validate(range(min = 1))]
    pub otp_max_attempts: i32,

    #[serde(default = "default_magic_link_ttl_secs")]
    pub magic_link_ttl_secs: u64,
    /// Front-end URL the magic link token is appended to
    #[serde(default)]
    pub magic_link_base_url: Option<String>,

    #[serde(default = "default_password_reset_ttl_secs")]
    pub password_reset_ttl_secs: u64,

    // ========== Rate limits ==========
    #[serde(default = "default_pin_max_attempts")]
    #[validate(range(min = 1))]
    pub pin_max_attempts: u32,
    #[serde(default = "default_pin_window_secs")]
    pub pin_window_secs: u64,
    #[serde(default = "default_pin_lockout_secs")]
    pub pin_lockout_secs: u64,

    #[serde(default = "default_login_max_attempts")]
    #[validate(range(min = 1))]
    pub login_max_attempts: u32,
    #[serde(default = "default_login_window_secs")]
    pub login_window_secs: u64,
    #[serde(default = "default_login_lockout_secs")]
    pub login_lockout_secs: u64,

    /// Stock-changing routes require a token that passed PIN verification
    #[serde(default)]
    pub pin_required_for_stock_changes: bool,

    // ========== OAuth2 Configuration ==========
    #[serde(default)]
    pub oauth2_enabled: bool,
    #[serde(default)]
    pub oauth2_google_client_id: Option<String>,
    #[serde(default)]
    pub oauth2_google_client_secret: Option<String>,
    #[serde(default)]
    pub oauth2_google_redirect_url: Option<String>,
    #[serde(default)]
    pub oauth2_github_client_id: Option<String>,
    #[serde(default)]
    pub oauth2_github_client_secret: Option<String>,
    #[serde(default)]
    pub oauth2_github_redirect_url: Option<String>,
    #[serde(default)]
    pub oauth2_microsoft_client_id: Option<String>,
    #[serde(default)]
    pub oauth2_microsoft_client_secret: Option<String>,
    #[serde(default)]
    pub oauth2_microsoft_redirect_url: Option<String>,
    /// Microsoft tenant (defaults to "common")
    #[serde(default)]
    pub oauth2_microsoft_tenant_id: Option<String>,
}

impl AppConfig {
    /// Creates a configuration with every optional knob at its default.
    pub fn new(
        database_url: String,
        jwt_secret: String,
        jwt_expiration: usize,
        refresh_token_expiration: usize,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            jwt_secret,
            jwt_expiration,
            refresh_token_expiration,
            auth_issuer: default_auth_issuer(),
            auth_audience: default_auth_audience(),
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            api_default_page_size: default_api_page_size(),
            api_max_page_size: default_api_max_page_size(),
            default_currency: default_currency(),
            otp_length: default_otp_length(),
            otp_ttl_secs: default_otp_ttl_secs(),
            otp_max_attempts: default_otp_max_attempts(),
            magic_link_ttl_secs: default_magic_link_ttl_secs(),
            magic_link_base_url: None,
            password_reset_ttl_secs: default_password_reset_ttl_secs(),
            pin_max_attempts: default_pin_max_attempts(),
            pin_window_secs: default_pin_window_secs(),
            pin_lockout_secs: default_pin_lockout_secs(),
            login_max_attempts: default_login_max_attempts(),
            login_window_secs: default_login_window_secs(),
            login_lockout_secs: default_login_lockout_secs(),
            pin_required_for_stock_changes: false,
            oauth2_enabled: false,
            oauth2_google_client_id: None,
            oauth2_google_client_secret: None,
            oauth2_google_redirect_url: None,
            oauth2_github_client_id: None,
            oauth2_github_client_secret: None,
            oauth2_github_redirect_url: None,
            oauth2_microsoft_client_id: None,
            oauth2_microsoft_client_secret: None,
            oauth2_microsoft_redirect_url: None,
            oauth2_microsoft_tenant_id: None,
        }
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Returns true if explicit CORS origins are configured
    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_ref()
            .map(|raw| raw.split(',').any(|origin| !origin.trim().is_empty()))
            .unwrap_or(false)
    }

    /// Whether we should fall back to permissive CORS
    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    pub fn auth_rate_limit_config(&self) -> crate::auth::AuthRateLimitConfig {
        crate::auth::AuthRateLimitConfig {
            login_max_attempts: self.login_max_attempts,
            login_window: Duration::from_secs(self.login_window_secs),
            login_lockout_duration: Duration::from_secs(self.login_lockout_secs),
            pin_max_attempts: self.pin_max_attempts,
            pin_window: Duration::from_secs(self.pin_window_secs),
            pin_lockout_duration: Duration::from_secs(self.pin_lockout_secs),
            ..Default::default()
        }
    }

    /// Build OAuth2 configuration from app config
    pub fn build_oauth2_config(&self) -> crate::auth::OAuth2Config {
        use crate::auth::{OAuth2Config, OAuth2ProviderConfig};

        let google = match (
            &self.oauth2_google_client_id,
            &self.oauth2_google_client_secret,
            &self.oauth2_google_redirect_url,
        ) {
            (Some(id), Some(secret), Some(redirect)) if !id.is_empty() => Some(
                OAuth2ProviderConfig::google(id.clone(), secret.clone(), redirect.clone()),
            ),
            _ => None,
        };

        let github = match (
            &self.oauth2_github_client_id,
            &self.oauth2_github_client_secret,
            &self.oauth2_github_redirect_url,
        ) {
            (Some(id), Some(secret), Some(redirect)) if !id.is_empty() => Some(
                OAuth2ProviderConfig::github(id.clone(), secret.clone(), redirect.clone()),
            ),
            _ => None,
        };

        let microsoft = match (
            &self.oauth2_microsoft_client_id,
            &self.oauth2_microsoft_client_secret,
            &self.oauth2_microsoft_redirect_url,
        ) {
            (Some(id), Some(secret), Some(redirect)) if !id.is_empty() => {
                Some(OAuth2ProviderConfig::microsoft(
                    id.clone(),
                    secret.clone(),
                    redirect.clone(),
                    self.oauth2_microsoft_tenant_id.clone(),
                ))
            }
            _ => None,
        };

        OAuth2Config {
            enabled: self.oauth2_enabled,
            google,
            github,
            microsoft,
        }
    }

    /// URL a magic-link token is appended to.
    pub fn magic_link_base_url(&self) -> String {
        self.magic_link_base_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}/auth/magic-link", self.host, self.port))
    }

    pub fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS for non-development environments or explicitly opt-in via APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if !self.is_development() && self.jwt_secret.trim() == DEV_DEFAULT_JWT_SECRET {
            let mut err = ValidationError::new("jwt_secret_default_dev");
            err.message = Some(
                "The bundled development JWT secret must not be used outside development. Set APP__JWT_SECRET to a unique value."
                    .into(),
            );
            errors.add("jwt_secret", err);
        }

        if self.db_min_connections > self.db_max_connections {
            let mut err = ValidationError::new("db_pool_bounds");
            err.message = Some("db_min_connections must not exceed db_max_connections".into());
            errors.add("db_min_connections", err);
        }

        if self.api_default_page_size == 0 || self.api_default_page_size > self.api_max_page_size
        {
            let mut err = ValidationError::new("page_size_bounds");
            err.message =
                Some("api_default_page_size must be between 1 and api_max_page_size".into());
            errors.add("api_default_page_size", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    20
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    10
}
fn default_db_idle_timeout_secs() -> u64 {
    300
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_api_page_size() -> u64 {
    20
}

fn default_api_max_page_size() -> u64 {
    100
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_otp_length() -> usize {
    6
}
fn default_otp_ttl_secs() -> u64 {
    600
}
fn default_otp_max_attempts() -> i32 {
    5
}

fn default_magic_link_ttl_secs() -> u64 {
    900
}

fn default_password_reset_ttl_secs() -> u64 {
    3600
}

fn default_pin_max_attempts() -> u32 {
    5
}
fn default_pin_window_secs() -> u64 {
    300
}
fn default_pin_lockout_secs() -> u64 {
    900
}

fn default_login_max_attempts() -> u32 {
    10
}
fn default_login_window_secs() -> u64 {
    300
}
fn default_login_lockout_secs() -> u64 {
    900
}

fn default_auth_issuer() -> String {
    "stockroom-api".to_string()
}

fn default_auth_audience() -> String {
    "stockroom-clients".to_string()
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    let trimmed = secret.trim();

    if trimmed.len() < 64 {
        let mut err = ValidationError::new("jwt_secret");
        err.message =
            Some("JWT secret must be at least 64 characters for adequate security".into());
        return Err(err);
    }

    const DISALLOWED: [&str; 3] = [
        "CHANGE_THIS_SECRET_IN_PRODUCTION",
        "your-secret-key",
        "default-secret-key",
    ];
    if DISALLOWED
        .iter()
        .any(|&bad| trimmed.eq_ignore_ascii_case(bad))
    {
        let mut err = ValidationError::new("jwt_secret");
        err.message = Some("JWT secret must be overridden with a secure random value".into());
        return Err(err);
    }

    let lower = trimmed.to_ascii_lowercase();
    let weak_fragments = ["changeme", "password", "12345", "abcdef"];
    if weak_fragments.iter().any(|pattern| lower.contains(pattern)) {
        let mut err = ValidationError::new("jwt_secret");
        err.message = Some(
            "JWT secret appears to be weak; use a cryptographically strong random string".into(),
        );
        return Err(err);
    }

    let unique_chars: std::collections::HashSet<char> = trimmed.chars().collect();
    if unique_chars.len() < 10 {
        let mut err = ValidationError::new("jwt_secret");
        err.message =
            Some("JWT secret must have at least 10 unique characters for adequate entropy".into());
        return Err(err);
    }

    Ok(())
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter.
/// `RUST_LOG` takes precedence when set.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("stockroom_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    // jwt_secret has no default; it must come from a file or APP__JWT_SECRET.
    let config = Config::builder()
        .set_default("database_url", "sqlite://stockroom.db?mode=rwc")?
        .set_default("jwt_expiration", 3600)?
        .set_default("refresh_token_expiration", 604800)?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET (minimum 64 characters).");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured. Set APP__JWT_SECRET environment variable."
                .into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
