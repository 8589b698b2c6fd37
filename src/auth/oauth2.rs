/*!
 * # OAuth2 sign-in
 *
 * Authorization-code flow with PKCE against Google, GitHub and Microsoft.
 *
 * 1. `GET /auth/oauth2/:provider/authorize` returns the provider URL and the
 *    CSRF `state`; the PKCE verifier stays in memory keyed by that state.
 * 2. The provider redirects to `/auth/oauth2/:provider/callback?code&state`.
 * 3. The code is exchanged, the profile fetched, and the identity is linked to
 *    the existing user owning the verified email.
 */

use crate::errors::ServiceError;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use oauth2::{
    basic::BasicClient, reqwest::async_http_client, AuthUrl, AuthorizationCode, ClientId,
    ClientSecret, CsrfToken, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, Scope,
    TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum::{Display, EnumString};
use thiserror::Error;
use tracing::{info, warn};
use utoipa::ToSchema;

const USER_AGENT: &str = "stockroom-api/0.1";
const GITHUB_EMAILS_URL: &str = "https://api.github.com/user/emails";

#[derive(Error, Debug)]
pub enum OAuth2Error {
    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error("Invalid or expired state parameter")]
    InvalidState,

    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("Failed to fetch user info: {0}")]
    UserInfoFailed(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl From<OAuth2Error> for ServiceError {
    fn from(err: OAuth2Error) -> Self {
        match err {
            OAuth2Error::ProviderNotConfigured(p) => {
                ServiceError::NotFound(format!("OAuth2 provider '{}' is not available", p))
            }
            OAuth2Error::InvalidState => ServiceError::BadRequest(err.to_string()),
            OAuth2Error::TokenExchangeFailed(_) | OAuth2Error::UserInfoFailed(_) => {
                ServiceError::ExternalServiceError(err.to_string())
            }
            OAuth2Error::ConfigurationError(msg) => ServiceError::InternalError(msg),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OAuth2Provider {
    Google,
    GitHub,
    Microsoft,
}

/// Endpoints and credentials of one provider
#[derive(Debug, Clone, Deserialize)]
pub struct OAuth2ProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub token_url: String,
    pub user_info_url: String,
    pub redirect_url: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl OAuth2ProviderConfig {
    pub fn google(client_id: String, client_secret: String, redirect_url: String) -> Self {
        Self {
            client_id,
            client_secret,
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            user_info_url: "https://openidconnect.googleapis.com/v1/userinfo".to_string(),
            redirect_url,
            scopes: vec!["openid".into(), "email".into(), "profile".into()],
        }
    }

    pub fn github(client_id: String, client_secret: String, redirect_url: String) -> Self {
        Self {
            client_id,
            client_secret,
            auth_url: "https://github.com/login/oauth/authorize".to_string(),
            token_url: "https://github.com/login/oauth/access_token".to_string(),
            user_info_url: "https://api.github.com/user".to_string(),
            redirect_url,
            scopes: vec!["read:user".into(), "user:email".into()],
        }
    }

    /// Azure AD; `tenant_id` defaults to the multi-tenant `common` endpoint.
    pub fn microsoft(
        client_id: String,
        client_secret: String,
        redirect_url: String,
        tenant_id: Option<String>,
    ) -> Self {
        let tenant = tenant_id.unwrap_or_else(|| "common".to_string());
        Self {
            client_id,
            client_secret,
            auth_url: format!(
                "https://login.microsoftonline.com/{}/oauth2/v2.0/authorize",
                tenant
            ),
            token_url: format!(
                "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
                tenant
            ),
            user_info_url: "https://graph.microsoft.com/v1.0/me".to_string(),
            redirect_url,
            scopes: vec![
                "openid".into(),
                "email".into(),
                "profile".into(),
                "User.Read".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OAuth2Config {
    #[serde(default)]
    pub enabled: bool,
    pub google: Option<OAuth2ProviderConfig>,
    pub github: Option<OAuth2ProviderConfig>,
    pub microsoft: Option<OAuth2ProviderConfig>,
}

impl OAuth2Config {
    pub fn provider(&self, provider: OAuth2Provider) -> Option<&OAuth2ProviderConfig> {
        if !self.enabled {
            return None;
        }
        match provider {
            OAuth2Provider::Google => self.google.as_ref(),
            OAuth2Provider::GitHub => self.github.as_ref(),
            OAuth2Provider::Microsoft => self.microsoft.as_ref(),
        }
    }

    pub fn configured_providers(&self) -> Vec<OAuth2Provider> {
        [
            OAuth2Provider::Google,
            OAuth2Provider::GitHub,
            OAuth2Provider::Microsoft,
        ]
        .into_iter()
        .filter(|p| self.provider(*p).is_some())
        .collect()
    }
}

/// Profile fields used to link a provider identity to a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuth2Profile {
    pub provider: OAuth2Provider,
    pub provider_user_id: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AuthorizationUrlResponse {
    pub authorization_url: String,
    pub state: String,
    pub provider: OAuth2Provider,
}

struct PendingAuthorization {
    verifier: PkceCodeVerifier,
    provider: OAuth2Provider,
    created_at: DateTime<Utc>,
}

/// PKCE verifiers waiting for their callback, keyed by CSRF state.
pub struct OAuth2StateStore {
    pending: DashMap<String, PendingAuthorization>,
    ttl: Duration,
}

impl OAuth2StateStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            ttl,
        }
    }

    fn insert(&self, state: String, verifier: PkceCodeVerifier, provider: OAuth2Provider) {
        self.pending.insert(
            state,
            PendingAuthorization {
                verifier,
                provider,
                created_at: Utc::now(),
            },
        );
    }

    /// Removes the entry; stale entries and provider mismatches are rejected.
    fn take(
        &self,
        state: &str,
        provider: OAuth2Provider,
    ) -> Result<PkceCodeVerifier, OAuth2Error> {
        let (_, pending) = self
            .pending
            .remove(state)
            .ok_or(OAuth2Error::InvalidState)?;
        if pending.provider != provider || Utc::now() - pending.created_at > self.ttl {
            return Err(OAuth2Error::InvalidState);
        }
        Ok(pending.verifier)
    }

    pub fn purge_expired(&self) -> usize {
        let before = self.pending.len();
        let now = Utc::now();
        self.pending.retain(|_, p| now - p.created_at <= self.ttl);
        before - self.pending.len()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for OAuth2StateStore {
    fn default() -> Self {
        Self::new(Duration::minutes(10))
    }
}

#[derive(Clone)]
pub struct OAuth2Service {
    config: OAuth2Config,
    state_store: Arc<OAuth2StateStore>,
    http_client: reqwest::Client,
}

impl OAuth2Service {
    pub fn new(config: OAuth2Config) -> Self {
        Self {
            config,
            state_store: Arc::new(OAuth2StateStore::default()),
            http_client: reqwest::Client::new(),
        }
    }

    pub fn configured_providers(&self) -> Vec<OAuth2Provider> {
        self.config.configured_providers()
    }

    pub fn state_store(&self) -> &OAuth2StateStore {
        &self.state_store
    }

    fn provider_config(
        &self,
        provider: OAuth2Provider,
    ) -> Result<&OAuth2ProviderConfig, OAuth2Error> {
        self.config
            .provider(provider)
            .ok_or_else(|| OAuth2Error::ProviderNotConfigured(provider.to_string()))
    }

    fn build_client(&self, config: &OAuth2ProviderConfig) -> Result<BasicClient, OAuth2Error> {
        let config_err = |e: url::ParseError| OAuth2Error::ConfigurationError(e.to_string());
        Ok(BasicClient::new(
            ClientId::new(config.client_id.clone()),
            Some(ClientSecret::new(config.client_secret.clone())),
            AuthUrl::new(config.auth_url.clone()).map_err(config_err)?,
            Some(TokenUrl::new(config.token_url.clone()).map_err(config_err)?),
        )
        .set_redirect_uri(RedirectUrl::new(config.redirect_url.clone()).map_err(config_err)?))
    }

    /// Builds the provider redirect and remembers the PKCE verifier.
    pub fn authorization_url(
        &self,
        provider: OAuth2Provider,
    ) -> Result<AuthorizationUrlResponse, OAuth2Error> {
        let config = self.provider_config(provider)?;
        let client = self.build_client(config)?;
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let (auth_url, csrf_state) = client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(config.scopes.iter().cloned().map(Scope::new))
            .set_pkce_challenge(pkce_challenge)
            .url();

        let state = csrf_state.secret().clone();
        self.state_store
            .insert(state.clone(), pkce_verifier, provider);

        info!(provider = %provider, pending = self.state_store.len(), "Issued OAuth2 authorization URL");

        Ok(AuthorizationUrlResponse {
            authorization_url: auth_url.to_string(),
            state,
            provider,
        })
    }

    /// Exchanges the callback code and fetches the provider profile.
    pub async fn complete(
        &self,
        provider: OAuth2Provider,
        code: String,
        state: &str,
    ) -> Result<OAuth2Profile, OAuth2Error> {
        let config = self.provider_config(provider)?;
        let verifier = self.state_store.take(state, provider)?;
        let client = self.build_client(config)?;

        let token = client
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(verifier)
            .request_async(async_http_client)
            .await
            .map_err(|e| OAuth2Error::TokenExchangeFailed(e.to_string()))?;
        let access_token = token.access_token().secret();

        let raw = self.get_json(&config.user_info_url, access_token).await?;
        let mut profile = match provider {
            OAuth2Provider::Google => parse_google_profile(&raw)?,
            OAuth2Provider::GitHub => parse_github_profile(&raw)?,
            OAuth2Provider::Microsoft => parse_microsoft_profile(&raw)?,
        };

        if provider == OAuth2Provider::GitHub && profile.email.is_none() {
            match self.get_json(GITHUB_EMAILS_URL, access_token).await {
                Ok(emails) => profile.email = primary_github_email(&emails),
                Err(err) => warn!(error = %err, "Could not read GitHub email addresses"),
            }
            profile.email_verified = profile.email.is_some();
        }

        info!(
            provider = %provider,
            provider_user_id = %profile.provider_user_id,
            email_verified = profile.email_verified,
            "Fetched OAuth2 profile"
        );

        Ok(profile)
    }

    async fn get_json(
        &self,
        url: &str,
        access_token: &str,
    ) -> Result<serde_json::Value, OAuth2Error> {
        let response = self
            .http_client
            .get(url)
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await
            .map_err(|e| OAuth2Error::UserInfoFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OAuth2Error::UserInfoFailed(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        response
            .json()
            .await
            .map_err(|e| OAuth2Error::UserInfoFailed(e.to_string()))
    }
}

fn required_field(raw: &serde_json::Value, field: &str) -> Result<String, OAuth2Error> {
    match &raw[field] {
        serde_json::Value::String(s) if !s.is_empty() => Ok(s.clone()),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        _ => Err(OAuth2Error::UserInfoFailed(format!(
            "Missing '{}' field",
            field
        ))),
    }
}

fn parse_google_profile(raw: &serde_json::Value) -> Result<OAuth2Profile, OAuth2Error> {
    Ok(OAuth2Profile {
        provider: OAuth2Provider::Google,
        provider_user_id: required_field(raw, "sub")?,
        email: raw["email"].as_str().map(str::to_lowercase),
        email_verified: raw["email_verified"].as_bool().unwrap_or(false),
        name: raw["name"].as_str().map(String::from),
    })
}

/// GitHub only exposes verified addresses through the emails endpoint, so
/// the public profile email is treated as unverified until confirmed there.
fn parse_github_profile(raw: &serde_json::Value) -> Result<OAuth2Profile, OAuth2Error> {
    Ok(OAuth2Profile {
        provider: OAuth2Provider::GitHub,
        provider_user_id: required_field(raw, "id")?,
        email: None,
        email_verified: false,
        name: raw["name"]
            .as_str()
            .or_else(|| raw["login"].as_str())
            .map(String::from),
    })
}

fn primary_github_email(emails: &serde_json::Value) -> Option<String> {
    let emails = emails.as_array()?;
    let verified = |e: &&serde_json::Value| e["verified"].as_bool() == Some(true);
    emails
        .iter()
        .filter(verified)
        .find(|e| e["primary"].as_bool() == Some(true))
        .or_else(|| emails.iter().find(verified))
        .and_then(|e| e["email"].as_str())
        .map(str::to_lowercase)
}

fn parse_microsoft_profile(raw: &serde_json::Value) -> Result<OAuth2Profile, OAuth2Error> {
    let email = raw["mail"]
        .as_str()
        .or_else(|| raw["userPrincipalName"].as_str())
        .map(str::to_lowercase);
    Ok(OAuth2Profile {
        provider: OAuth2Provider::Microsoft,
        provider_user_id: required_field(raw, "id")?,
        email_verified: email.is_some(),
        email,
        name: raw["displayName"].as_str().map(String::from),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn google_only() -> OAuth2Config {
        OAuth2Config {
            enabled: true,
            google: Some(OAuth2ProviderConfig::google(
                "id".into(),
                "secret".into(),
                "http://localhost:8080/auth/oauth2/google/callback".into(),
            )),
            github: None,
            microsoft: None,
        }
    }

    #[test]
    fn provider_parsing_is_case_insensitive() {
        assert_eq!("GitHub".parse::<OAuth2Provider>().unwrap(), OAuth2Provider::GitHub);
        assert_eq!("google".parse::<OAuth2Provider>().unwrap(), OAuth2Provider::Google);
        assert_eq!(OAuth2Provider::Microsoft.to_string(), "microsoft");
        assert!("okta".parse::<OAuth2Provider>().is_err());
    }

    #[test]
    fn disabled_config_exposes_no_providers() {
        let mut config = google_only();
        assert_eq!(config.configured_providers(), vec![OAuth2Provider::Google]);
        config.enabled = false;
        assert!(config.configured_providers().is_empty());
    }

    #[test]
    fn microsoft_tenant_is_used() {
        let config = OAuth2ProviderConfig::microsoft(
            "id".into(),
            "secret".into(),
            "http://localhost/cb".into(),
            Some("contoso".into()),
        );
        assert!(config.auth_url.contains("/contoso/"));
    }

    #[test]
    fn authorization_url_carries_pkce_and_state() {
        let service = OAuth2Service::new(google_only());
        let response = service.authorization_url(OAuth2Provider::Google).unwrap();
        assert!(response.authorization_url.contains("code_challenge="));
        assert!(response
            .authorization_url
            .contains(&format!("state={}", response.state)));
        assert_eq!(service.state_store().len(), 1);

        assert_matches!(
            service.authorization_url(OAuth2Provider::GitHub),
            Err(OAuth2Error::ProviderNotConfigured(_))
        );
    }

    #[test]
    fn state_is_single_use_and_bound_to_provider() {
        let store = OAuth2StateStore::default();
        store.insert(
            "s1".into(),
            PkceCodeVerifier::new("v".repeat(43)),
            OAuth2Provider::Google,
        );
        assert_matches!(
            store.take("s1", OAuth2Provider::GitHub),
            Err(OAuth2Error::InvalidState)
        );
        assert_matches!(
            store.take("s1", OAuth2Provider::Google),
            Err(OAuth2Error::InvalidState)
        );

        store.insert(
            "s2".into(),
            PkceCodeVerifier::new("v".repeat(43)),
            OAuth2Provider::Google,
        );
        assert!(store.take("s2", OAuth2Provider::Google).is_ok());
        assert!(store.is_empty());
    }

    #[test]
    fn expired_state_is_rejected_and_purged() {
        let store = OAuth2StateStore::new(Duration::zero());
        store.insert(
            "old".into(),
            PkceCodeVerifier::new("v".repeat(43)),
            OAuth2Provider::Google,
        );
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(store.purge_expired(), 1);
    }

    #[test]
    fn parses_provider_profiles() {
        let google = parse_google_profile(&json!({
            "sub": "1098", "email": "Ana@Example.com", "email_verified": true, "name": "Ana"
        }))
        .unwrap();
        assert_eq!(google.email.as_deref(), Some("ana@example.com"));
        assert!(google.email_verified);

        let github = parse_github_profile(&json!({"id": 42, "login": "ana"})).unwrap();
        assert_eq!(github.provider_user_id, "42");
        assert_eq!(github.name.as_deref(), Some("ana"));

        let microsoft = parse_microsoft_profile(&json!({
            "id": "abc", "userPrincipalName": "ana@contoso.com"
        }))
        .unwrap();
        assert_eq!(microsoft.email.as_deref(), Some("ana@contoso.com"));

        assert!(parse_google_profile(&json!({"email": "x@y.z"})).is_err());
    }

    #[test]
    fn github_primary_email_must_be_verified() {
        let emails = json!([
            {"email": "old@example.com", "primary": true, "verified": false},
            {"email": "Work@Example.com", "primary": false, "verified": true}
        ]);
        assert_eq!(
            primary_github_email(&emails).as_deref(),
            Some("work@example.com")
        );
        assert_eq!(primary_github_email(&json!([])), None);
    }

    #[test]
    fn errors_map_to_service_errors() {
        assert_matches!(
            ServiceError::from(OAuth2Error::ProviderNotConfigured("github".into())),
            ServiceError::NotFound(_)
        );
        assert_matches!(
            ServiceError::from(OAuth2Error::InvalidState),
            ServiceError::BadRequest(_)
        );
    }
}
