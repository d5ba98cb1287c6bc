//! Authentication modes and OAuth token management
//!
//! Exactly one mode is active per client, chosen with precedence
//! `api_key > token > oauth`:
//!
//! - **API key**: static `x-synthetic-key` header
//! - **Bearer token**: `Authorization: Bearer <token>`
//! - **OAuth2 client credentials**: token fetched from the token endpoint,
//!   cached in memory and refreshed on demand
//! - **Open**: public-only access, no header (the literal `"open"` in any
//!   credential slot, or [`AuthConfig::open`])
//!
//! Token refresh is single-flight: callers that saw the same stale token wait
//! for one exchange instead of issuing their own.

use crate::error::{
    decode_body, snapshot_headers, ApiError, ApiResult, ErrorCause, RequestSnapshot,
    ResponseSnapshot, SdkError,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn, Instrument, Span};
use url::Url;
use uuid::Uuid;

/// Sentinel credential value granting public-only access
pub const OPEN_ACCESS: &str = "open";

/// Header carrying a static API key
pub const API_KEY_HEADER: &str = "x-synthetic-key";

/// Tokens this close to expiry are refreshed before use
const EXPIRY_SKEW_SECS: i64 = 30;

/// Authentication settings
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Static API key
    pub api_key: Option<String>,
    /// Bearer token
    pub token: Option<String>,
    /// OAuth2 client credentials
    pub oauth: Option<OAuthConfig>,
    /// Allow construction without credentials (public endpoints only)
    #[serde(default)]
    pub allow_open: bool,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("oauth", &self.oauth)
            .field("allow_open", &self.allow_open)
            .finish()
    }
}

impl AuthConfig {
    /// API key authentication
    pub fn api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
            ..Self::default()
        }
    }

    /// Bearer token authentication
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Self::default()
        }
    }

    /// OAuth2 client-credentials authentication
    #[must_use]
    pub fn oauth(oauth: OAuthConfig) -> Self {
        Self {
            oauth: Some(oauth),
            ..Self::default()
        }
    }

    /// Explicitly unauthenticated access to public endpoints
    #[must_use]
    pub fn open() -> Self {
        Self {
            allow_open: true,
            ..Self::default()
        }
    }

    /// Whether any credential is configured
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some() || self.token.is_some() || self.oauth.is_some()
    }
}

/// OAuth2 client credentials
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// Client id
    pub client_id: String,
    /// Client secret
    pub client_secret: String,
    /// Token endpoint override; derived from the base URL when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
}

impl fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("token_url", &self.token_url)
            .finish()
    }
}

impl OAuthConfig {
    /// Create client credentials
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_url: None,
        }
    }

    /// Load credentials from a JSON file with `client_id` and `client_secret`
    pub fn from_file(path: impl AsRef<Path>) -> ApiResult<Self> {
        let path = path.as_ref();
        let display = path.display().to_string();

        let contents = std::fs::read_to_string(path).map_err(|e| {
            SdkError::new(format!("failed to read OAuth credentials file: {e}"))
                .with_cause(display.clone())
        })?;

        serde_json::from_str(&contents).map_err(|e| {
            SdkError::new(format!("invalid OAuth credentials file: {e}"))
                .with_cause(display)
                .into()
        })
    }

    /// Builder-style method to set the token endpoint
    #[must_use]
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = Some(url.into());
        self
    }
}

/// Active authentication mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Static API key
    ApiKey,
    /// Bearer token
    Token,
    /// OAuth2 client credentials
    OAuth,
    /// Public-only access
    Open,
}

/// OAuth access token
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    /// Token value
    pub value: String,
    /// When the token was obtained
    pub issued_at: DateTime<Utc>,
    /// When the token expires, if the endpoint said
    pub expires_at: Option<DateTime<Utc>>,
    /// When the refresh grant expires, if the endpoint said
    pub refresh_expires_at: Option<DateTime<Utc>>,
    /// Token type (normally `Bearer`)
    pub token_type: Option<String>,
    /// Granted scope
    pub scope: Option<String>,
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"[REDACTED]")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("token_type", &self.token_type)
            .finish_non_exhaustive()
    }
}

impl AccessToken {
    /// Whether the token expires within `skew_secs` of `now`
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>, skew_secs: i64) -> bool {
        self.expires_at
            .is_some_and(|exp| exp - ChronoDuration::seconds(skew_secs) <= now)
    }

    fn from_response(resp: TokenResponse, issued_at: DateTime<Utc>) -> Self {
        let after = |secs: Option<i64>| secs.map(|s| issued_at + ChronoDuration::seconds(s));
        Self {
            value: resp.access_token,
            issued_at,
            expires_at: after(resp.expires_in),
            refresh_expires_at: after(resp.refresh_expires_in),
            token_type: resp.token_type,
            scope: resp.scope,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
    refresh_expires_in: Option<i64>,
    token_type: Option<String>,
    scope: Option<String>,
}

/// Authorization header for one outgoing request
#[derive(Debug, Clone)]
pub struct AuthHeader {
    /// Header name
    pub name: HeaderName,
    /// Header value
    pub value: HeaderValue,
    /// Token generation the header was built from (OAuth only)
    pub generation: u64,
}

enum Mode {
    ApiKey(String),
    Token(String),
    OAuth { config: OAuthConfig, token_url: Url },
    Open,
}

/// Credential provider shared by every request of a client
pub struct Credentials {
    mode: Mode,
    http: reqwest::Client,
    token: RwLock<Option<AccessToken>>,
    generation: AtomicU64,
    refresh_gate: Mutex<()>,
    span: Span,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("mode", &self.mode())
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

impl Credentials {
    /// Select the authentication mode
    ///
    /// `default_token_url` is used for OAuth when the config has no override.
    pub fn new(
        config: &AuthConfig,
        default_token_url: Option<Url>,
        http: reqwest::Client,
        span: Span,
    ) -> ApiResult<Self> {
        let mode = select_mode(config, default_token_url)?;
        Ok(Self {
            mode,
            http,
            token: RwLock::new(None),
            generation: AtomicU64::new(0),
            refresh_gate: Mutex::new(()),
            span,
        })
    }

    /// Active mode
    #[must_use]
    pub fn mode(&self) -> AuthMode {
        match self.mode {
            Mode::ApiKey(_) => AuthMode::ApiKey,
            Mode::Token(_) => AuthMode::Token,
            Mode::OAuth { .. } => AuthMode::OAuth,
            Mode::Open => AuthMode::Open,
        }
    }

    /// Whether OAuth is active (the only mode that refreshes on 401)
    #[must_use]
    pub fn is_oauth(&self) -> bool {
        matches!(self.mode, Mode::OAuth { .. })
    }

    /// Whether only public resources are reachable
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self.mode, Mode::Open)
    }

    /// Number of token exchanges completed so far
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Currently cached OAuth token
    pub async fn cached_token(&self) -> Option<AccessToken> {
        self.token.read().await.clone()
    }

    /// Authorization header for the next request
    ///
    /// In OAuth mode a missing or expiring token is fetched first.
    pub async fn authorization(&self) -> ApiResult<Option<AuthHeader>> {
        match &self.mode {
            Mode::ApiKey(key) => Ok(Some(AuthHeader {
                name: HeaderName::from_static(API_KEY_HEADER),
                value: header_value(key)?,
                generation: 0,
            })),
            Mode::Token(token) => Ok(Some(AuthHeader {
                name: AUTHORIZATION,
                value: header_value(&format!("Bearer {token}"))?,
                generation: 0,
            })),
            Mode::Open => Ok(None),
            Mode::OAuth { .. } => {
                let observed = self.generation();
                let usable = self
                    .token
                    .read()
                    .await
                    .as_ref()
                    .is_some_and(|t| !t.is_expired_at(Utc::now(), EXPIRY_SKEW_SECS));

                if !usable {
                    self.refresh_if_stale(observed).await?;
                }

                let guard = self.token.read().await;
                let token = guard
                    .as_ref()
                    .ok_or_else(|| SdkError::new("no OAuth access token available"))?;
                Ok(Some(AuthHeader {
                    name: AUTHORIZATION,
                    value: header_value(&format!("Bearer {}", token.value))?,
                    generation: self.generation(),
                }))
            }
        }
    }

    /// Fetch a token from the token endpoint and replace the cache
    pub async fn retrieve_token(&self) -> ApiResult<AccessToken> {
        let _gate = self.refresh_gate.lock().await;
        self.exchange_and_store().await
    }

    /// Refresh the cached token unconditionally
    pub async fn refresh_token(&self) -> ApiResult<AccessToken> {
        self.retrieve_token().await
    }

    /// Refresh unless another caller already replaced the token seen at
    /// `observed_generation`
    ///
    /// Returns `true` when this call performed the exchange.
    pub async fn refresh_if_stale(&self, observed_generation: u64) -> ApiResult<bool> {
        let _gate = self.refresh_gate.lock().await;

        if self.generation() != observed_generation {
            debug!(
                observed = observed_generation,
                current = self.generation(),
                "Token already refreshed by a concurrent caller"
            );
            return Ok(false);
        }

        self.exchange_and_store().await?;
        Ok(true)
    }

    // Caller holds `refresh_gate`.
    async fn exchange_and_store(&self) -> ApiResult<AccessToken> {
        let Mode::OAuth { config, token_url } = &self.mode else {
            return Err(SdkError::new(format!(
                "token refresh requires OAuth credentials (active mode: {:?})",
                self.mode()
            ))
            .into());
        };

        let token = exchange(&self.http, config, token_url)
            .instrument(self.span.clone())
            .await?;

        // token and generation change together so readers never pair them wrongly
        let mut slot = self.token.write().await;
        *slot = Some(token.clone());
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        drop(slot);

        self.span.in_scope(|| info!(generation, "OAuth access token refreshed"));
        Ok(token)
    }
}

fn select_mode(config: &AuthConfig, default_token_url: Option<Url>) -> ApiResult<Mode> {
    if let Some(key) = config.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
        return Ok(if key == OPEN_ACCESS {
            Mode::Open
        } else {
            Mode::ApiKey(key.to_string())
        });
    }

    if let Some(token) = config.token.as_deref().map(strip_bearer).filter(|t| !t.is_empty()) {
        return Ok(if token == OPEN_ACCESS {
            Mode::Open
        } else {
            Mode::Token(token.to_string())
        });
    }

    if let Some(oauth) = &config.oauth {
        if oauth.client_id.trim() == OPEN_ACCESS {
            return Ok(Mode::Open);
        }
        if oauth.client_id.trim().is_empty() || oauth.client_secret.is_empty() {
            return Err(SdkError::new("OAuth credentials require a client id and secret").into());
        }

        let token_url = match &oauth.token_url {
            Some(raw) => crate::locator::parse_absolute(raw)?,
            None => default_token_url.ok_or_else(|| {
                SdkError::new("OAuth token endpoint could not be derived from the base URL")
            })?,
        };
        return Ok(Mode::OAuth {
            config: oauth.clone(),
            token_url,
        });
    }

    if config.allow_open {
        return Ok(Mode::Open);
    }

    Err(SdkError::new(
        "no authentication configured: provide an API key, a bearer token or OAuth credentials",
    )
    .into())
}

/// Strip a leading `bearer` prefix in any case
fn strip_bearer(raw: &str) -> &str {
    let trimmed = raw.trim();
    match trimmed.get(..6) {
        Some(prefix)
            if prefix.eq_ignore_ascii_case("bearer")
                && trimmed[6..].starts_with(char::is_whitespace) =>
        {
            trimmed[6..].trim_start()
        }
        _ => trimmed,
    }
}

fn header_value(raw: &str) -> ApiResult<HeaderValue> {
    let mut value = HeaderValue::from_str(raw)
        .map_err(|_| SdkError::new("credential contains characters not allowed in a header"))?;
    value.set_sensitive(true);
    Ok(value)
}

async fn exchange(
    http: &reqwest::Client,
    config: &OAuthConfig,
    token_url: &Url,
) -> ApiResult<AccessToken> {
    let request_id = Uuid::new_v4().to_string();
    let snapshot = RequestSnapshot {
        url: token_url.to_string(),
        method: "POST".to_string(),
        headers: std::collections::BTreeMap::new(),
        body: Some(serde_json::json!({
            "grant_type": "client_credentials",
            "client_id": config.client_id,
        })),
    };

    debug!(request_id = %request_id, url = %token_url, "Requesting OAuth access token");

    let form = [
        ("grant_type", "client_credentials"),
        ("client_id", config.client_id.as_str()),
        ("client_secret", config.client_secret.as_str()),
    ];
    let issued_at = Utc::now();

    let response = match http
        .post(token_url.clone())
        .header("x-request-id", &request_id)
        .form(&form)
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            warn!(request_id = %request_id, error = %e, "Token endpoint unreachable");
            let cause = ErrorCause {
                request: snapshot,
                response: None,
            };
            return Err(ApiError::classify(0, request_id, Some(e.to_string()), cause).into());
        }
    };

    let status = response.status().as_u16();
    let headers = snapshot_headers(response.headers());
    let raw = response.bytes().await.map_err(|e| {
        ApiError::classify(
            0,
            request_id.clone(),
            Some(e.to_string()),
            ErrorCause {
                request: snapshot.clone(),
                response: None,
            },
        )
    })?;

    if !(200..300).contains(&status) {
        let cause = ErrorCause {
            request: snapshot,
            response: Some(ResponseSnapshot {
                status,
                headers,
                body: decode_body(&raw),
                raw,
            }),
        };
        return Err(ApiError::classify(status, request_id, None, cause).into());
    }

    let parsed: TokenResponse = serde_json::from_slice(&raw).map_err(|e| {
        SdkError::new(format!("invalid token endpoint response: {e}")).with_cause(decode_body(&raw))
    })?;

    Ok(AccessToken::from_response(parsed, issued_at))
}

/// Derive the OAuth token endpoint for a platform base URL and tenant
///
/// `https://excel.{env}.example.com` maps to
/// `https://keycloak.{env}.example.com/auth/realms/{tenant}/protocol/openid-connect/token`.
#[must_use]
pub fn default_token_url(base_url: &Url, tenant: &str) -> Option<Url> {
    let host = base_url.host_str()?;
    let host = host
        .strip_prefix("excel.")
        .map_or_else(|| host.to_string(), |rest| format!("keycloak.{rest}"));

    let mut url = base_url.clone();
    url.set_host(Some(&host)).ok()?;
    url.set_path(&format!(
        "auth/realms/{}/protocol/openid-connect/token",
        tenant.trim_matches('/')
    ));
    url.set_query(None);
    Some(url)
}
