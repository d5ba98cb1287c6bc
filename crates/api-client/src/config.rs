//! Configuration for the rulehub client
//!
//! Supports environment-based configuration with sensible defaults.

use crate::auth::{default_token_url, AuthConfig, OAuthConfig};
use crate::error::{ApiResult, SdkError};
use crate::locator::parse_absolute;
use rulehub_core::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use url::Url;

/// Default request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Platform base URL, optionally followed by the tenant
    /// (`https://excel.uat.example.com/acme`)
    pub base_url: String,
    /// Tenant name; inferred from the base URL path when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Retry budget for 401 (OAuth) and 429 responses
    pub retry: RetryConfig,
    /// Status-read budget for server-side jobs
    #[serde(default = "RetryConfig::patient")]
    pub poll: RetryConfig,
    /// Credentials
    #[serde(default)]
    pub auth: AuthConfig,
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

impl ClientConfig {
    /// Configuration for a base URL with default timeout and retries
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            tenant: None,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryConfig::default(),
            poll: RetryConfig::patient(),
            auth: AuthConfig::default(),
        }
    }

    /// Create configuration from environment variables
    ///
    /// Reads the following environment variables:
    /// - `RULEHUB_BASE_URL` (required): platform base URL, optionally with tenant
    /// - `RULEHUB_TENANT`: tenant name
    /// - `RULEHUB_API_KEY`: static API key
    /// - `RULEHUB_BEARER_TOKEN`: bearer token
    /// - `RULEHUB_CLIENT_ID` / `RULEHUB_CLIENT_SECRET`: OAuth2 client credentials
    /// - `RULEHUB_OAUTH_PATH`: JSON file holding OAuth2 client credentials
    /// - `RULEHUB_TIMEOUT_SECS`: request timeout in seconds
    /// - `RULEHUB_MAX_RETRIES`: retry budget
    /// - `RULEHUB_RETRY_INTERVAL_MS`: base backoff interval
    pub fn from_env() -> ApiResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ApiResult<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let base_url = get("RULEHUB_BASE_URL")
            .ok_or_else(|| SdkError::new("RULEHUB_BASE_URL is not set"))?;

        let oauth = match (get("RULEHUB_OAUTH_PATH"), get("RULEHUB_CLIENT_ID")) {
            (Some(path), _) => Some(OAuthConfig::from_file(path)?),
            (None, Some(client_id)) => Some(OAuthConfig::new(
                client_id,
                get("RULEHUB_CLIENT_SECRET").unwrap_or_default(),
            )),
            (None, None) => None,
        };

        let mut retry = RetryConfig::default();
        if let Some(raw) = get("RULEHUB_MAX_RETRIES") {
            retry.max_retries = parse_number("RULEHUB_MAX_RETRIES", &raw)?;
        }
        if let Some(raw) = get("RULEHUB_RETRY_INTERVAL_MS") {
            retry.retry_interval =
                Duration::from_millis(parse_number("RULEHUB_RETRY_INTERVAL_MS", &raw)?);
        }

        let timeout = match get("RULEHUB_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse_number("RULEHUB_TIMEOUT_SECS", &raw)?),
            None => DEFAULT_TIMEOUT,
        };

        Ok(Self {
            base_url,
            tenant: get("RULEHUB_TENANT"),
            timeout,
            retry,
            poll: RetryConfig::patient(),
            auth: AuthConfig {
                api_key: get("RULEHUB_API_KEY"),
                token: get("RULEHUB_BEARER_TOKEN"),
                oauth,
                allow_open: false,
            },
        })
    }

    /// Builder-style method to set base URL
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Builder-style method to set the tenant
    #[must_use]
    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    /// Builder-style method to set timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builder-style method to set retry config
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Builder-style method to set the job polling budget
    #[must_use]
    pub fn with_poll(mut self, poll: RetryConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Builder-style method to set credentials
    #[must_use]
    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    /// Tenant name, explicit or taken from the first base URL path segment
    pub fn tenant_name(&self) -> ApiResult<String> {
        if let Some(tenant) = self.tenant.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            return Ok(tenant.trim_matches('/').to_string());
        }

        let url = parse_absolute(self.base_url.trim())?;
        path_segments(&url)
            .first()
            .map(|s| (*s).to_string())
            .ok_or_else(|| {
                SdkError::new("tenant is required (set it explicitly or append it to base_url)")
                    .with_cause(self.base_url.clone())
                    .into()
            })
    }

    /// Base URL without the tenant segment and anything after it
    pub fn platform_url(&self) -> ApiResult<Url> {
        let tenant = self.tenant_name()?;
        let mut url = parse_absolute(self.base_url.trim())?;

        let kept: Vec<String> = path_segments(&url)
            .into_iter()
            .take_while(|segment| *segment != tenant)
            .map(str::to_string)
            .collect();
        url.set_path(&kept.join("/"));
        url.set_query(None);
        url.set_fragment(None);
        Ok(url)
    }

    /// OAuth token endpoint: the configured override, else derived from the
    /// base URL and tenant
    pub fn token_url(&self) -> ApiResult<Option<Url>> {
        if let Some(raw) = self.auth.oauth.as_ref().and_then(|o| o.token_url.as_deref()) {
            return parse_absolute(raw).map(Some);
        }
        Ok(default_token_url(&self.platform_url()?, &self.tenant_name()?))
    }

    /// Validate the configuration
    pub fn validate(&self) -> ApiResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(SdkError::new("base_url cannot be empty").into());
        }

        self.platform_url()?;

        if self.timeout.is_zero() {
            return Err(SdkError::new("timeout cannot be zero").into());
        }

        Ok(())
    }
}

fn path_segments(url: &Url) -> Vec<&str> {
    url.path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default()
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> ApiResult<T> {
    raw.trim().parse().map_err(|_| {
        SdkError::new(format!("{key} must be a non-negative integer"))
            .with_cause(raw.to_string())
            .into()
    })
}
