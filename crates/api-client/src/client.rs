//! Main client implementation

use crate::auth::{AccessToken, Credentials};
use crate::config::ClientConfig;
use crate::endpoints::{HistoryApi, ImpexApi, ServicesApi};
use crate::error::ApiResult;
use crate::executor::RequestExecutor;
use crate::jobs::{poll_job, AsyncJob};
use crate::locator::{parse_absolute, resolve_url, ServiceLocator, UrlOptions};
use crate::middleware::Interceptor;
use crate::request::{RequestDescriptor, ResponseEnvelope};
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info_span, Span};
use url::Url;

/// rulehub platform client
///
/// Cheap to clone; clones share the HTTP connection pool and the credential
/// provider (and with it the cached OAuth token).
#[derive(Clone, Debug)]
pub struct RulehubClient {
    executor: Arc<RequestExecutor>,
    config: Arc<ClientConfig>,
    platform_url: Arc<str>,
    tenant: Arc<str>,
}

impl RulehubClient {
    /// Create a new client with configuration from environment
    pub fn new() -> ApiResult<Self> {
        let config = ClientConfig::from_env()?;
        Self::with_config(config)
    }

    /// Create a new client with specific configuration
    ///
    /// Records under a `rulehub` span.
    pub fn with_config(config: ClientConfig) -> ApiResult<Self> {
        Self::with_span(config, info_span!("rulehub"))
    }

    /// Create a new client recording under `span`
    pub fn with_span(config: ClientConfig, span: Span) -> ApiResult<Self> {
        let executor = RequestExecutor::new(&config, span)?;
        let platform_url = config.platform_url()?.as_str().trim_end_matches('/').into();
        let tenant = config.tenant_name()?.into();

        Ok(Self {
            executor: Arc::new(executor),
            config: Arc::new(config),
            platform_url,
            tenant,
        })
    }

    /// Builder-style method to register an interceptor
    ///
    /// Only affects this handle and clones made from it afterwards.
    #[must_use]
    pub fn with_interceptor(mut self, interceptor: impl Interceptor + 'static) -> Self {
        Arc::make_mut(&mut self.executor).add_interceptor(Arc::new(interceptor));
        self
    }

    /// Get the current configuration
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Tenant name
    #[must_use]
    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Base URL without the tenant
    #[must_use]
    pub fn platform_url(&self) -> &str {
        &self.platform_url
    }

    /// Shared credential provider
    #[must_use]
    pub fn credentials(&self) -> &Credentials {
        self.executor.credentials()
    }

    // -------------------------------------------------------------------------
    // Resource accessors
    // -------------------------------------------------------------------------

    /// Access service execution and compilation
    #[must_use]
    pub fn services(&self) -> ServicesApi {
        ServicesApi::new(self.clone())
    }

    /// Access export and import jobs
    #[must_use]
    pub fn impex(&self) -> ImpexApi {
        ImpexApi::new(self.clone())
    }

    /// Access execution history
    #[must_use]
    pub fn history(&self) -> HistoryApi {
        HistoryApi::new(self.clone())
    }

    // -------------------------------------------------------------------------
    // Low-level access
    // -------------------------------------------------------------------------

    /// URL for a locator under the default API version
    pub fn service_url(&self, locator: &ServiceLocator, endpoint: Option<&str>) -> ApiResult<Url> {
        let mut options = UrlOptions::new(&self.platform_url, &self.tenant);
        options.endpoint = endpoint;
        resolve_url(locator, &options)
    }

    /// URL for a path under `{base}/{tenant}/api/{api_version}`
    pub fn api_url(&self, api_version: &str, path: &str) -> ApiResult<Url> {
        UrlOptions::new(&self.platform_url, &self.tenant)
            .api_version(api_version)
            .join(path)
    }

    /// Send a request through the executor
    pub async fn send(&self, url: &Url, descriptor: RequestDescriptor) -> ApiResult<ResponseEnvelope> {
        self.executor.send(url, descriptor).await
    }

    /// GET a URL and return the decoded payload
    pub async fn get_json(&self, url: &Url, cancel: Option<&CancellationToken>) -> ApiResult<Value> {
        let mut descriptor = RequestDescriptor::get();
        descriptor.cancel = cancel.cloned();
        Ok(self.send(url, descriptor).await?.data)
    }

    /// Fetch an absolute URL (such as a signed file link) as raw bytes
    pub async fn download(&self, url: &str, cancel: Option<&CancellationToken>) -> ApiResult<Bytes> {
        let url = parse_absolute(url)?;
        self.executor.download(&url, cancel).await
    }

    /// Poll a job status URL with the configured polling budget
    pub async fn poll_job(
        &self,
        job_id: &str,
        status_url: &Url,
        cancel: Option<&CancellationToken>,
    ) -> ApiResult<AsyncJob> {
        poll_job(job_id, &self.config.poll, || self.get_json(status_url, cancel)).await
    }

    /// Fetch a fresh OAuth token
    pub async fn retrieve_token(&self) -> ApiResult<AccessToken> {
        self.credentials().retrieve_token().await
    }

    /// Replace the cached OAuth token
    pub async fn refresh_token(&self) -> ApiResult<AccessToken> {
        self.credentials().refresh_token().await
    }
}
