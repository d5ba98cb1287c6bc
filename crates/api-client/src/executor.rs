//! Request executor
//!
//! Builds wire requests from a [`RequestDescriptor`], applies credentials and
//! interceptors, and decides per response whether to resend:
//!
//! - 401 under OAuth: refresh the token (single-flight) and resend
//! - 429: wait `x-retry-after` seconds, or exponential backoff, and resend
//! - any other status >= 400: classify into an [`ApiError`]
//!
//! Both retries share the `max_retries` budget of the client's
//! [`RetryConfig`]. Redirects are never followed.

use crate::auth::{AuthHeader, Credentials};
use crate::config::ClientConfig;
use crate::error::{
    snapshot_headers, ApiError, ApiResult, Error, ErrorCause, RequestSnapshot, ResponseSnapshot,
    SdkError,
};
use crate::middleware::Interceptor;
use crate::request::{EncodedBody, RequestDescriptor, ResponseEnvelope};
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::{redirect, Client, Method};
use rulehub_core::retry::RetryConfig;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument, Span};
use url::Url;
use uuid::Uuid;

/// Request correlation id header
pub const X_REQUEST_ID: &str = "x-request-id";

/// SDK identifier header
pub const X_SDK: &str = "x-rulehub-sdk";

/// Tenant header
pub const X_TENANT_NAME: &str = "x-tenant-name";

/// Server-provided wait, in seconds, on 429 responses
pub const X_RETRY_AFTER: &str = "x-retry-after";

/// SDK identifier sent with every request
pub const SDK_ID: &str = concat!("rulehub-rust/", env!("CARGO_PKG_VERSION"));

const USER_AGENT_VALUE: &str = concat!("rulehub-client/", env!("CARGO_PKG_VERSION"));

/// Outcome of one wire attempt
enum Attempt {
    Success(ResponseEnvelope),
    Retry(RetryReason),
    Fatal(Error),
}

enum RetryReason {
    /// Token rejected; carries the generation that was sent
    Unauthorized { generation: u64 },
    RateLimited { delay: Duration },
}

/// Sends requests for one client
#[derive(Clone)]
pub struct RequestExecutor {
    http: Client,
    base_headers: HeaderMap,
    credentials: Arc<Credentials>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    retry: RetryConfig,
    span: Span,
}

impl fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("credentials", &self.credentials)
            .field("interceptors", &self.interceptors.len())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl RequestExecutor {
    /// Build the HTTP client and credential provider for `config`
    pub fn new(config: &ClientConfig, span: Span) -> ApiResult<Self> {
        config.validate()?;
        let tenant = config.tenant_name()?;

        let mut base_headers = HeaderMap::new();
        base_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        base_headers.insert(HeaderName::from_static(X_SDK), HeaderValue::from_static(SDK_ID));
        base_headers.insert(
            HeaderName::from_static(X_TENANT_NAME),
            HeaderValue::from_str(&tenant).map_err(|_| {
                SdkError::new("tenant name is not a valid header value").with_cause(tenant.clone())
            })?,
        );

        let http = Client::builder()
            .timeout(config.timeout)
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| SdkError::new(format!("failed to build HTTP client: {e}")))?;

        let credentials = Credentials::new(&config.auth, config.token_url()?, http.clone(), span.clone())?;

        Ok(Self {
            http,
            base_headers,
            credentials: Arc::new(credentials),
            interceptors: Vec::new(),
            retry: config.retry.clone(),
            span,
        })
    }

    /// Register an interceptor; interceptors run in registration order
    pub fn add_interceptor(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    /// Shared credential provider
    #[must_use]
    pub fn credentials(&self) -> &Arc<Credentials> {
        &self.credentials
    }

    /// Retry policy
    #[must_use]
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Span this executor records under
    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Send a request, retrying 401 (OAuth only) and 429 responses
    ///
    /// The body is encoded before any network call, so malformed descriptors
    /// fail with an [`SdkError`] without touching the wire. Responses below
    /// 400 are returned as-is.
    pub async fn send(
        &self,
        url: &Url,
        mut descriptor: RequestDescriptor,
    ) -> ApiResult<ResponseEnvelope> {
        let body = descriptor.encode()?;
        let request_id = Uuid::new_v4().to_string();

        self.run(url, &mut descriptor, &body, &request_id)
            .instrument(self.span.clone())
            .await
    }

    async fn run(
        &self,
        url: &Url,
        descriptor: &mut RequestDescriptor,
        body: &EncodedBody,
        request_id: &str,
    ) -> ApiResult<ResponseEnvelope> {
        let start = Instant::now();
        loop {
            let attempt = cancellable(
                descriptor.cancel.as_ref(),
                self.attempt(url, descriptor, body, request_id),
            )
            .await?;

            match attempt {
                Attempt::Success(envelope) => {
                    debug!(
                        request_id = %request_id,
                        status = envelope.status,
                        retries = descriptor.retries,
                        elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
                        "Request succeeded"
                    );
                    return Ok(envelope);
                }
                Attempt::Fatal(err) => {
                    debug!(
                        request_id = %request_id,
                        retries = descriptor.retries,
                        error = %err,
                        "Request failed, not retrying"
                    );
                    return Err(err);
                }
                Attempt::Retry(RetryReason::Unauthorized { generation }) => {
                    descriptor.retries += 1;
                    debug!(
                        request_id = %request_id,
                        attempt = descriptor.retries,
                        "Unauthorized, refreshing token before retry"
                    );
                    cancellable(
                        descriptor.cancel.as_ref(),
                        self.credentials.refresh_if_stale(generation),
                    )
                    .await??;
                }
                Attempt::Retry(RetryReason::RateLimited { delay }) => {
                    descriptor.retries += 1;
                    warn!(
                        request_id = %request_id,
                        attempt = descriptor.retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Rate limited, retrying after delay"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Fetch an absolute URL with a plain GET and return the raw bytes
    ///
    /// No credentials, body encoding or retries are applied; any non-2xx
    /// response is an [`ApiError`].
    pub async fn download(
        &self,
        url: &Url,
        cancel: Option<&CancellationToken>,
    ) -> ApiResult<Bytes> {
        let request_id = Uuid::new_v4().to_string();
        let request = self
            .http
            .request(Method::GET, url.clone())
            .headers(self.base_headers.clone())
            .header(X_REQUEST_ID, &request_id)
            .build()
            .map_err(|e| SdkError::new(format!("failed to build request: {e}")))?;
        let snapshot = snapshot_request(&request, None);

        let fetch = async {
            let response = self
                .http
                .execute(request)
                .await
                .map_err(|e| transport_error(&request_id, snapshot.clone(), &e))?;
            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let raw = response
                .bytes()
                .await
                .map_err(|e| transport_error(&request_id, snapshot.clone(), &e))?;

            if !(200..300).contains(&status) {
                let envelope = ResponseEnvelope::new(status, headers, raw);
                return Err(classify(&request_id, snapshot.clone(), &envelope));
            }

            debug!(request_id = %request_id, bytes = raw.len(), "Download complete");
            Ok::<Bytes, Error>(raw)
        };

        cancellable(cancel, fetch).instrument(self.span.clone()).await?
    }

    async fn attempt(
        &self,
        url: &Url,
        descriptor: &RequestDescriptor,
        body: &EncodedBody,
        request_id: &str,
    ) -> Attempt {
        let auth = match self.credentials.authorization().await {
            Ok(auth) => auth,
            Err(e) => return Attempt::Fatal(e),
        };
        let generation = auth.as_ref().map_or(0, |a| a.generation);

        let mut request = match self.build(url, descriptor, body, request_id, auth) {
            Ok(request) => request,
            Err(e) => return Attempt::Fatal(e),
        };
        for interceptor in &self.interceptors {
            if let Err(e) = interceptor.before_send(&mut request) {
                return Attempt::Fatal(e);
            }
        }
        let snapshot = snapshot_request(&request, body.snapshot());

        debug!(
            request_id = %request_id,
            method = %request.method(),
            url = %request.url(),
            attempt = descriptor.retries + 1,
            "Sending request"
        );

        let response = match self.http.execute(request).await {
            Ok(response) => response,
            Err(e) => return Attempt::Fatal(transport_error(request_id, snapshot, &e)),
        };
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let raw = match response.bytes().await {
            Ok(raw) => raw,
            Err(e) => return Attempt::Fatal(transport_error(request_id, snapshot, &e)),
        };

        let mut envelope = ResponseEnvelope::new(status, headers, raw);
        for interceptor in &self.interceptors {
            if let Err(e) = interceptor.after_receive(&mut envelope) {
                return Attempt::Fatal(e);
            }
        }

        if envelope.status < 400 {
            return Attempt::Success(envelope);
        }

        let can_retry = self.retry.can_retry(descriptor.retries);
        match envelope.status {
            401 if can_retry && self.credentials.is_oauth() => {
                Attempt::Retry(RetryReason::Unauthorized { generation })
            }
            429 if can_retry => {
                let delay = rate_limit_delay(&self.retry, &envelope, descriptor.retries);
                Attempt::Retry(RetryReason::RateLimited { delay })
            }
            _ => Attempt::Fatal(classify(request_id, snapshot, &envelope)),
        }
    }

    fn build(
        &self,
        url: &Url,
        descriptor: &RequestDescriptor,
        body: &EncodedBody,
        request_id: &str,
        auth: Option<AuthHeader>,
    ) -> ApiResult<reqwest::Request> {
        let mut extra = descriptor.headers.clone();
        if matches!(body, EncodedBody::Multipart(_)) {
            // reqwest appends its own boundary-bearing content type
            extra.remove(CONTENT_TYPE);
        }

        let builder = self
            .http
            .request(descriptor.method.clone(), url.clone())
            .headers(self.base_headers.clone())
            .headers(extra);

        let builder = match body {
            EncodedBody::Empty => builder,
            EncodedBody::Bytes { bytes, .. } => builder.body(bytes.clone()),
            EncodedBody::Multipart(parts) => {
                let mut form = reqwest::multipart::Form::new();
                for part in parts {
                    form = form.part(part.name.clone(), part.to_part()?);
                }
                builder.multipart(form)
            }
        };

        let mut request = builder
            .build()
            .map_err(|e| SdkError::new(format!("failed to build request: {e}")))?;

        // insert, not append: these replace anything the caller supplied
        let headers = request.headers_mut();
        headers.insert(
            HeaderName::from_static(X_REQUEST_ID),
            HeaderValue::from_str(request_id)
                .map_err(|_| SdkError::new("request id is not a valid header value"))?,
        );
        if let Some(auth) = auth {
            headers.insert(auth.name, auth.value);
        }
        if let EncodedBody::Bytes { content_type, .. } = body {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type.as_str()));
        }

        Ok(request)
    }
}

/// Race `fut` against the cancellation token, if any
async fn cancellable<F: Future>(cancel: Option<&CancellationToken>, fut: F) -> ApiResult<F::Output> {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            () = token.cancelled() => Err(Error::Cancelled),
            out = fut => Ok(out),
        },
        None => Ok(fut.await),
    }
}

/// Server-requested wait from `x-retry-after`, in (possibly fractional) seconds
fn retry_after(envelope: &ResponseEnvelope) -> Option<Duration> {
    let secs: f64 = envelope.header(X_RETRY_AFTER)?.trim().parse().ok()?;
    // out-of-range values fall back to backoff
    Duration::try_from_secs_f64(secs).ok()
}

/// Wait before resending a 429 made after `retries` earlier resends
fn rate_limit_delay(retry: &RetryConfig, envelope: &ResponseEnvelope, retries: u32) -> Duration {
    retry_after(envelope).unwrap_or_else(|| retry.delay_for_attempt(retries))
}

fn snapshot_request(request: &reqwest::Request, body: Option<serde_json::Value>) -> RequestSnapshot {
    RequestSnapshot {
        url: request.url().to_string(),
        method: request.method().to_string(),
        headers: snapshot_headers(request.headers()),
        body,
    }
}

fn classify(request_id: &str, request: RequestSnapshot, envelope: &ResponseEnvelope) -> Error {
    let response = ResponseSnapshot {
        status: envelope.status,
        headers: snapshot_headers(&envelope.headers),
        body: envelope.data.clone(),
        raw: envelope.raw.clone(),
    };
    ApiError::classify(
        envelope.status,
        request_id,
        None,
        ErrorCause {
            request,
            response: Some(response),
        },
    )
    .into()
}

fn transport_error(request_id: &str, request: RequestSnapshot, err: &reqwest::Error) -> Error {
    warn!(request_id = %request_id, url = %request.url, error = %err, "Transport failure");
    ApiError::classify(
        0,
        request_id,
        Some(err.to_string()),
        ErrorCause {
            request,
            response: None,
        },
    )
    .into()
}
