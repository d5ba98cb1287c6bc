//! Error types for the rulehub client
//!
//! Two families are kept apart:
//! - [`SdkError`]: client-side misuse, raised before any network call (or
//!   when a poll budget runs out). Never carries an HTTP status.
//! - [`ApiError`]: server or transport failures, classified by status into an
//!   [`ApiErrorKind`] and carrying a snapshot of the failing exchange.

use bytes::Bytes;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Result type alias for client operations
pub type ApiResult<T> = Result<T, Error>;

/// Header values replaced in error snapshots
const REDACTED: &str = "[REDACTED]";

/// Headers whose values never appear in error snapshots
const SECRET_HEADERS: [&str; 2] = ["authorization", "x-synthetic-key"];

/// Client errors
#[derive(Error, Debug)]
pub enum Error {
    /// Client-side misuse or exhausted polling
    #[error(transparent)]
    Sdk(#[from] SdkError),

    /// Classified server or transport failure
    #[error(transparent)]
    Api(#[from] Box<ApiError>),

    /// A job reported its own failure
    #[error("Job {job_id} failed with status '{status}'")]
    JobFailed {
        /// Job id as issued by the platform
        job_id: String,
        /// Raw status string reported by the platform
        status: String,
        /// Last status payload
        response: Value,
    },

    /// The call was cancelled through its cancellation token
    #[error("Request cancelled")]
    Cancelled,
}

impl From<ApiError> for Error {
    fn from(err: ApiError) -> Self {
        Self::Api(Box::new(err))
    }
}

impl Error {
    /// Create an SDK error
    pub fn sdk(msg: impl Into<String>) -> Self {
        Self::Sdk(SdkError::new(msg))
    }

    /// HTTP status, when the error came from a response
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api(e) => Some(e.status),
            Self::Sdk(_) | Self::JobFailed { .. } | Self::Cancelled => None,
        }
    }

    /// Request id of the failing call, when known
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::Api(e) => Some(&e.request_id),
            Self::Sdk(_) | Self::JobFailed { .. } | Self::Cancelled => None,
        }
    }

    /// API error kind, when classified
    #[must_use]
    pub fn api_kind(&self) -> Option<ApiErrorKind> {
        match self {
            Self::Api(e) => Some(e.kind),
            Self::Sdk(_) | Self::JobFailed { .. } | Self::Cancelled => None,
        }
    }

    /// Check if this error is retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Api(e) if e.is_retryable())
    }
}

/// Client-side error (misuse, validation, exhausted polling)
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[error("SDK error: {message}")]
pub struct SdkError {
    /// Human-readable message
    pub message: String,
    /// Offending input or last observed payload
    pub cause: Option<Value>,
}

impl SdkError {
    /// Create an SDK error without cause
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    /// Attach a cause
    #[must_use]
    pub fn with_cause(mut self, cause: impl Into<Value>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}

/// Classification of an API failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApiErrorKind {
    /// No response (connection, timeout, body read)
    InternetError,
    /// 400
    BadRequestError,
    /// 401
    UnauthorizedError,
    /// 403
    ForbiddenError,
    /// 404
    NotFoundError,
    /// 409
    ConflictError,
    /// 429
    RateLimitError,
    /// 500
    InternalServerError,
    /// 503
    ServiceUnavailableError,
    /// Any other status
    ApiUnknownError,
}

impl ApiErrorKind {
    /// Map an HTTP status to its kind (0 means no response)
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        match status {
            0 => Self::InternetError,
            400 => Self::BadRequestError,
            401 => Self::UnauthorizedError,
            403 => Self::ForbiddenError,
            404 => Self::NotFoundError,
            409 => Self::ConflictError,
            429 => Self::RateLimitError,
            500 => Self::InternalServerError,
            503 => Self::ServiceUnavailableError,
            _ => Self::ApiUnknownError,
        }
    }

    /// Default message when the response body has none
    #[must_use]
    pub fn default_message(self) -> &'static str {
        match self {
            Self::InternetError => "failed to reach the platform",
            Self::BadRequestError => "invalid request",
            Self::UnauthorizedError => "missing or invalid credentials",
            Self::ForbiddenError => "access to this resource is forbidden",
            Self::NotFoundError => "resource not found",
            Self::ConflictError => "resource already exists or is in a conflicting state",
            Self::RateLimitError => "too many requests",
            Self::InternalServerError => "internal server error",
            Self::ServiceUnavailableError => "service unavailable",
            Self::ApiUnknownError => "unexpected API response",
        }
    }
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Snapshot of an outgoing request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestSnapshot {
    /// Absolute URL
    pub url: String,
    /// HTTP method
    pub method: String,
    /// Headers, secrets redacted
    pub headers: BTreeMap<String, String>,
    /// Encoded body, when representable as JSON
    pub body: Option<Value>,
}

/// Snapshot of a received response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    /// HTTP status
    pub status: u16,
    /// Response headers
    pub headers: BTreeMap<String, String>,
    /// Decoded body (JSON, or the text as a string)
    pub body: Value,
    /// Raw response bytes, serialized as a byte array
    #[serde(default)]
    pub raw: Bytes,
}

/// Full context of a failed exchange
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorCause {
    /// What was sent
    pub request: RequestSnapshot,
    /// What came back, absent for transport failures
    pub response: Option<ResponseSnapshot>,
}

/// Classified API failure
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[error("{kind} ({status}): {message} [request_id: {request_id}]")]
pub struct ApiError {
    /// Error classification
    pub kind: ApiErrorKind,
    /// HTTP status, 0 for transport failures
    pub status: u16,
    /// Client-generated request id
    pub request_id: String,
    /// Human-readable message
    pub message: String,
    /// Request/response snapshot
    pub cause: ErrorCause,
}

impl ApiError {
    /// Classify a failed exchange
    ///
    /// The message is taken from the response body (`message`, `error` or
    /// `error_description`) when present, else from `fallback`, else from the
    /// kind's default.
    #[must_use]
    pub fn classify(
        status: u16,
        request_id: impl Into<String>,
        fallback: Option<String>,
        cause: ErrorCause,
    ) -> Self {
        let kind = ApiErrorKind::from_status(status);
        let message = cause
            .response
            .as_ref()
            .and_then(|r| body_message(&r.body))
            .or(fallback)
            .unwrap_or_else(|| kind.default_message().to_string());

        Self {
            kind,
            status,
            request_id: request_id.into(),
            message,
            cause,
        }
    }

    /// Check if this error is retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ApiErrorKind::InternetError
                | ApiErrorKind::RateLimitError
                | ApiErrorKind::ServiceUnavailableError
        )
    }

    /// Check if this is a client error (4xx)
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// Check if this is a server error (5xx)
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }

    /// Serialized cause bundle
    #[must_use]
    pub fn cause_json(&self) -> Value {
        serde_json::to_value(&self.cause).unwrap_or(Value::Null)
    }
}

fn body_message(body: &Value) -> Option<String> {
    ["message", "error", "error_description"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

/// Convert headers into a sorted map, redacting credentials
pub(crate) fn snapshot_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let name = name.as_str().to_string();
            let value = if SECRET_HEADERS.contains(&name.as_str()) {
                REDACTED.to_string()
            } else {
                String::from_utf8_lossy(value.as_bytes()).into_owned()
            };
            (name, value)
        })
        .collect()
}

/// Decode a body for snapshots: JSON when possible, else text
pub(crate) fn decode_body(raw: &[u8]) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(raw)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(raw).into_owned()))
}
