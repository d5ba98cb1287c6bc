//! Request/response interceptors
//!
//! Interceptors registered on a client run for every wire request, including
//! retries: `before_send` hooks in registration order just before dispatch,
//! `after_receive` hooks in registration order once the body is read.

use crate::error::ApiResult;
use crate::request::ResponseEnvelope;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::fmt;

/// Hook into the request pipeline
pub trait Interceptor: Send + Sync {
    /// Inspect or rewrite the outgoing request
    fn before_send(&self, _request: &mut reqwest::Request) -> ApiResult<()> {
        Ok(())
    }

    /// Inspect or rewrite the received response
    fn after_receive(&self, _response: &mut ResponseEnvelope) -> ApiResult<()> {
        Ok(())
    }
}

/// Adds fixed headers to every request, without overriding existing ones
#[derive(Clone, Default)]
pub struct StaticHeaders {
    headers: HeaderMap,
}

impl StaticHeaders {
    /// Empty header set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style method to add a header; invalid pairs are skipped
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }
}

impl fmt::Debug for StaticHeaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticHeaders")
            .field("names", &self.headers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Interceptor for StaticHeaders {
    fn before_send(&self, request: &mut reqwest::Request) -> ApiResult<()> {
        for (name, value) in &self.headers {
            if !request.headers().contains_key(name) {
                request.headers_mut().insert(name.clone(), value.clone());
            }
        }
        Ok(())
    }
}
