//! Client for the rulehub business-rules platform
//!
//! This crate provides a resilient HTTP client for locating, executing and
//! managing rulehub services.
//!
//! # Features
//!
//! - **Service locators**: `folder/service[version]`, `service/{id}`,
//!   `version/{id}` and `proxy/{path}` addressing, parsed once and passed typed
//! - **Authentication**: API key, bearer token or OAuth2 client credentials with
//!   single-flight token refresh
//! - **Targeted retries**: 401 under OAuth (after refresh) and 429 (honoring
//!   `x-retry-after`), nothing else
//! - **Job polling**: compilation, export, import and log extraction wait on
//!   server-side jobs with bounded, jittered backoff
//! - **Request correlation**: every call carries a unique `x-request-id`
//!
//! # Example
//!
//! ```rust,no_run
//! use rulehub_client::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Reads RULEHUB_BASE_URL, RULEHUB_API_KEY, ...
//!     let client = RulehubClient::new()?;
//!
//!     let locator: ServiceLocator = "pricing/quote[1.4.0]".parse()?;
//!     let response = client
//!         .services()
//!         .execute(&locator, json!({"age": 42}), ExecuteOptions::default())
//!         .await?;
//!     println!("{}", response.response_data.outputs);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod client;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod executor;
pub mod jobs;
pub mod locator;
pub mod middleware;
pub mod request;

pub use client::RulehubClient;
pub use config::ClientConfig;
pub use error::{ApiError, ApiErrorKind, ApiResult, Error, SdkError};
pub use locator::ServiceLocator;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::auth::{AuthConfig, OAuthConfig};
    pub use crate::client::RulehubClient;
    pub use crate::config::ClientConfig;
    pub use crate::endpoints::{
        ExecuteOptions, ExportFilters, HistoryApi, HistoryOptions, ImpexApi, ImportDestination,
        ImportOptions, LogFormat, ServicesApi, UpgradeType,
    };
    pub use crate::error::{ApiError, ApiErrorKind, ApiResult, Error, SdkError};
    pub use crate::jobs::{AsyncJob, JobStatus};
    pub use crate::locator::ServiceLocator;
    pub use crate::middleware::Interceptor;
    pub use crate::request::{MultipartPart, RequestDescriptor, ResponseEnvelope};
    pub use rulehub_core::retry::RetryConfig;
}
