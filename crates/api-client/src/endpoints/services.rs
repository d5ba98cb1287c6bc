//! Service execution and compilation endpoints
//!
//! - `POST {locator}/execute`: run a service against a set of inputs
//! - `POST folders/{f}/services/{s}/upload`: upload a workbook, which starts a
//!   compilation job polled through `getcompilationprogess/{job_id}`

use super::{insert_opt, UpgradeType};
use crate::client::RulehubClient;
use crate::error::{ApiResult, SdkError};
use crate::executor::SDK_ID;
use crate::jobs::{job_id, AsyncJob};
use crate::locator::{Scheme, ServiceLocator};
use crate::request::{MultipartPart, RequestDescriptor};
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Default `call_purpose` sent with executions
const DEFAULT_CALL_PURPOSE: &str = "Single Execution";

/// Options for a service execution
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Free-text purpose recorded in the execution history
    pub call_purpose: Option<String>,
    /// Caller-chosen id to correlate calls
    pub correlation_id: Option<String>,
    /// Calling system, defaults to the SDK identifier
    pub source_system: Option<String>,
    /// Subservices to run; all when empty
    pub subservices: Vec<String>,
    /// Cancellation signal
    pub cancel: Option<CancellationToken>,
}

/// Execution response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResponse {
    /// Platform status string
    #[serde(default)]
    pub status: Option<String>,
    /// Outputs and diagnostics
    #[serde(default)]
    pub response_data: ExecuteData,
    /// Execution metadata (service id, version, timings)
    #[serde(default)]
    pub response_meta: Value,
}

/// Outputs and diagnostics of one execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteData {
    /// Output values
    #[serde(default)]
    pub outputs: Value,
    /// Warnings raised by the service
    #[serde(default)]
    pub warnings: Option<Value>,
    /// Errors raised by the service
    #[serde(default)]
    pub errors: Option<Value>,
}

/// Options for a compilation
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Version bump applied to the new service version
    pub upgrade: Option<UpgradeType>,
    /// Effective start date of the new version
    pub start_date: Option<DateTime<Utc>>,
    /// Effective end date of the new version
    pub end_date: Option<DateTime<Utc>>,
    /// Cancellation signal
    pub cancel: Option<CancellationToken>,
}

/// Result of an upload plus compilation
#[derive(Debug, Clone)]
pub struct Compilation {
    /// Upload response
    pub upload: Value,
    /// Completed compilation job
    pub job: AsyncJob,
}

/// Services API interface
#[derive(Clone)]
pub struct ServicesApi {
    client: RulehubClient,
}

impl ServicesApi {
    /// Create a new services API interface
    pub(crate) fn new(client: RulehubClient) -> Self {
        Self { client }
    }

    /// Execute a service
    ///
    /// POST {locator}/execute
    pub async fn execute(
        &self,
        locator: &ServiceLocator,
        inputs: Value,
        options: ExecuteOptions,
    ) -> ApiResult<ExecuteResponse> {
        let url = self.client.service_url(locator, Some("execute"))?;
        let body = json!({
            "request_data": { "inputs": inputs },
            "request_meta": execute_meta(locator, &options),
        });

        let mut descriptor = RequestDescriptor::post().json(body)?;
        descriptor.cancel = options.cancel;
        self.client.send(&url, descriptor).await?.json()
    }

    /// Upload a workbook and wait for its compilation
    ///
    /// POST folders/{f}/services/{s}/upload, then polls
    /// GET folders/{f}/services/{s}/getcompilationprogess/{job_id}
    pub async fn compile(
        &self,
        locator: &ServiceLocator,
        file_name: &str,
        content: impl Into<Bytes>,
        options: CompileOptions,
    ) -> ApiResult<Compilation> {
        if !matches!(locator.scheme(), Some(Scheme::FolderService { .. })) {
            return Err(SdkError::new("compilation requires a folder/service locator")
                .with_cause(locator.encode(true))
                .into());
        }

        let url = self.client.service_url(locator, Some("upload"))?;
        let parts = vec![
            MultipartPart::data("engineUploadRequestEntity", upload_entity(&options))?,
            MultipartPart::file("serviceFile", file_name, content),
        ];
        let mut descriptor = RequestDescriptor::post().multipart(parts);
        descriptor.cancel = options.cancel.clone();

        let upload = self.client.send(&url, descriptor).await?.data;
        let id = compilation_job_id(&upload)?;
        info!(job_id = %id, service = %locator, "Compilation started");

        let status_url = self
            .client
            .service_url(locator, Some(&format!("getcompilationprogess/{id}")))?;
        let job = self
            .client
            .poll_job(&id, &status_url, options.cancel.as_ref())
            .await?;

        Ok(Compilation { upload, job })
    }
}

fn execute_meta(locator: &ServiceLocator, options: &ExecuteOptions) -> Value {
    let mut meta = Map::new();
    meta.insert(
        "call_purpose".into(),
        options
            .call_purpose
            .as_deref()
            .unwrap_or(DEFAULT_CALL_PURPOSE)
            .into(),
    );
    meta.insert(
        "source_system".into(),
        options.source_system.as_deref().unwrap_or(SDK_ID).into(),
    );
    insert_opt(&mut meta, "correlation_id", options.correlation_id.as_deref());
    insert_opt(&mut meta, "service_id", locator.service_id.as_deref());
    insert_opt(&mut meta, "version_id", locator.version_id.as_deref());
    insert_opt(&mut meta, "version", locator.version.as_deref());
    if !options.subservices.is_empty() {
        meta.insert("subservice".into(), options.subservices.join(",").into());
    }
    Value::Object(meta)
}

fn upload_entity(options: &CompileOptions) -> Value {
    let format = |d: &DateTime<Utc>| d.to_rfc3339_opts(SecondsFormat::Millis, true);

    let mut data = Map::new();
    data.insert(
        "version_difference".into(),
        options.upgrade.unwrap_or_default().as_str().into(),
    );
    insert_opt(
        &mut data,
        "effective_start_date",
        options.start_date.as_ref().map(format).as_deref(),
    );
    insert_opt(
        &mut data,
        "effective_end_date",
        options.end_date.as_ref().map(format).as_deref(),
    );
    json!({ "request_data": data })
}

fn compilation_job_id(upload: &Value) -> ApiResult<String> {
    match upload
        .pointer("/response_data/nodegen_compilation_jobid")
        .and_then(Value::as_str)
    {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => job_id(upload),
    }
}
