//! Execution history endpoints

use super::insert_opt;
use crate::client::RulehubClient;
use crate::error::{ApiResult, SdkError};
use crate::executor::SDK_ID;
use crate::jobs::{job_id, AsyncJob};
use crate::locator::ServiceLocator;
use crate::request::RequestDescriptor;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Log file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Comma-separated values
    #[default]
    Csv,
    /// JSON lines
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Csv => f.write_str("csv"),
            Self::Json => f.write_str("json"),
        }
    }
}

/// Which execution logs to extract
#[derive(Debug, Clone, Default)]
pub struct HistoryOptions {
    /// Specific call ids; all calls in range when empty
    pub call_ids: Vec<String>,
    /// Range start
    pub start_date: Option<DateTime<Utc>>,
    /// Range end
    pub end_date: Option<DateTime<Utc>>,
    /// Calling system, defaults to the SDK identifier
    pub source_system: Option<String>,
    /// Caller-chosen id to correlate calls
    pub correlation_id: Option<String>,
    /// Cancellation signal
    pub cancel: Option<CancellationToken>,
}

/// Downloaded execution logs
#[derive(Debug, Clone)]
pub struct LogDownload {
    /// Completed extraction job
    pub job: AsyncJob,
    /// File content
    pub content: Bytes,
}

/// History API interface
#[derive(Clone)]
pub struct HistoryApi {
    client: RulehubClient,
}

impl HistoryApi {
    /// Create a new history API interface
    pub(crate) fn new(client: RulehubClient) -> Self {
        Self { client }
    }

    /// Extract execution logs of a service and download them
    ///
    /// POST {locator}/download/{format}, polls
    /// GET {locator}/download/{format}/status/{job_id} until progress reaches
    /// 100, then fetches the returned `download_url`.
    pub async fn download(
        &self,
        locator: &ServiceLocator,
        format: LogFormat,
        options: HistoryOptions,
    ) -> ApiResult<LogDownload> {
        let url = self
            .client
            .service_url(locator, Some(&format!("download/{format}")))?;
        let mut descriptor = RequestDescriptor::post().json(download_body(locator, &options))?;
        descriptor.cancel = options.cancel.clone();

        let id = job_id(&self.client.send(&url, descriptor).await?.data)?;
        info!(job_id = %id, service = %locator, %format, "Log extraction started");

        let status_url = self
            .client
            .service_url(locator, Some(&format!("download/{format}/status/{id}")))?;
        let job = self
            .client
            .poll_job(&id, &status_url, options.cancel.as_ref())
            .await?;

        let download_url = job
            .field("download_url")
            .and_then(Value::as_str)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                SdkError::new(format!("log extraction job {id} returned no download_url"))
                    .with_cause(job.result.clone().unwrap_or(Value::Null))
            })?
            .to_string();

        let content = self
            .client
            .download(&download_url, options.cancel.as_ref())
            .await?;
        Ok(LogDownload { job, content })
    }
}

fn download_body(locator: &ServiceLocator, options: &HistoryOptions) -> Value {
    let format = |d: &DateTime<Utc>| d.to_rfc3339_opts(SecondsFormat::Millis, true);

    let mut data = Map::new();
    if !options.call_ids.is_empty() {
        data.insert("call_ids".into(), json!(options.call_ids));
    }
    insert_opt(
        &mut data,
        "start_date",
        options.start_date.as_ref().map(format).as_deref(),
    );
    insert_opt(
        &mut data,
        "end_date",
        options.end_date.as_ref().map(format).as_deref(),
    );

    let mut meta = Map::new();
    insert_opt(&mut meta, "version_id", locator.version_id.as_deref());
    meta.insert("call_purpose".into(), "Log Download".into());
    meta.insert(
        "source_system".into(),
        options.source_system.as_deref().unwrap_or(SDK_ID).into(),
    );
    insert_opt(&mut meta, "correlation_id", options.correlation_id.as_deref());

    json!({ "request_data": data, "request_meta": meta })
}
