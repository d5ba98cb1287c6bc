//! Export and import endpoints (API v4)
//!
//! Both start a server-side job and poll `api/v4/{export|import}/{id}/status`
//! until it completes.

use super::{insert_opt, UpgradeType};
use crate::client::RulehubClient;
use crate::error::{ApiResult, SdkError};
use crate::executor::SDK_ID;
use crate::jobs::{job_id, AsyncJob};
use crate::locator::ServiceLocator;
use crate::request::{MultipartPart, RequestDescriptor};
use bytes::Bytes;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;

const API_VERSION: &str = "v4";

/// What to export; filters combine as a union
#[derive(Debug, Clone, Default)]
pub struct ExportFilters {
    /// Whole folders
    pub folders: Vec<String>,
    /// Individual services
    pub services: Vec<ServiceLocator>,
    /// Individual service versions
    pub version_ids: Vec<String>,
    /// Calling system, defaults to the SDK identifier
    pub source_system: Option<String>,
    /// Caller-chosen id to correlate calls
    pub correlation_id: Option<String>,
    /// Cancellation signal
    pub cancel: Option<CancellationToken>,
}

impl ExportFilters {
    /// Empty filter set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style method to add a folder
    #[must_use]
    pub fn folder(mut self, folder: impl Into<String>) -> Self {
        self.folders.push(folder.into());
        self
    }

    /// Builder-style method to add a service
    #[must_use]
    pub fn service(mut self, locator: ServiceLocator) -> Self {
        self.services.push(locator);
        self
    }

    /// Builder-style method to add a version id
    #[must_use]
    pub fn version_id(mut self, id: impl Into<String>) -> Self {
        self.version_ids.push(id.into());
        self
    }

    /// Whether no filter is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.folders.is_empty() && self.services.is_empty() && self.version_ids.is_empty()
    }

    fn body(&self) -> Value {
        let mut inputs = Map::new();
        if !self.folders.is_empty() {
            inputs.insert("folders".into(), json!(self.folders));
        }
        if !self.services.is_empty() {
            let services: Vec<String> = self.services.iter().map(|s| s.encode(false)).collect();
            inputs.insert("services".into(), json!(services));
        }
        if !self.version_ids.is_empty() {
            inputs.insert("version_ids".into(), json!(self.version_ids));
        }

        let mut body = Map::new();
        body.insert("inputs".into(), Value::Object(inputs));
        body.insert(
            "source_system".into(),
            self.source_system.as_deref().unwrap_or(SDK_ID).into(),
        );
        insert_opt(&mut body, "correlation_id", self.correlation_id.as_deref());
        Value::Object(body)
    }
}

/// A completed export
#[derive(Debug, Clone)]
pub struct Export {
    /// Completed export job
    pub job: AsyncJob,
}

impl Export {
    /// Signed URLs of the exported packages
    #[must_use]
    pub fn file_urls(&self) -> Vec<String> {
        self.job
            .outputs()
            .and_then(|o| o.get("files"))
            .and_then(Value::as_array)
            .map(|files| {
                files
                    .iter()
                    .filter_map(|f| f.get("file").or(Some(f)).and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Where an imported service lands
#[derive(Debug, Clone)]
pub struct ImportDestination {
    /// Service as named inside the package
    pub source: ServiceLocator,
    /// Service to create or update
    pub target: ServiceLocator,
    /// Version bump applied on update
    pub upgrade: UpgradeType,
}

/// Options for an import
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Calling system, defaults to the SDK identifier
    pub source_system: Option<String>,
    /// Caller-chosen id to correlate calls
    pub correlation_id: Option<String>,
    /// Cancellation signal
    pub cancel: Option<CancellationToken>,
}

/// Export/import API interface
#[derive(Clone)]
pub struct ImpexApi {
    client: RulehubClient,
}

impl ImpexApi {
    /// Create a new export/import API interface
    pub(crate) fn new(client: RulehubClient) -> Self {
        Self { client }
    }

    /// Export services and wait for the packages
    ///
    /// POST api/v4/export, then polls GET api/v4/export/{id}/status
    pub async fn export(&self, filters: ExportFilters) -> ApiResult<Export> {
        if filters.is_empty() {
            return Err(SdkError::new(
                "export requires at least one folder, service or version id",
            )
            .into());
        }

        let url = self.client.api_url(API_VERSION, "export")?;
        let mut descriptor = RequestDescriptor::post().json(filters.body())?;
        descriptor.cancel = filters.cancel.clone();

        let id = job_id(&self.client.send(&url, descriptor).await?.data)?;
        info!(job_id = %id, "Export started");

        let job = self.wait("export", &id, filters.cancel.as_ref()).await?;
        Ok(Export { job })
    }

    /// Download every package of a completed export
    ///
    /// A cancelled `cancel` token aborts the in-flight download with
    /// [`Error::Cancelled`](crate::error::Error::Cancelled).
    pub async fn download(
        &self,
        export: &Export,
        cancel: Option<&CancellationToken>,
    ) -> ApiResult<Vec<Bytes>> {
        let mut packages = Vec::new();
        for url in export.file_urls() {
            packages.push(self.client.download(&url, cancel).await?);
        }
        Ok(packages)
    }

    /// Import a package and wait for completion
    ///
    /// POST api/v4/import (multipart), then polls GET api/v4/import/{id}/status
    pub async fn import(
        &self,
        file_name: &str,
        content: impl Into<Bytes>,
        destinations: &[ImportDestination],
        options: ImportOptions,
    ) -> ApiResult<AsyncJob> {
        let url = self.client.api_url(API_VERSION, "import")?;
        let parts = vec![
            MultipartPart::data("importRequestEntity", import_entity(destinations, &options))?,
            MultipartPart::file("file", file_name, content).with_mime("application/zip"),
        ];
        let mut descriptor = RequestDescriptor::post().multipart(parts);
        descriptor.cancel = options.cancel.clone();

        let id = job_id(&self.client.send(&url, descriptor).await?.data)?;
        info!(job_id = %id, "Import started");

        self.wait("import", &id, options.cancel.as_ref()).await
    }

    async fn wait(
        &self,
        kind: &str,
        id: &str,
        cancel: Option<&CancellationToken>,
    ) -> ApiResult<AsyncJob> {
        let status_url = self
            .client
            .api_url(API_VERSION, &format!("{kind}/{id}/status"))?;
        self.client.poll_job(id, &status_url, cancel).await
    }
}

fn import_entity(destinations: &[ImportDestination], options: &ImportOptions) -> Value {
    let services_modify: Vec<Value> = destinations
        .iter()
        .map(|d| {
            json!({
                "service_uri_source": d.source.encode(false),
                "service_uri_destination": d.target.encode(false),
                "update_version_type": d.upgrade.as_str(),
            })
        })
        .collect();

    let mut entity = Map::new();
    entity.insert("inputs".into(), json!({ "services_modify": services_modify }));
    entity.insert(
        "source_system".into(),
        options.source_system.as_deref().unwrap_or(SDK_ID).into(),
    );
    insert_opt(&mut entity, "correlation_id", options.correlation_id.as_deref());
    Value::Object(entity)
}
