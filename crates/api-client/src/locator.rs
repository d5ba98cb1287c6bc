//! Service locators and request URL resolution
//!
//! A service can be addressed four ways. Strings are decoded once at the
//! boundary into a typed [`ServiceLocator`]:
//!
//! | form | example |
//! |------|---------|
//! | folder + service | `my-folder/my-service[0.4.2]`, `folders/my-folder/services/my-service` |
//! | service id | `service/abc-123` |
//! | version id | `version/xyz-789` |
//! | proxy | `proxy/custom/endpoint` |
//!
//! Resolved URLs have the shape `{base}/{tenant}/api/{version}/[public/]{path}[/{endpoint}]`.

use crate::error::{ApiResult, SdkError};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Default API version segment
pub const DEFAULT_API_VERSION: &str = "v3";

/// Composite address of a service or service version
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceLocator {
    /// Folder name
    pub folder: Option<String>,
    /// Service name within the folder
    pub service: Option<String>,
    /// Service id
    pub service_id: Option<String>,
    /// Semantic version (folder/service form only)
    pub version: Option<String>,
    /// Version id
    pub version_id: Option<String>,
    /// Proxy path
    pub proxy: Option<String>,
    /// Address the public variant of the endpoint
    #[serde(default)]
    pub public: bool,
}

/// The addressing scheme a locator resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme<'a> {
    /// `folders/{folder}/services/{service}`
    FolderService {
        /// Folder name
        folder: &'a str,
        /// Service name
        service: &'a str,
    },
    /// `service/{id}`
    ServiceId(&'a str),
    /// `version/{id}`
    VersionId(&'a str),
    /// `proxy/{path}`
    Proxy(&'a str),
}

impl ServiceLocator {
    /// Locator for `folder/service`
    pub fn new(folder: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            folder: Some(folder.into()),
            service: Some(service.into()),
            ..Self::default()
        }
    }

    /// Locator for a service id
    pub fn from_service_id(id: impl Into<String>) -> Self {
        Self {
            service_id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Locator for a version id
    pub fn from_version_id(id: impl Into<String>) -> Self {
        Self {
            version_id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Locator for a proxy path
    pub fn from_proxy(path: impl Into<String>) -> Self {
        Self {
            proxy: Some(path.into()),
            ..Self::default()
        }
    }

    /// Builder-style method to pin a version
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Builder-style method to set the version id
    #[must_use]
    pub fn with_version_id(mut self, id: impl Into<String>) -> Self {
        self.version_id = Some(id.into());
        self
    }

    /// Builder-style method to address the public endpoint
    #[must_use]
    pub fn public(mut self) -> Self {
        self.public = true;
        self
    }

    /// Parse a locator string; unrecognized input yields an empty locator
    #[must_use]
    pub fn decode(input: &str) -> Self {
        let trimmed = input.trim().trim_matches('/');
        let parts: Vec<&str> = trimmed.split('/').collect();

        match parts.as_slice() {
            ["service", id] if valid_segment(id) => Self::from_service_id(*id),
            ["version", id] if valid_segment(id) => Self::from_version_id(*id),
            ["proxy", rest @ ..] if !rest.is_empty() && rest.iter().all(|s| !s.is_empty()) => {
                Self::from_proxy(rest.join("/"))
            }
            ["folders", folder, "services", service] | [folder, service] => {
                decode_folder_service(folder, service).unwrap_or_default()
            }
            _ => Self::default(),
        }
    }

    /// Render the locator as a string
    ///
    /// `long` selects `folders/f/services/s`, `service/{id}` and
    /// `version/{id}` over `f/s` and the bare id. Priority is
    /// version id, service id, folder + service, proxy.
    #[must_use]
    pub fn encode(&self, long: bool) -> String {
        if let Some(id) = &self.version_id {
            return if long { format!("version/{id}") } else { id.clone() };
        }
        if let Some(id) = &self.service_id {
            return if long { format!("service/{id}") } else { id.clone() };
        }
        if let (Some(folder), Some(service)) = (&self.folder, &self.service) {
            let mut out = if long {
                format!("folders/{folder}/services/{service}")
            } else {
                format!("{folder}/{service}")
            };
            if let Some(version) = &self.version {
                out.push('[');
                out.push_str(version);
                out.push(']');
            }
            return out;
        }
        if let Some(proxy) = &self.proxy {
            return format!("proxy/{}", proxy.trim_start_matches('/'));
        }
        String::new()
    }

    /// Active addressing scheme for request paths
    ///
    /// Priority is folder + service, service id, version id, proxy.
    #[must_use]
    pub fn scheme(&self) -> Option<Scheme<'_>> {
        if let (Some(folder), Some(service)) = (&self.folder, &self.service) {
            return Some(Scheme::FolderService { folder, service });
        }
        if let Some(id) = &self.service_id {
            return Some(Scheme::ServiceId(id));
        }
        if let Some(id) = &self.version_id {
            return Some(Scheme::VersionId(id));
        }
        self.proxy.as_deref().map(Scheme::Proxy)
    }

    /// Whether no addressing scheme is present
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scheme().is_none()
    }

    /// Relative request path, including `public/` and `endpoint`
    ///
    /// A proxy replaces the endpoint entirely.
    pub fn path(&self, endpoint: Option<&str>) -> ApiResult<String> {
        let scheme = self.scheme().ok_or_else(|| {
            SdkError::new("service locator is missing an addressing scheme").with_cause(self.to_cause())
        })?;

        let mut path = String::new();
        if self.public {
            path.push_str("public/");
        }

        match scheme {
            Scheme::FolderService { folder, service } => {
                path.push_str(&format!("folders/{folder}/services/{service}"));
            }
            Scheme::ServiceId(id) => path.push_str(&format!("service/{id}")),
            Scheme::VersionId(id) => path.push_str(&format!("version/{id}")),
            Scheme::Proxy(proxy) => {
                path.push_str(&format!("proxy/{}", proxy.trim_start_matches('/')));
                return Ok(path);
            }
        }

        if let Some(endpoint) = endpoint.map(|e| e.trim_matches('/')).filter(|e| !e.is_empty()) {
            path.push('/');
            path.push_str(endpoint);
        }
        Ok(path)
    }

    fn to_cause(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl FromStr for ServiceLocator {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::decode(s))
    }
}

impl fmt::Display for ServiceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode(true))
    }
}

fn valid_segment(s: &str) -> bool {
    !s.is_empty() && !s.contains(['[', ']'])
}

fn decode_folder_service(folder: &str, service: &str) -> Option<ServiceLocator> {
    if !valid_segment(folder) {
        return None;
    }

    let (service, version) = match service.split_once('[') {
        Some((name, rest)) => {
            let version = rest.strip_suffix(']')?;
            if version.is_empty() || version.contains(['[', ']']) {
                return None;
            }
            (name, Some(version))
        }
        None => (service, None),
    };

    if !valid_segment(service) {
        return None;
    }

    let locator = ServiceLocator::new(folder, service);
    Some(match version {
        Some(v) => locator.with_version(v),
        None => locator,
    })
}

/// Where a request URL is rooted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlOptions<'a> {
    /// Platform base URL (scheme + host)
    pub base_url: &'a str,
    /// Tenant name
    pub tenant: &'a str,
    /// API version segment (`v3`, `v4`)
    pub api_version: &'a str,
    /// Trailing endpoint segment
    pub endpoint: Option<&'a str>,
}

impl<'a> UrlOptions<'a> {
    /// Options for the default API version without endpoint
    #[must_use]
    pub fn new(base_url: &'a str, tenant: &'a str) -> Self {
        Self {
            base_url,
            tenant,
            api_version: DEFAULT_API_VERSION,
            endpoint: None,
        }
    }

    /// Builder-style method to set the endpoint
    #[must_use]
    pub fn endpoint(mut self, endpoint: &'a str) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Builder-style method to set the API version
    #[must_use]
    pub fn api_version(mut self, version: &'a str) -> Self {
        self.api_version = version;
        self
    }

    /// Absolute URL for a path relative to `{base}/{tenant}/api/{version}`
    pub fn join(&self, path: &str) -> ApiResult<Url> {
        let raw = format!(
            "{}/{}/api/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.tenant.trim_matches('/'),
            self.api_version.trim_matches('/'),
            path.trim_start_matches('/'),
        );
        parse_absolute(&raw)
    }
}

/// Resolve the absolute URL for a locator
pub fn resolve_url(locator: &ServiceLocator, options: &UrlOptions<'_>) -> ApiResult<Url> {
    let path = locator.path(options.endpoint)?;
    options.join(&path)
}

/// Parse an absolute http(s) URL
pub(crate) fn parse_absolute(raw: &str) -> ApiResult<Url> {
    let url = Url::parse(raw).map_err(|e| {
        SdkError::new(format!("cannot build a valid URL: {e}")).with_cause(raw.to_string())
    })?;

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(SdkError::new("URL must be absolute http(s)")
            .with_cause(raw.to_string())
            .into());
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://excel.test.example.com";

    #[test]
    fn test_decode_folder_service_version() {
        let locator = ServiceLocator::decode("my-folder/my-service[0.4.2]");
        assert_eq!(
            locator,
            ServiceLocator::new("my-folder", "my-service").with_version("0.4.2")
        );
    }

    #[test]
    fn test_decode_long_form() {
        let locator = ServiceLocator::decode("/folders/my-folder/services/my-service/");
        assert_eq!(locator, ServiceLocator::new("my-folder", "my-service"));
    }

    #[test]
    fn test_decode_ids() {
        assert_eq!(
            ServiceLocator::decode("service/abc-123"),
            ServiceLocator::from_service_id("abc-123")
        );
        assert_eq!(
            ServiceLocator::decode("version/xyz-789"),
            ServiceLocator::from_version_id("xyz-789")
        );
        assert_eq!(
            ServiceLocator::decode("proxy/custom/endpoint"),
            ServiceLocator::from_proxy("custom/endpoint")
        );
    }

    #[test]
    fn test_decode_unrecognized_is_empty() {
        for input in [
            "",
            "just-one",
            "a/b/c",
            "folder/service[",
            "folder/service[]",
            "folder/[1.0]",
            "proxy/",
            "folders/f/services",
        ] {
            let locator = ServiceLocator::decode(input);
            assert!(locator.is_empty(), "{input:?} decoded to {locator:?}");
        }
    }

    #[test]
    fn test_encode_decode_identity() {
        let locators = [
            ServiceLocator::new("f", "s"),
            ServiceLocator::new("f", "s").with_version("1.2.3"),
            ServiceLocator::from_service_id("abc-123"),
            ServiceLocator::from_version_id("xyz-789"),
            ServiceLocator::from_proxy("my/proxy"),
        ];

        for locator in locators {
            let encoded = locator.encode(true);
            assert_eq!(ServiceLocator::decode(&encoded), locator, "via {encoded}");
        }
    }

    #[test]
    fn test_encode_short_and_priority() {
        let locator = ServiceLocator::new("f", "s").with_version("2.0");
        assert_eq!(locator.encode(false), "f/s[2.0]");
        assert_eq!(locator.encode(true), "folders/f/services/s[2.0]");

        let both = ServiceLocator::new("f", "s").with_version_id("vid");
        assert_eq!(both.encode(true), "version/vid");
        assert_eq!(both.encode(false), "vid");
        assert_eq!(ServiceLocator::default().encode(true), "");
    }

    #[test]
    fn test_path_priority() {
        let locator = ServiceLocator {
            folder: Some("f".into()),
            service: Some("s".into()),
            service_id: Some("sid".into()),
            version_id: Some("vid".into()),
            proxy: Some("p".into()),
            ..ServiceLocator::default()
        };
        assert_eq!(locator.path(Some("execute")).unwrap(), "folders/f/services/s/execute");

        let ids = ServiceLocator::from_version_id("vid");
        assert_eq!(ids.path(Some("execute")).unwrap(), "version/vid/execute");
    }

    #[test]
    fn test_public_prefix_and_proxy_replaces_endpoint() {
        let locator = ServiceLocator::new("f", "s").public();
        assert_eq!(
            locator.path(Some("/execute")).unwrap(),
            "public/folders/f/services/s/execute"
        );

        let proxy = ServiceLocator::from_proxy("/my/proxy").public();
        assert_eq!(proxy.path(Some("execute")).unwrap(), "public/proxy/my/proxy");
    }

    #[test]
    fn test_resolve_url() {
        let locator = ServiceLocator::decode("my-folder/my-service");
        let options = UrlOptions::new(BASE, "acme").endpoint("execute");
        let url = resolve_url(&locator, &options).unwrap();

        assert_eq!(
            url.as_str(),
            "https://excel.test.example.com/acme/api/v3/folders/my-folder/services/my-service/execute"
        );
    }

    #[test]
    fn test_resolve_url_empty_locator_fails() {
        let options = UrlOptions::new(BASE, "acme");
        let err = resolve_url(&ServiceLocator::decode("nonsense"), &options).unwrap_err();
        assert!(matches!(err, crate::error::Error::Sdk(_)));
    }

    #[test]
    fn test_resolve_url_bad_base_fails() {
        let locator = ServiceLocator::new("f", "s");
        let err = resolve_url(&locator, &UrlOptions::new("not a url", "acme")).unwrap_err();

        match err {
            crate::error::Error::Sdk(e) => {
                assert!(e.cause.unwrap().as_str().unwrap().starts_with("not a url"));
            }
            other => panic!("expected SdkError, got {other}"),
        }
    }

    #[test]
    fn test_from_str_and_display() {
        let locator: ServiceLocator = "f/s[1.0]".parse().unwrap();
        assert_eq!(locator.to_string(), "folders/f/services/s[1.0]");
    }
}
