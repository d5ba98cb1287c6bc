//! Request descriptors, body encoding and response envelopes

use crate::error::{decode_body, ApiResult, SdkError};
use bytes::Bytes;
use md5::{Digest, Md5};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;

/// Header carrying the MD5 digest of a multipart file part
pub const CONTENT_MD5: &str = "content-md5";

/// Supported request content types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    /// `application/json`
    Json,
    /// `application/json-patch+json`
    JsonPatch,
    /// `application/x-www-form-urlencoded`
    FormUrlEncoded,
    /// `application/octet-stream`
    OctetStream,
    /// `multipart/form-data`
    Multipart,
}

impl ContentType {
    /// MIME string
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::JsonPatch => "application/json-patch+json",
            Self::FormUrlEncoded => "application/x-www-form-urlencoded",
            Self::OctetStream => "application/octet-stream",
            Self::Multipart => "multipart/form-data",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = SdkError;

    /// Parses the MIME essence; parameters such as `charset` are ignored
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let essence = s.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
        match essence.as_str() {
            "application/json" => Ok(Self::Json),
            "application/json-patch+json" => Ok(Self::JsonPatch),
            "application/x-www-form-urlencoded" => Ok(Self::FormUrlEncoded),
            "application/octet-stream" => Ok(Self::OctetStream),
            "multipart/form-data" => Ok(Self::Multipart),
            _ => Err(SdkError::new(format!("unsupported content type '{s}'")).with_cause(s.to_string())),
        }
    }
}

/// File content attached to a multipart part
#[derive(Debug, Clone)]
pub struct FilePart {
    /// File name sent in the part's disposition
    pub file_name: String,
    /// Buffered file content
    pub content: Bytes,
    /// MIME type, `application/octet-stream` when absent
    pub mime: Option<String>,
}

/// One part of a multipart request
#[derive(Debug, Clone)]
pub struct MultipartPart {
    /// Form field name
    pub name: String,
    /// Inline data, serialized as JSON
    pub data: Option<Value>,
    /// File content
    pub file: Option<FilePart>,
}

impl MultipartPart {
    /// Inline JSON part
    pub fn data(name: impl Into<String>, data: impl Serialize) -> ApiResult<Self> {
        let data = serde_json::to_value(data)
            .map_err(|e| SdkError::new(format!("failed to serialize part data: {e}")))?;
        Ok(Self {
            name: name.into(),
            data: Some(data),
            file: None,
        })
    }

    /// File part
    pub fn file(
        name: impl Into<String>,
        file_name: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            data: None,
            file: Some(FilePart {
                file_name: file_name.into(),
                content: content.into(),
                mime: None,
            }),
        }
    }

    /// Builder-style method to set the file MIME type
    #[must_use]
    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        if let Some(file) = self.file.as_mut() {
            file.mime = Some(mime.into());
        }
        self
    }
}

/// Everything needed to send one logical request
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    /// HTTP method
    pub method: Method,
    /// Extra headers
    pub headers: HeaderMap,
    /// Content type; `application/json` when a body is present and this is unset
    pub content_type: Option<String>,
    /// JSON or form payload
    pub body: Option<Value>,
    /// Binary payload
    pub stream: Option<Bytes>,
    /// Multipart payload
    pub parts: Vec<MultipartPart>,
    /// Cancellation signal honored at network boundaries
    pub cancel: Option<CancellationToken>,
    /// Retries made so far
    pub retries: u32,
}

impl RequestDescriptor {
    /// Descriptor without body
    #[must_use]
    pub fn new(method: Method) -> Self {
        Self {
            method,
            headers: HeaderMap::new(),
            content_type: None,
            body: None,
            stream: None,
            parts: Vec::new(),
            cancel: None,
            retries: 0,
        }
    }

    /// GET descriptor
    #[must_use]
    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    /// POST descriptor
    #[must_use]
    pub fn post() -> Self {
        Self::new(Method::POST)
    }

    /// JSON body
    pub fn json(mut self, body: impl Serialize) -> ApiResult<Self> {
        self.body = Some(
            serde_json::to_value(body)
                .map_err(|e| SdkError::new(format!("failed to serialize request body: {e}")))?,
        );
        self.content_type = Some(ContentType::Json.to_string());
        Ok(self)
    }

    /// URL-encoded form body (a flat JSON object)
    #[must_use]
    pub fn form(mut self, body: Value) -> Self {
        self.body = Some(body);
        self.content_type = Some(ContentType::FormUrlEncoded.to_string());
        self
    }

    /// Binary body
    #[must_use]
    pub fn binary(mut self, bytes: impl Into<Bytes>) -> Self {
        self.stream = Some(bytes.into());
        self.content_type = Some(ContentType::OctetStream.to_string());
        self
    }

    /// Multipart body
    #[must_use]
    pub fn multipart(mut self, parts: Vec<MultipartPart>) -> Self {
        self.parts = parts;
        self.content_type = Some(ContentType::Multipart.to_string());
        self
    }

    /// Override the content type
    #[must_use]
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Add a header; invalid names or values are ignored
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Attach a cancellation token
    #[must_use]
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Encode the body according to the content type
    ///
    /// Fails before any network call when the body does not match the
    /// content type.
    pub fn encode(&self) -> ApiResult<EncodedBody> {
        let content_type = match (&self.content_type, &self.body) {
            (Some(raw), _) => raw.parse::<ContentType>()?,
            (None, Some(_)) => ContentType::Json,
            (None, None) => return Ok(EncodedBody::Empty),
        };

        match content_type {
            ContentType::Json | ContentType::JsonPatch => match &self.body {
                Some(body) => Ok(EncodedBody::Bytes {
                    content_type,
                    bytes: Bytes::from(
                        serde_json::to_vec(body).map_err(|e| {
                            SdkError::new(format!("failed to serialize request body: {e}"))
                        })?,
                    ),
                    snapshot: Some(body.clone()),
                }),
                None => Ok(EncodedBody::Empty),
            },
            ContentType::FormUrlEncoded => {
                let body = self.body.as_ref().ok_or_else(|| {
                    SdkError::new("application/x-www-form-urlencoded requires a body")
                })?;
                Ok(EncodedBody::Bytes {
                    content_type,
                    bytes: Bytes::from(form_encode(body)?),
                    snapshot: Some(body.clone()),
                })
            }
            ContentType::OctetStream => {
                let bytes = self.stream.clone().ok_or_else(|| {
                    SdkError::new("application/octet-stream requires a byte stream")
                })?;
                let snapshot = Value::String(format!("<{} bytes>", bytes.len()));
                Ok(EncodedBody::Bytes {
                    content_type,
                    bytes,
                    snapshot: Some(snapshot),
                })
            }
            ContentType::Multipart => {
                if self.parts.is_empty() {
                    return Err(SdkError::new("multipart/form-data requires at least one part").into());
                }
                let parts = self
                    .parts
                    .iter()
                    .map(EncodedPart::encode)
                    .collect::<ApiResult<Vec<_>>>()?;
                Ok(EncodedBody::Multipart(parts))
            }
        }
    }
}

/// A body ready to be attached to a wire request
#[derive(Debug, Clone)]
pub enum EncodedBody {
    /// No body
    Empty,
    /// Single payload with its content type
    Bytes {
        /// Content type header value
        content_type: ContentType,
        /// Encoded payload
        bytes: Bytes,
        /// JSON rendering for error snapshots
        snapshot: Option<Value>,
    },
    /// Multipart payload; the boundary is chosen at send time
    Multipart(Vec<EncodedPart>),
}

impl EncodedBody {
    /// JSON rendering for error snapshots
    #[must_use]
    pub fn snapshot(&self) -> Option<Value> {
        match self {
            Self::Empty => None,
            Self::Bytes { snapshot, .. } => snapshot.clone(),
            Self::Multipart(parts) => Some(Value::Array(
                parts
                    .iter()
                    .map(|p| {
                        serde_json::json!({
                            "name": p.name,
                            "file_name": p.file_name,
                            "content_md5": p.content_md5,
                            "size": p.content.len(),
                        })
                    })
                    .collect(),
            )),
        }
    }
}

/// Encoded multipart part
#[derive(Debug, Clone)]
pub struct EncodedPart {
    /// Form field name
    pub name: String,
    /// Part content
    pub content: Bytes,
    /// File name, for file parts
    pub file_name: Option<String>,
    /// MIME type
    pub mime: String,
    /// Hex MD5 of `content`, for file parts
    pub content_md5: Option<String>,
}

impl EncodedPart {
    fn encode(part: &MultipartPart) -> ApiResult<Self> {
        if let Some(file) = &part.file {
            return Ok(Self {
                name: part.name.clone(),
                content: file.content.clone(),
                file_name: Some(file.file_name.clone()),
                mime: file
                    .mime
                    .clone()
                    .unwrap_or_else(|| ContentType::OctetStream.to_string()),
                content_md5: Some(md5_hex(&file.content)),
            });
        }

        if let Some(data) = &part.data {
            let content = serde_json::to_vec(data)
                .map_err(|e| SdkError::new(format!("failed to serialize part data: {e}")))?;
            return Ok(Self {
                name: part.name.clone(),
                content: Bytes::from(content),
                file_name: None,
                mime: ContentType::Json.to_string(),
                content_md5: None,
            });
        }

        Err(SdkError::new(format!(
            "multipart part '{}' has neither data nor a file stream",
            part.name
        ))
        .with_cause(part.name.clone())
        .into())
    }

    /// Build the wire part
    pub(crate) fn to_part(&self) -> ApiResult<reqwest::multipart::Part> {
        let mut part = reqwest::multipart::Part::bytes(self.content.to_vec())
            .mime_str(&self.mime)
            .map_err(|e| SdkError::new(format!("invalid part MIME type '{}': {e}", self.mime)))?;

        if let Some(file_name) = &self.file_name {
            part = part.file_name(file_name.clone());
        }
        if let Some(md5) = &self.content_md5 {
            let mut headers = HeaderMap::new();
            headers.insert(
                HeaderName::from_static(CONTENT_MD5),
                HeaderValue::from_str(md5).map_err(|_| SdkError::new("invalid content-md5 value"))?,
            );
            part = part.headers(headers);
        }
        Ok(part)
    }
}

/// Hex-encoded MD5 digest
#[must_use]
pub fn md5_hex(content: &[u8]) -> String {
    hex::encode(Md5::digest(content))
}

fn form_encode(body: &Value) -> ApiResult<String> {
    let object = body
        .as_object()
        .ok_or_else(|| SdkError::new("form body must be a JSON object").with_cause(body.clone()))?;

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in object {
        let value = match value {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            Value::Bool(_) | Value::Number(_) => value.to_string(),
            Value::Array(_) | Value::Object(_) => {
                return Err(SdkError::new(format!("form field '{key}' must be a scalar"))
                    .with_cause(body.clone())
                    .into());
            }
        };
        serializer.append_pair(key, &value);
    }
    Ok(serializer.finish())
}

/// A received response after interceptors ran
#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    /// HTTP status
    pub status: u16,
    /// Response headers
    pub headers: HeaderMap,
    /// Decoded payload (JSON, the body text as a string, or null)
    pub data: Value,
    /// Raw response bytes
    pub raw: Bytes,
}

impl ResponseEnvelope {
    /// Build an envelope from a status, headers and raw body
    #[must_use]
    pub fn new(status: u16, headers: HeaderMap, raw: Bytes) -> Self {
        Self {
            status,
            headers,
            data: decode_body(&raw),
            raw,
        }
    }

    /// Whether the status is 2xx
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Header value as a string
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Decode the payload into a typed value
    pub fn json<T: DeserializeOwned>(&self) -> ApiResult<T> {
        T::deserialize(&self.data).map_err(|e| {
            SdkError::new(format!("unexpected response payload: {e}"))
                .with_cause(self.data.clone())
                .into()
        })
    }

    /// Take the raw bytes
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.raw
    }
}
