//! Request executor behaviour against a mock platform
//!
//! Covers:
//! - standard headers and body encoding
//! - 429 retries (with and without `x-retry-after`) and budget exhaustion
//! - statuses that are never retried
//! - error context, redirects, cancellation and downloads

use rulehub_client::prelude::*;
use rulehub_client::request::ContentType;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, body_string_contains, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// Test Helpers
// ============================================================================

const EXECUTE_PATH: &str = "/acme/api/v3/folders/f/services/s/execute";

fn config(server: &MockServer) -> ClientConfig {
    ClientConfig::new(format!("{}/acme", server.uri()))
        .with_timeout(Duration::from_secs(5))
        .with_retry(
            RetryConfig::default()
                .with_max_retries(2)
                .with_retry_interval(Duration::from_millis(10))
                .with_jitter(false),
        )
        .with_auth(AuthConfig::api_key("key-1"))
}

fn client(server: &MockServer) -> RulehubClient {
    RulehubClient::with_config(config(server)).unwrap()
}

fn execute_url(client: &RulehubClient) -> url::Url {
    client
        .service_url(&ServiceLocator::new("f", "s"), Some("execute"))
        .unwrap()
}

async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.map_or(0, |r| r.len())
}

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn test_execute_sends_standard_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(EXECUTE_PATH))
        .and(header("x-synthetic-key", "key-1"))
        .and(header("x-tenant-name", "acme"))
        .and(header("content-type", "application/json"))
        .and(header_exists("x-request-id"))
        .and(header_exists("x-rulehub-sdk"))
        .and(header_exists("user-agent"))
        .and(body_partial_json(json!({"request_data": {"inputs": {"age": 42}}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "Success",
            "response_data": {"outputs": {"premium": 120.5}},
            "response_meta": {"version_id": "v-1"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = client(&server)
        .services()
        .execute(
            &ServiceLocator::new("f", "s"),
            json!({"age": 42}),
            ExecuteOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(response.response_data.outputs["premium"], 120.5);
    assert_eq!(response.response_meta["version_id"], "v-1");
}

#[tokio::test]
async fn test_request_ids_are_unique_per_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = client(&server);
    let url = execute_url(&client);
    for _ in 0..2 {
        assert_ok!(client.send(&url, RequestDescriptor::get()).await);
    }

    let requests = server.received_requests().await.unwrap();
    let ids: Vec<_> = requests
        .iter()
        .map(|r| r.headers.get("x-request-id").unwrap().to_str().unwrap().to_string())
        .collect();
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);
}

#[tokio::test]
async fn test_non_json_success_body_is_kept_as_text() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("plain"))
        .mount(&server)
        .await;

    let client = client(&server);
    let envelope = client
        .send(&execute_url(&client), RequestDescriptor::get())
        .await
        .unwrap();

    assert_eq!(envelope.data, json!("plain"));
    assert_eq!(&envelope.raw[..], b"plain");
}

// ============================================================================
// Rate limiting
// ============================================================================

#[tokio::test]
async fn test_429_retries_after_server_delay() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(EXECUTE_PATH))
        .respond_with(ResponseTemplate::new(429).insert_header("x-retry-after", "0.3"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(EXECUTE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response_data": {"outputs": {}}})))
        .mount(&server)
        .await;

    let started = Instant::now();
    let response = client(&server)
        .services()
        .execute(&ServiceLocator::new("f", "s"), json!({}), ExecuteOptions::default())
        .await;

    assert_ok!(response);
    assert_eq!(request_count(&server).await, 2);
    // header wins over the 10ms backoff
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test]
async fn test_429_exhausts_retry_budget() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({"message": "slow down"})))
        .mount(&server)
        .await;

    let client = client(&server);
    let err = client
        .send(&execute_url(&client), RequestDescriptor::get())
        .await
        .unwrap_err();

    assert_eq!(err.api_kind(), Some(ApiErrorKind::RateLimitError));
    assert_eq!(err.status(), Some(429));
    // first attempt plus max_retries
    assert_eq!(request_count(&server).await, 3);
}

// ============================================================================
// Statuses that are never retried
// ============================================================================

#[tokio::test]
async fn test_401_with_api_key_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = client(&server);
    let err = client
        .send(&execute_url(&client), RequestDescriptor::get())
        .await
        .unwrap_err();

    assert_eq!(err.api_kind(), Some(ApiErrorKind::UnauthorizedError));
    assert_eq!(request_count(&server).await, 1);
}

#[tokio::test]
async fn test_server_errors_are_not_retried() {
    for (status, kind) in [
        (500, ApiErrorKind::InternalServerError),
        (503, ApiErrorKind::ServiceUnavailableError),
        (502, ApiErrorKind::ApiUnknownError),
    ] {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;

        let client = client(&server);
        let err = client
            .send(&execute_url(&client), RequestDescriptor::get())
            .await
            .unwrap_err();

        assert_eq!(err.api_kind(), Some(kind), "status {status}");
        assert_eq!(request_count(&server).await, 1, "status {status}");
    }
}

#[tokio::test]
async fn test_error_carries_request_and_response_context() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"message": "service not found"})),
        )
        .mount(&server)
        .await;

    let err = client(&server)
        .services()
        .execute(&ServiceLocator::new("f", "s"), json!({"x": 1}), ExecuteOptions::default())
        .await
        .unwrap_err();

    let sent = &server.received_requests().await.unwrap()[0];
    let sent_id = sent.headers.get("x-request-id").unwrap().to_str().unwrap();

    let Error::Api(api) = err else {
        panic!("expected ApiError");
    };
    assert_eq!(api.kind, ApiErrorKind::NotFoundError);
    assert_eq!(api.message, "service not found");
    assert_eq!(api.request_id, sent_id);
    assert_eq!(api.cause.request.method, "POST");
    assert!(api.cause.request.url.ends_with(EXECUTE_PATH));
    assert_eq!(api.cause.request.headers["x-synthetic-key"], "[REDACTED]");
    assert_eq!(api.cause.request.body.as_ref().unwrap()["request_data"]["inputs"]["x"], 1);

    let response = api.cause.response.as_ref().unwrap();
    assert_eq!(response.status, 404);
    assert_eq!(response.body["message"], "service not found");
}

#[tokio::test]
async fn test_redirects_are_returned_not_followed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(EXECUTE_PATH))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/elsewhere"))
        .mount(&server)
        .await;

    let client = client(&server);
    let envelope = client
        .send(&execute_url(&client), RequestDescriptor::get())
        .await
        .unwrap();

    assert_eq!(envelope.status, 302);
    assert_eq!(envelope.header("location"), Some("/elsewhere"));
    assert_eq!(request_count(&server).await, 1);
}

#[tokio::test]
async fn test_transport_failure_is_internet_error() {
    let config = ClientConfig::new("http://127.0.0.1:1/acme")
        .with_timeout(Duration::from_secs(2))
        .with_auth(AuthConfig::api_key("key-1"));
    let client = RulehubClient::with_config(config).unwrap();

    let err = client
        .send(&execute_url(&client), RequestDescriptor::get())
        .await
        .unwrap_err();

    assert_eq!(err.api_kind(), Some(ApiErrorKind::InternetError));
    assert_eq!(err.status(), Some(0));
    let Error::Api(api) = err else {
        panic!("expected ApiError");
    };
    assert!(api.cause.response.is_none());
}

// ============================================================================
// Body encoding
// ============================================================================

#[tokio::test]
async fn test_octet_stream_without_bytes_fails_before_network() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client(&server);
    let descriptor = RequestDescriptor::post().content_type(ContentType::OctetStream.as_str());
    let err = client.send(&execute_url(&client), descriptor).await.unwrap_err();

    assert!(matches!(err, Error::Sdk(_)));
    assert_eq!(err.status(), None);
}

#[tokio::test]
async fn test_multipart_file_part_carries_md5() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header_exists("content-type"))
        .and(body_string_contains("5d41402abc4b2a76b9719d911017c592"))
        .and(body_string_contains("filename=\"model.xlsx\""))
        .and(body_string_contains("name=\"meta\""))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let descriptor = RequestDescriptor::post().multipart(vec![
        MultipartPart::data("meta", json!({"k": "v"})).unwrap(),
        MultipartPart::file("file", "model.xlsx", &b"hello"[..]),
    ]);

    assert_ok!(client.send(&execute_url(&client), descriptor).await);

    let sent = &server.received_requests().await.unwrap()[0];
    let content_type = sent.headers.get("content-type").unwrap().to_str().unwrap();
    assert!(content_type.starts_with("multipart/form-data; boundary="));
}

#[tokio::test]
async fn test_form_body_is_url_encoded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string_contains("a=1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let descriptor = RequestDescriptor::post().form(json!({"a": 1}));
    let envelope = client.send(&execute_url(&client), descriptor).await.unwrap();
    assert_eq!(envelope.status, 204);
}

#[tokio::test]
async fn test_caller_headers_do_not_duplicate_managed_ones() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let config = config(&server).with_auth(AuthConfig::token("bearer-1"));
    let client = RulehubClient::with_config(config).unwrap();
    let descriptor = RequestDescriptor::post()
        .header("authorization", "Bearer caller")
        .header("content-type", "text/plain")
        .header("x-request-id", "caller-id")
        .json(json!({"a": 1}))
        .unwrap();
    assert_ok!(client.send(&execute_url(&client), descriptor).await);

    let requests = server.received_requests().await.unwrap();
    let sent = &requests[0].headers;
    let values = |name: &str| -> Vec<String> {
        sent.get_all(name)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    };
    assert_eq!(values("authorization"), vec!["Bearer bearer-1"]);
    assert_eq!(values("content-type"), vec!["application/json"]);
    let ids = values("x-request-id");
    assert_eq!(ids.len(), 1);
    assert_ne!(ids[0], "caller-id");
}

// ============================================================================
// Interceptors
// ============================================================================

struct Tag {
    value: &'static str,
    seen: Arc<Mutex<Vec<String>>>,
}

impl Interceptor for Tag {
    fn before_send(&self, request: &mut reqwest::Request) -> ApiResult<()> {
        let next = match request.headers().get("x-order") {
            Some(prev) => format!("{},{}", prev.to_str().unwrap_or_default(), self.value),
            None => self.value.to_string(),
        };
        request
            .headers_mut()
            .insert("x-order", next.parse().map_err(|_| Error::sdk("bad header"))?);
        Ok(())
    }

    fn after_receive(&self, response: &mut ResponseEnvelope) -> ApiResult<()> {
        self.seen
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.value, response.status));
        Ok(())
    }
}

#[tokio::test]
async fn test_interceptors_run_in_registration_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("x-order", "first,second"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let client = client(&server)
        .with_interceptor(Tag {
            value: "first",
            seen: seen.clone(),
        })
        .with_interceptor(Tag {
            value: "second",
            seen: seen.clone(),
        });

    assert_ok!(client.send(&execute_url(&client), RequestDescriptor::get()).await);
    assert_eq!(*seen.lock().unwrap(), vec!["first:200", "second:200"]);
}

struct Reject;

impl Interceptor for Reject {
    fn before_send(&self, _request: &mut reqwest::Request) -> ApiResult<()> {
        Err(Error::sdk("blocked by policy"))
    }
}

#[tokio::test]
async fn test_interceptor_error_aborts_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client(&server).with_interceptor(Reject);
    let err = client
        .send(&execute_url(&client), RequestDescriptor::get())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("blocked by policy"));
}

// ============================================================================
// Cancellation and downloads
// ============================================================================

#[tokio::test]
async fn test_cancellation_interrupts_in_flight_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let client = client(&server);
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let err = client
        .send(&execute_url(&client), RequestDescriptor::get().cancel_on(token))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}

#[tokio::test]
async fn test_download_returns_raw_bytes_without_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/logs.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"a,b\n1,2\n".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let bytes = client
        .download(&format!("{}/files/logs.csv", server.uri()), None)
        .await
        .unwrap();

    assert_eq!(&bytes[..], b"a,b\n1,2\n");
    let sent = &server.received_requests().await.unwrap()[0];
    assert!(sent.headers.get("x-synthetic-key").is_none());
}

#[tokio::test]
async fn test_download_failure_is_classified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let client = client(&server);
    let err = client
        .download(&format!("{}/files/expired", server.uri()), None)
        .await
        .unwrap_err();
    assert_eq!(err.api_kind(), Some(ApiErrorKind::ForbiddenError));

    assert_err!(client.download("not a url", None).await);
}
