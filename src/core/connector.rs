//! HTTP Connector
//!
//! Transport capability consumed by request execution: a connector opens a
//! connection and exposes status, headers and body. Implementations must
//! make [`Connection::disconnect`] idempotent.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use url::Url;

use crate::error::NetworkError;

/// HTTP method.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl RequestMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

/// Kind of request, carried for logging and by connectors that care.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestType {
    Authorized,
    Profile,
    Introspect,
    Revoke,
    RefreshToken,
    TokenExchange,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authorized => "authorized",
            Self::Profile => "profile",
            Self::Introspect => "introspect",
            Self::Revoke => "revoke",
            Self::RefreshToken => "refresh_token",
            Self::TokenExchange => "token_exchange",
        }
    }
}

/// Everything a connector needs besides the URI.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionParameters {
    pub method: RequestMethod,
    /// Request headers.
    pub request_properties: HashMap<String, String>,
    /// Form-encoded body parameters.
    pub post_parameters: HashMap<String, String>,
    pub request_type: RequestType,
}

impl ConnectionParameters {
    pub fn new(method: RequestMethod, request_type: RequestType) -> Self {
        Self {
            method,
            request_properties: HashMap::new(),
            post_parameters: HashMap::new(),
            request_type,
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request_properties.insert(name.into(), value.into());
        self
    }

    pub fn with_post_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.post_parameters.insert(name.into(), value.into());
        self
    }
}

/// An open connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Response code, `None` if no code can be discerned.
    fn status(&self) -> Option<u16>;

    /// Response headers, names lowercased.
    fn headers(&self) -> &HashMap<String, String>;

    fn content_length(&self) -> Option<u64>;

    /// Read the full response body.
    async fn read_body(&self) -> Result<Vec<u8>, NetworkError>;

    /// Tear the connection down. Safe to call more than once and from any thread.
    fn disconnect(&self);
}

/// Connector interface (for dependency injection).
#[async_trait]
pub trait HttpConnector: Send + Sync {
    /// Open a connection to `url`.
    async fn connect(
        &self,
        url: &Url,
        params: &ConnectionParameters,
    ) -> Result<Arc<dyn Connection>, NetworkError>;
}

/// Default reqwest-based connector.
pub struct ReqwestConnector {
    client: reqwest::Client,
    timeout: Duration,
    max_response_size: usize,
}

impl ReqwestConnector {
    /// Create new connector with default settings.
    pub fn new() -> Result<Self, NetworkError> {
        Self::with_options(Duration::from_secs(30), 1048576) // 1MB
    }

    /// Create connector with custom options.
    pub fn with_options(timeout: Duration, max_response_size: usize) -> Result<Self, NetworkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| NetworkError::ConnectionFailed {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            timeout,
            max_response_size,
        })
    }
}

#[async_trait]
impl HttpConnector for ReqwestConnector {
    async fn connect(
        &self,
        url: &Url,
        params: &ConnectionParameters,
    ) -> Result<Arc<dyn Connection>, NetworkError> {
        let mut builder = match params.method {
            RequestMethod::Get => self.client.get(url.clone()),
            RequestMethod::Post => self.client.post(url.clone()),
            RequestMethod::Put => self.client.put(url.clone()),
            RequestMethod::Delete => self.client.delete(url.clone()),
        };

        for (name, value) in &params.request_properties {
            builder = builder.header(name, value);
        }

        if !params.post_parameters.is_empty() {
            builder = builder.form(&params.post_parameters);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                NetworkError::Timeout {
                    timeout: self.timeout,
                }
            } else {
                NetworkError::ConnectionFailed {
                    message: e.to_string(),
                }
            }
        })?;

        if let Some(len) = response.content_length() {
            if len as usize > self.max_response_size {
                return Err(NetworkError::ResponseTooLarge { size: len as usize });
            }
        }

        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.as_str().to_lowercase(), v.to_string());
            }
        }

        Ok(Arc::new(ReqwestConnection {
            status: response.status().as_u16(),
            content_length: response.content_length(),
            headers,
            max_response_size: self.max_response_size,
            response: Mutex::new(Some(response)),
        }))
    }
}

struct ReqwestConnection {
    status: u16,
    headers: HashMap<String, String>,
    content_length: Option<u64>,
    max_response_size: usize,
    response: Mutex<Option<reqwest::Response>>,
}

#[async_trait]
impl Connection for ReqwestConnection {
    fn status(&self) -> Option<u16> {
        Some(self.status)
    }

    fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    async fn read_body(&self) -> Result<Vec<u8>, NetworkError> {
        let response = self
            .response
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(NetworkError::NoResponseBody)?;

        let body = response
            .bytes()
            .await
            .map_err(|e| NetworkError::BodyReadFailed {
                message: e.to_string(),
            })?;

        if body.len() > self.max_response_size {
            return Err(NetworkError::ResponseTooLarge { size: body.len() });
        }

        Ok(body.to_vec())
    }

    fn disconnect(&self) {
        // Dropping the response aborts the underlying connection.
        self.response
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Canned reply served by [`MockConnector`].
#[derive(Clone, Debug)]
pub struct MockReply {
    /// `None` simulates a response without a discernible code.
    pub status: Option<u16>,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl MockReply {
    /// JSON reply.
    pub fn json<T: serde::Serialize>(status: u16, body: &T) -> Self {
        Self {
            status: Some(status),
            headers: [("content-type".to_string(), "application/json".to_string())]
                .into_iter()
                .collect(),
            body: serde_json::to_vec(body).unwrap_or_default(),
        }
    }

    /// Reply with a raw text body.
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            headers: HashMap::new(),
            body: body.into().into_bytes(),
        }
    }

    /// Reply with no body.
    pub fn empty(status: u16) -> Self {
        Self::text(status, "")
    }

    /// Reply without a response code.
    pub fn without_status() -> Self {
        Self {
            status: None,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }
}

/// Request recorded by [`MockConnector`].
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub url: Url,
    pub params: ConnectionParameters,
}

#[derive(Default)]
struct ConnectionStats {
    opened: AtomicUsize,
    closed: AtomicUsize,
}

type ConnectHook = Box<dyn Fn() + Send + Sync>;

/// Mock connector for testing.
#[derive(Default)]
pub struct MockConnector {
    replies: Mutex<VecDeque<MockReply>>,
    request_history: Mutex<Vec<RecordedRequest>>,
    next_error: Mutex<Option<NetworkError>>,
    on_connect: Mutex<Option<ConnectHook>>,
    stats: Arc<ConnectionStats>,
}

impl MockConnector {
    /// Create new mock connector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply. Replies are served in order.
    pub fn queue_reply(&self, reply: MockReply) -> &Self {
        lock(&self.replies).push_back(reply);
        self
    }

    /// Queue a JSON reply.
    pub fn queue_json_reply<T: serde::Serialize>(&self, status: u16, body: &T) -> &Self {
        self.queue_reply(MockReply::json(status, body))
    }

    /// Fail the next connect with `error`.
    pub fn set_next_error(&self, error: NetworkError) -> &Self {
        *lock(&self.next_error) = Some(error);
        self
    }

    /// Run `hook` inside every connect call, before it returns.
    pub fn set_on_connect(&self, hook: impl Fn() + Send + Sync + 'static) -> &Self {
        *lock(&self.on_connect) = Some(Box::new(hook));
        self
    }

    /// Get request history.
    pub fn get_requests(&self) -> Vec<RecordedRequest> {
        lock(&self.request_history).clone()
    }

    /// Get last request.
    pub fn get_last_request(&self) -> Option<RecordedRequest> {
        lock(&self.request_history).last().cloned()
    }

    /// Number of connections opened and not yet disconnected.
    pub fn open_connections(&self) -> usize {
        self.stats.opened.load(Ordering::SeqCst) - self.stats.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpConnector for MockConnector {
    async fn connect(
        &self,
        url: &Url,
        params: &ConnectionParameters,
    ) -> Result<Arc<dyn Connection>, NetworkError> {
        lock(&self.request_history).push(RecordedRequest {
            url: url.clone(),
            params: params.clone(),
        });

        if let Some(hook) = lock(&self.on_connect).as_ref() {
            hook();
        }

        if let Some(error) = lock(&self.next_error).take() {
            return Err(error);
        }

        let reply = lock(&self.replies)
            .pop_front()
            .ok_or_else(|| NetworkError::ConnectionFailed {
                message: "No mock response available".to_string(),
            })?;

        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockConnection {
            status: reply.status,
            content_length: Some(reply.body.len() as u64),
            headers: reply.headers,
            body: Mutex::new(Some(reply.body)),
            disconnected: AtomicBool::new(false),
            stats: Arc::clone(&self.stats),
        }))
    }
}

struct MockConnection {
    status: Option<u16>,
    headers: HashMap<String, String>,
    content_length: Option<u64>,
    body: Mutex<Option<Vec<u8>>>,
    disconnected: AtomicBool,
    stats: Arc<ConnectionStats>,
}

#[async_trait]
impl Connection for MockConnection {
    fn status(&self) -> Option<u16> {
        self.status
    }

    fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    async fn read_body(&self) -> Result<Vec<u8>, NetworkError> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(NetworkError::ConnectionFailed {
                message: "connection closed".to_string(),
            });
        }
        lock(&self.body).take().ok_or(NetworkError::NoResponseBody)
    }

    fn disconnect(&self) {
        if !self.disconnected.swap(true, Ordering::SeqCst) {
            self.stats.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Create production connector.
pub fn create_connector(timeout: Option<Duration>) -> Result<ReqwestConnector, NetworkError> {
    match timeout {
        Some(t) => ReqwestConnector::with_options(t, 1048576),
        None => ReqwestConnector::new(),
    }
}

/// Create mock connector for testing.
pub fn create_mock_connector() -> MockConnector {
    MockConnector::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_mock_connector_serves_replies_in_order() {
        let connector = create_mock_connector();
        connector.queue_json_reply(200, &serde_json::json!({"n": 1}));
        connector.queue_reply(MockReply::empty(204));

        let url = Url::parse("https://idp.example/a").unwrap();
        let params = ConnectionParameters::new(RequestMethod::Get, RequestType::Authorized);

        let first = connector.connect(&url, &params).await.unwrap();
        let second = connector.connect(&url, &params).await.unwrap();
        assert_eq!(first.status(), Some(200));
        assert_eq!(second.status(), Some(204));
        assert_eq!(connector.get_requests().len(), 2);
        assert_eq!(connector.open_connections(), 2);

        first.disconnect();
        first.disconnect();
        assert_eq!(connector.open_connections(), 1);
    }

    #[tokio::test]
    async fn test_mock_connector_next_error() {
        let connector = create_mock_connector();
        connector.set_next_error(NetworkError::ConnectionFailed {
            message: "offline".to_string(),
        });

        let url = Url::parse("https://idp.example/a").unwrap();
        let params = ConnectionParameters::new(RequestMethod::Get, RequestType::Authorized);
        let result = connector.connect(&url, &params).await;
        assert!(matches!(result, Err(NetworkError::ConnectionFailed { .. })));
        assert_eq!(connector.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_reqwest_connector_posts_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(header("accept", "application/json"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"access_token": "at"})),
            )
            .mount(&server)
            .await;

        let connector = ReqwestConnector::new().unwrap();
        let url = Url::parse(&format!("{}/token", server.uri())).unwrap();
        let params = ConnectionParameters::new(RequestMethod::Post, RequestType::RefreshToken)
            .with_property("accept", "application/json")
            .with_post_parameter("grant_type", "refresh_token");

        let connection = connector.connect(&url, &params).await.unwrap();
        assert_eq!(connection.status(), Some(200));

        let body = connection.read_body().await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["access_token"], "at");
    }

    #[tokio::test]
    async fn test_reqwest_connector_body_unreadable_after_disconnect() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .mount(&server)
            .await;

        let connector = ReqwestConnector::new().unwrap();
        let url = Url::parse(&server.uri()).unwrap();
        let params = ConnectionParameters::new(RequestMethod::Get, RequestType::Authorized);

        let connection = connector.connect(&url, &params).await.unwrap();
        connection.disconnect();
        connection.disconnect();
        assert!(matches!(
            connection.read_body().await,
            Err(NetworkError::NoResponseBody)
        ));
    }

    #[tokio::test]
    async fn test_reqwest_connector_rejects_oversized_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(64)))
            .mount(&server)
            .await;

        let connector = ReqwestConnector::with_options(Duration::from_secs(5), 16).unwrap();
        let url = Url::parse(&server.uri()).unwrap();
        let params = ConnectionParameters::new(RequestMethod::Get, RequestType::Authorized);

        let result = connector.connect(&url, &params).await;
        assert!(matches!(result, Err(NetworkError::ResponseTooLarge { size: 64 })));
    }

    #[test]
    fn test_request_method_as_str() {
        assert_eq!(RequestMethod::Get.as_str(), "GET");
        assert_eq!(RequestMethod::Post.as_str(), "POST");
        assert_eq!(RequestMethod::Put.as_str(), "PUT");
        assert_eq!(RequestMethod::Delete.as_str(), "DELETE");
    }
}
