//! Request Execution
//!
//! One-shot request lifecycle: `Created → Connecting → (Canceled |
//! ResponseReceived) → Closed`.
//!
//! Only https URIs are opened. Cancellation is a flag checked right after the
//! connector returns; a canceled request tears its connection down and fails
//! with [`NetworkError::Canceled`]. Responses whose status cannot carry a body
//! (1xx, 204, 304) are disconnected as soon as the headers are in.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;
use url::Url;

use crate::core::{Connection, ConnectionParameters, HttpConnector};
use crate::error::NetworkError;

const HTTPS_SCHEME: &str = "https";

/// Lifecycle phase of a [`RequestExecution`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionPhase {
    Created,
    Connecting,
    Canceled,
    ResponseReceived,
    Closed,
}

/// Whether a response with this status conventionally carries a body.
pub fn has_response_body(status: u16) -> bool {
    !(100..200).contains(&status) && status != 204 && status != 304
}

/// A single, cancellable request execution.
pub struct RequestExecution {
    url: Url,
    params: ConnectionParameters,
    canceled: AtomicBool,
    phase: Mutex<ExecutionPhase>,
    connection: Mutex<Option<Arc<dyn Connection>>>,
}

impl RequestExecution {
    pub fn new(url: Url, params: ConnectionParameters) -> Self {
        Self {
            url,
            params,
            canceled: AtomicBool::new(false),
            phase: Mutex::new(ExecutionPhase::Created),
            connection: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn params(&self) -> &ConnectionParameters {
        &self.params
    }

    pub fn phase(&self) -> ExecutionPhase {
        *lock(&self.phase)
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// Open the connection. Can be called once.
    pub async fn open(&self, connector: &dyn HttpConnector) -> Result<HttpResponse, NetworkError> {
        if self.url.scheme() != HTTPS_SCHEME {
            return Err(NetworkError::InsecureScheme {
                scheme: self.url.scheme().to_string(),
            });
        }

        {
            let mut phase = lock(&self.phase);
            if *phase != ExecutionPhase::Created {
                return Err(NetworkError::AlreadyExecuted);
            }
            *phase = ExecutionPhase::Connecting;
        }

        debug!(
            request_type = self.params.request_type.as_str(),
            method = self.params.method.as_str(),
            url = %self.url,
            "Opening connection"
        );

        let connection = match connector.connect(&self.url, &self.params).await {
            Ok(connection) => connection,
            Err(e) => {
                self.set_phase(ExecutionPhase::Closed);
                return Err(e);
            }
        };

        if self.is_canceled() {
            connection.disconnect();
            self.set_phase(ExecutionPhase::Canceled);
            return Err(NetworkError::Canceled);
        }

        let status = match connection.status() {
            Some(status) => status,
            None => {
                connection.disconnect();
                self.set_phase(ExecutionPhase::Closed);
                return Err(NetworkError::InvalidResponseCode);
            }
        };

        let headers = connection.headers().clone();
        let content_length = connection.content_length();

        if !has_response_body(status) {
            connection.disconnect();
            self.set_phase(ExecutionPhase::Closed);
            return Ok(HttpResponse {
                status,
                headers,
                content_length,
                connection: None,
            });
        }

        *lock(&self.connection) = Some(Arc::clone(&connection));
        self.set_phase(ExecutionPhase::ResponseReceived);

        // A cancel that landed between the check above and storing the
        // connection found nothing to close.
        if self.is_canceled() {
            self.close();
            self.set_phase(ExecutionPhase::Canceled);
            return Err(NetworkError::Canceled);
        }

        Ok(HttpResponse {
            status,
            headers,
            content_length,
            connection: Some(connection),
        })
    }

    /// Flag the request as canceled and close any open connection.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
        self.close();
    }

    /// Close the connection. Idempotent, callable from any thread.
    pub fn close(&self) {
        let connection = lock(&self.connection).take();
        if let Some(connection) = connection {
            connection.disconnect();
            let mut phase = lock(&self.phase);
            if *phase == ExecutionPhase::ResponseReceived {
                *phase = ExecutionPhase::Closed;
            }
            debug!(url = %self.url, "Connection closed");
        }
    }

    fn set_phase(&self, phase: ExecutionPhase) {
        *lock(&self.phase) = phase;
    }
}

impl std::fmt::Debug for RequestExecution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecution")
            .field("url", &self.url.as_str())
            .field("request_type", &self.params.request_type)
            .field("phase", &self.phase())
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

/// Response of an opened request.
///
/// Holds the connection only when the status allows a body. Dropping the
/// response disconnects it.
pub struct HttpResponse {
    status: u16,
    headers: HashMap<String, String>,
    content_length: Option<u64>,
    connection: Option<Arc<dyn Connection>>,
}

impl HttpResponse {
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Whether the connection is still open with a readable body.
    pub fn has_body(&self) -> bool {
        self.connection.is_some()
    }

    /// Read the full body.
    pub async fn read_body(&self) -> Result<Vec<u8>, NetworkError> {
        match &self.connection {
            Some(connection) => connection.read_body().await,
            None => Err(NetworkError::NoResponseBody),
        }
    }

    pub fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.disconnect();
        }
    }
}

impl Drop for HttpResponse {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("has_body", &self.has_body())
            .finish()
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{MockConnector, MockReply, RequestMethod, RequestType};

    fn execution(url: &str) -> RequestExecution {
        RequestExecution::new(
            Url::parse(url).unwrap(),
            ConnectionParameters::new(RequestMethod::Get, RequestType::Authorized),
        )
    }

    #[test]
    fn test_has_response_body() {
        assert!(has_response_body(200));
        assert!(has_response_body(404));
        assert!(!has_response_body(100));
        assert!(!has_response_body(199));
        assert!(!has_response_body(204));
        assert!(!has_response_body(304));
    }

    #[tokio::test]
    async fn test_no_content_closes_connection() {
        let connector = MockConnector::new();
        connector.queue_reply(MockReply::empty(204));

        let request = execution("https://idp.example/resource");
        let response = request.open(&connector).await.unwrap();

        assert_eq!(response.status(), 204);
        assert!(!response.has_body());
        assert!(matches!(
            response.read_body().await,
            Err(NetworkError::NoResponseBody)
        ));
        assert_eq!(request.phase(), ExecutionPhase::Closed);
        assert_eq!(connector.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_ok_keeps_connection_open_until_closed() {
        let connector = MockConnector::new();
        connector.queue_json_reply(200, &serde_json::json!({"ok": true}));

        let request = execution("https://idp.example/resource");
        let response = request.open(&connector).await.unwrap();

        assert!(response.has_body());
        assert_eq!(request.phase(), ExecutionPhase::ResponseReceived);
        assert_eq!(connector.open_connections(), 1);

        let body = response.read_body().await.unwrap();
        assert_eq!(body, br#"{"ok":true}"#.to_vec());
        assert_eq!(connector.open_connections(), 1);

        request.close();
        request.close();
        assert_eq!(request.phase(), ExecutionPhase::Closed);
        assert_eq!(connector.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_dropping_response_disconnects() {
        let connector = MockConnector::new();
        connector.queue_json_reply(200, &serde_json::json!({}));

        let request = execution("https://idp.example/resource");
        let response = request.open(&connector).await.unwrap();
        drop(response);
        assert_eq!(connector.open_connections(), 0);

        // Closing afterwards is still safe.
        request.close();
    }

    #[tokio::test]
    async fn test_cancel_during_connect() {
        let connector = MockConnector::new();
        connector.queue_json_reply(200, &serde_json::json!({}));

        let request = Arc::new(execution("https://idp.example/resource"));
        let handle = Arc::clone(&request);
        connector.set_on_connect(move || handle.cancel());

        let result = request.open(&connector).await;
        assert!(matches!(result, Err(NetworkError::Canceled)));
        assert_eq!(request.phase(), ExecutionPhase::Canceled);
        assert_eq!(connector.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_cancel_from_another_thread_closes_connection() {
        let connector = MockConnector::new();
        connector.queue_json_reply(200, &serde_json::json!({}));

        let request = Arc::new(execution("https://idp.example/resource"));
        let response = request.open(&connector).await.unwrap();
        assert!(response.has_body());

        let handle = Arc::clone(&request);
        std::thread::spawn(move || handle.cancel()).join().unwrap();

        assert!(request.is_canceled());
        assert_eq!(connector.open_connections(), 0);
        assert!(response.read_body().await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_non_https() {
        let connector = MockConnector::new();
        let request = execution("http://idp.example/resource");

        let result = request.open(&connector).await;
        assert!(matches!(
            result,
            Err(NetworkError::InsecureScheme { scheme }) if scheme == "http"
        ));
        assert!(connector.get_requests().is_empty());
        assert_eq!(request.phase(), ExecutionPhase::Created);
    }

    #[tokio::test]
    async fn test_missing_response_code() {
        let connector = MockConnector::new();
        connector.queue_reply(MockReply::without_status());

        let request = execution("https://idp.example/resource");
        let result = request.open(&connector).await;
        assert!(matches!(result, Err(NetworkError::InvalidResponseCode)));
        assert_eq!(connector.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_single_execution() {
        let connector = MockConnector::new();
        connector.queue_reply(MockReply::empty(204));
        connector.queue_reply(MockReply::empty(204));

        let request = execution("https://idp.example/resource");
        request.open(&connector).await.unwrap();
        let second = request.open(&connector).await;
        assert!(matches!(second, Err(NetworkError::AlreadyExecuted)));
        assert_eq!(connector.get_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_closes() {
        let connector = MockConnector::new();
        let request = execution("https://idp.example/resource");

        let result = request.open(&connector).await;
        assert!(matches!(result, Err(NetworkError::ConnectionFailed { .. })));
        assert_eq!(request.phase(), ExecutionPhase::Closed);
    }
}
