//! HTTP request dispatcher.
//!
//! Maps each operation kind to its endpoint, attaches the operation id as
//! the `Idempotency-Key` header, and classifies responses. The actual HTTP
//! client is abstracted via [`HttpClient`] so any library (reqwest, hyper,
//! a platform bridge) can be plugged in.
//!
//! | Response | Classification |
//! |----------|----------------|
//! | 2xx | success |
//! | 401, 403 | authentication required |
//! | 409 | conflict |
//! | 408, 425, 429, 5xx | transient |
//! | other 4xx | permanent |
//! | transport failure | unreachable (transient) |

use crate::error::DispatchError;
use crate::transport::{DispatchAck, RequestDispatcher};
use async_trait::async_trait;
use clinisync_protocol::{HttpMethod, OperationId, OperationKind};
use parking_lot::RwLock;
use tracing::debug;

/// Header carrying the operation id.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Default health-check path.
pub const DEFAULT_HEALTH_PATH: &str = "/health";

/// An outgoing HTTP request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Request method.
    pub method: HttpMethod,
    /// Absolute URL.
    pub url: String,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// JSON body, empty for health checks.
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Returns the value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A received HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Raw body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// HTTP client abstraction.
///
/// `Err` means the request never produced a response (DNS, refused
/// connection, TLS, reset).
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a request.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String>;
}

/// Request dispatcher speaking JSON over HTTP.
pub struct HttpDispatcher<C: HttpClient> {
    base_url: String,
    health_path: String,
    bearer_token: RwLock<Option<String>>,
    client: C,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpDispatcher<C> {
    /// Creates a dispatcher for the API at `base_url`.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            health_path: DEFAULT_HEALTH_PATH.to_string(),
            bearer_token: RwLock::new(None),
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Sets the health-check path used by `probe`.
    pub fn with_health_path(mut self, path: impl Into<String>) -> Self {
        self.health_path = path.into();
        self
    }

    /// Sets or clears the bearer token sent with every request.
    pub fn set_bearer_token(&self, token: Option<String>) {
        *self.bearer_token.write() = token;
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn request(&self, method: HttpMethod, path: &str, body: Vec<u8>) -> HttpRequest {
        let mut headers = vec![("Accept".to_string(), "application/json".to_string())];
        if !body.is_empty() {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }
        if let Some(token) = self.bearer_token.read().as_ref() {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }
        HttpRequest {
            method,
            url: format!("{}{}", self.base_url, path),
            headers,
            body,
        }
    }

    fn record(&self, result: &Result<DispatchAck, DispatchError>) {
        *self.last_error.write() = result.as_ref().err().map(ToString::to_string);
    }
}

#[async_trait]
impl<C: HttpClient> RequestDispatcher for HttpDispatcher<C> {
    async fn dispatch(
        &self,
        kind: OperationKind,
        payload: &serde_json::Value,
        idempotency_key: &OperationId,
    ) -> Result<DispatchAck, DispatchError> {
        let endpoint = kind.endpoint();
        let body = serde_json::to_vec(payload)
            .map_err(|e| DispatchError::Rejected(format!("payload not serializable: {e}")))?;

        let mut request = self.request(endpoint.method, endpoint.path, body);
        request
            .headers
            .push((IDEMPOTENCY_HEADER.to_string(), idempotency_key.idempotency_key()));

        debug!(%kind, url = %request.url, key = %idempotency_key, "Dispatching request");

        let result = match self.client.send(request).await {
            Ok(response) => classify_response(response),
            Err(e) => Err(DispatchError::Unreachable(e)),
        };
        self.record(&result);
        result
    }

    async fn probe(&self) -> Result<(), DispatchError> {
        let request = self.request(HttpMethod::Get, &self.health_path, Vec::new());
        match self.client.send(request).await {
            Ok(response) => classify_response(response).map(|_| ()),
            Err(e) => Err(DispatchError::Unreachable(e)),
        }
    }
}

/// Classifies a response by its status code.
pub fn classify_response(response: HttpResponse) -> Result<DispatchAck, DispatchError> {
    let status = response.status;
    if (200..300).contains(&status) {
        let body = if response.body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&response.body).unwrap_or_else(|_| {
                serde_json::Value::String(String::from_utf8_lossy(&response.body).into_owned())
            })
        };
        return Ok(DispatchAck::new(status, body));
    }

    let message = error_message(&response.body, status);
    Err(match status {
        401 | 403 => DispatchError::AuthRequired,
        409 => DispatchError::Conflict(message),
        408 | 425 | 429 | 500..=599 => DispatchError::Unavailable { status, message },
        400..=499 => DispatchError::Rejected(message),
        _ => DispatchError::Unavailable { status, message },
    })
}

/// Extracts a human-readable message from an error body.
fn error_message(body: &[u8], status: u16) -> String {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
        for field in ["message", "error", "detail"] {
            if let Some(text) = value.get(field).and_then(serde_json::Value::as_str) {
                return text.to_string();
            }
        }
    }
    let text = String::from_utf8_lossy(body).trim().to_string();
    if text.is_empty() {
        format!("HTTP {status}")
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    struct TestClient {
        response: Mutex<Result<HttpResponse, String>>,
        sent: Mutex<Vec<HttpRequest>>,
    }

    impl TestClient {
        fn new(response: Result<HttpResponse, String>) -> Self {
            Self {
                response: Mutex::new(response),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl HttpClient for TestClient {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
            self.sent.lock().push(request);
            self.response.lock().clone()
        }
    }

    fn dispatcher(response: Result<HttpResponse, String>) -> HttpDispatcher<TestClient> {
        HttpDispatcher::new("https://api.clinic.example/v1/", TestClient::new(response))
    }

    #[test]
    fn status_classification() {
        let classify = |status: u16| classify_response(HttpResponse::new(status, Vec::new()));

        assert!(classify(200).is_ok());
        assert!(classify(204).is_ok());
        assert_eq!(classify(401), Err(DispatchError::AuthRequired));
        assert_eq!(classify(403), Err(DispatchError::AuthRequired));
        assert!(matches!(classify(409), Err(DispatchError::Conflict(_))));
        for status in [408, 425, 429, 500, 502, 503] {
            assert!(matches!(
                classify(status),
                Err(DispatchError::Unavailable { .. })
            ));
        }
        assert!(matches!(classify(400), Err(DispatchError::Rejected(_))));
        assert!(matches!(classify(422), Err(DispatchError::Rejected(_))));
    }

    #[test]
    fn error_message_from_json_body() {
        let response = HttpResponse::new(409, br#"{"message":"already clocked in"}"#.to_vec());
        assert_eq!(
            classify_response(response),
            Err(DispatchError::Conflict("already clocked in".into()))
        );

        let response = HttpResponse::new(422, b"name is required".to_vec());
        assert_eq!(
            classify_response(response),
            Err(DispatchError::Rejected("name is required".into()))
        );
    }

    #[tokio::test]
    async fn dispatch_builds_request() {
        let dispatcher = dispatcher(Ok(HttpResponse::new(201, br#"{"id":42}"#.to_vec())));
        dispatcher.set_bearer_token(Some("secret".into()));
        let key = OperationId::new();

        let ack = dispatcher
            .dispatch(OperationKind::PatientUpdate, &json!({"name": "Ana"}), &key)
            .await
            .unwrap();
        assert_eq!(ack.status, 201);
        assert_eq!(ack.body, json!({"id": 42}));

        let sent = dispatcher.client().sent.lock().clone();
        let request = &sent[0];
        assert_eq!(request.method, HttpMethod::Put);
        assert_eq!(request.url, "https://api.clinic.example/v1/patients/update");
        assert_eq!(request.header("idempotency-key"), Some(key.to_string().as_str()));
        assert_eq!(request.header("Authorization"), Some("Bearer secret"));
        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(&request.body).unwrap(),
            json!({"name": "Ana"})
        );
        assert!(dispatcher.last_error().is_none());
    }

    #[tokio::test]
    async fn transport_failure_is_unreachable() {
        let dispatcher = dispatcher(Err("connection refused".into()));
        let result = dispatcher
            .dispatch(OperationKind::ClockIn, &json!({}), &OperationId::new())
            .await;

        let err = result.unwrap_err();
        assert!(err.is_unreachable());
        assert!(dispatcher.last_error().unwrap().contains("connection refused"));
        assert!(dispatcher.probe().await.is_err());
    }

    #[tokio::test]
    async fn probe_hits_health_path() {
        let dispatcher = dispatcher(Ok(HttpResponse::new(200, Vec::new())))
            .with_health_path("/status");
        dispatcher.probe().await.unwrap();

        let sent = dispatcher.client().sent.lock().clone();
        assert_eq!(sent[0].method, HttpMethod::Get);
        assert_eq!(sent[0].url, "https://api.clinic.example/v1/status");
        assert!(sent[0].header(IDEMPOTENCY_HEADER).is_none());
    }
}
