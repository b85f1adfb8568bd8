//! Wire-level request/response types and the transport seam.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::ApiError;

/// HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// A replayable description of one API call, relative to the client's base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Set once a 401 on this request has been answered with a refresh
    pub retried: bool,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PATCH, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }
}

/// A fully resolved request as handed to the transport.
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    pub method: Method,
    pub url: String,
    pub bearer: Option<String>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_str(&self.body).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse JSON response: {}", e))
        })
    }
}

/// Sends one request and returns whatever the server answered.
///
/// Transports never interpret status codes; a 401 is an `Ok` response here.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: OutgoingRequest) -> Result<HttpResponse, ApiError>;
}

/// Production transport on top of reqwest.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::from_reqwest(&e))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: OutgoingRequest) -> Result<HttpResponse, ApiError> {
        debug!(method = %request.method, url = %request.url, "Sending HTTP request");

        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "application/json");
        if let Some(ref token) = request.bearer {
            builder = builder.bearer_auth(token);
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            let err = ApiError::from_reqwest(&e);
            warn!(url = %request.url, error = %err, "HTTP request error");
            err
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::from_reqwest(&e))?;
        debug!(status = %status, "Received HTTP response");

        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_descriptor_builders() {
        let req = RequestDescriptor::get("/api/auth/memories/")
            .with_query("q", "beach")
            .with_query("ordering", "-created_at");
        assert_eq!(req.method, Method::GET);
        assert_eq!(req.query.len(), 2);
        assert!(!req.retried);

        let req = RequestDescriptor::post("/api/auth/login/", json!({"email": "a@b.c"}));
        assert_eq!(req.body, Some(json!({"email": "a@b.c"})));
    }

    #[test]
    fn test_response_json_error_is_invalid_response() {
        let response = HttpResponse::new(StatusCode::OK, "not json");
        let parsed: Result<Value, _> = response.json();
        assert!(matches!(parsed, Err(ApiError::InvalidResponse(_))));
    }
}
