//! API client for communicating with the LovelyBridge REST backend.
//!
//! `ApiClient` owns the default bearer token and a single response-interceptor
//! slot. Every typed endpoint goes through `execute`, so an installed
//! interceptor sees every failed call.

use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::debug;

use super::transport::{HttpResponse, HttpTransport, OutgoingRequest, RequestDescriptor};
use super::ApiError;

/// Default backend address for local development
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

/// Default profile endpoint, read and written by the profile calls
pub const DEFAULT_PROFILE_PATH: &str = "/api/auth/profile/";

/// Hook that gets a chance to recover from a failed call.
///
/// Implementations either return a response in place of the error or pass the
/// error (or another one) back to the caller.
#[async_trait]
pub trait ResponseInterceptor: Send + Sync {
    async fn on_error(
        &self,
        client: &ApiClient,
        request: RequestDescriptor,
        error: ApiError,
    ) -> Result<HttpResponse, ApiError>;
}

struct ClientInner {
    base_url: RwLock<String>,
    profile_path: RwLock<String>,
    transport: Arc<dyn HttpTransport>,
    access_token: RwLock<Option<String>>,
    interceptor: OnceLock<Arc<dyn ResponseInterceptor>>,
}

/// Shared LovelyBridge API client.
/// Clone is cheap - all clones share the token, base URL and interceptor.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url())
            .field("has_token", &self.access_token().is_some())
            .field("intercepted", &self.inner.interceptor.get().is_some())
            .finish()
    }
}

impl ApiClient {
    pub fn new(base_url: &str, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                base_url: RwLock::new(base_url.to_string()),
                profile_path: RwLock::new(DEFAULT_PROFILE_PATH.to_string()),
                transport,
                access_token: RwLock::new(None),
                interceptor: OnceLock::new(),
            }),
        }
    }

    pub fn base_url(&self) -> String {
        self.inner
            .base_url
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_base_url(&self, base_url: &str) {
        *self
            .inner
            .base_url
            .write()
            .unwrap_or_else(PoisonError::into_inner) = base_url.to_string();
    }

    pub fn profile_path(&self) -> String {
        self.inner
            .profile_path
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_profile_path(&self, path: &str) {
        *self
            .inner
            .profile_path
            .write()
            .unwrap_or_else(PoisonError::into_inner) = path.to_string();
    }

    /// Set the bearer token sent with every authenticated request
    pub fn set_access_token(&self, token: &str) {
        *self
            .inner
            .access_token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(token.to_string());
    }

    pub fn clear_access_token(&self) {
        *self
            .inner
            .access_token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner
            .access_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install the response interceptor. Only the first installation takes
    /// effect; returns whether this call installed it.
    pub fn set_interceptor(&self, interceptor: Arc<dyn ResponseInterceptor>) -> bool {
        self.inner.interceptor.set(interceptor).is_ok()
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.base_url();
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn dispatch(
        &self,
        request: &RequestDescriptor,
        bearer: Option<String>,
    ) -> Result<HttpResponse, ApiError> {
        let outgoing = OutgoingRequest {
            method: request.method.clone(),
            url: self.url_for(&request.path),
            bearer,
            query: request.query.clone(),
            body: request.body.clone(),
        };
        let response = self.inner.transport.send(outgoing).await?;
        if response.status.is_success() {
            Ok(response)
        } else {
            debug!(
                method = %request.method,
                path = %request.path,
                status = %response.status,
                "Request failed"
            );
            Err(ApiError::from_status(response.status, &response.body))
        }
    }

    /// One attempt with the default bearer token, no interception
    pub async fn send(&self, request: &RequestDescriptor) -> Result<HttpResponse, ApiError> {
        self.dispatch(request, self.access_token()).await
    }

    /// One attempt without any Authorization header, no interception
    pub async fn send_unauthenticated(
        &self,
        request: &RequestDescriptor,
    ) -> Result<HttpResponse, ApiError> {
        self.dispatch(request, None).await
    }

    /// Send a request, letting the installed interceptor handle failures
    pub async fn execute(&self, request: RequestDescriptor) -> Result<HttpResponse, ApiError> {
        match self.send(&request).await {
            Ok(response) => Ok(response),
            Err(error) => match self.inner.interceptor.get() {
                Some(interceptor) => interceptor.on_error(self, request, error).await,
                None => Err(error),
            },
        }
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        request: RequestDescriptor,
    ) -> Result<T, ApiError> {
        self.execute(request).await?.json()
    }

    pub(crate) async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let request = RequestDescriptor::post(path, to_body(body)?);
        self.execute(request).await?.json()
    }

    pub(crate) async fn patch_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let request = RequestDescriptor::patch(path, to_body(body)?);
        self.execute(request).await?.json()
    }

    pub(crate) async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.execute(RequestDescriptor::delete(path)).await?;
        Ok(())
    }
}

fn to_body<B: Serialize>(body: &B) -> Result<Value, ApiError> {
    serde_json::to_value(body).map_err(|e| ApiError::InvalidRequest(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use std::sync::Mutex;

    /// Answers every request with a fixed status and records what it saw
    struct FixedTransport {
        status: StatusCode,
        seen: Mutex<Vec<OutgoingRequest>>,
    }

    #[async_trait]
    impl HttpTransport for FixedTransport {
        async fn send(&self, request: OutgoingRequest) -> Result<HttpResponse, ApiError> {
            self.seen.lock().unwrap().push(request);
            Ok(HttpResponse::new(self.status, "{}"))
        }
    }

    fn client_with(status: StatusCode) -> (ApiClient, Arc<FixedTransport>) {
        let transport = Arc::new(FixedTransport {
            status,
            seen: Mutex::new(Vec::new()),
        });
        (ApiClient::new("http://api.test/", transport.clone()), transport)
    }

    #[tokio::test]
    async fn test_send_attaches_bearer_and_joins_url() {
        let (client, transport) = client_with(StatusCode::OK);
        client.set_access_token("A1");
        client
            .send(&RequestDescriptor::get("/api/auth/couple/status/"))
            .await
            .unwrap();

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].url, "http://api.test/api/auth/couple/status/");
        assert_eq!(seen[0].bearer.as_deref(), Some("A1"));
    }

    #[tokio::test]
    async fn test_send_unauthenticated_omits_bearer() {
        let (client, transport) = client_with(StatusCode::OK);
        client.set_access_token("A1");
        client
            .send_unauthenticated(&RequestDescriptor::get("/x/"))
            .await
            .unwrap();
        assert_eq!(transport.seen.lock().unwrap()[0].bearer, None);
    }

    #[tokio::test]
    async fn test_execute_without_interceptor_returns_error() {
        let (client, _) = client_with(StatusCode::UNAUTHORIZED);
        let err = client
            .execute(RequestDescriptor::get("/x/"))
            .await
            .unwrap_err();
        assert!(err.is_unauthorized());
    }

    struct Rescue;

    #[async_trait]
    impl ResponseInterceptor for Rescue {
        async fn on_error(
            &self,
            _client: &ApiClient,
            _request: RequestDescriptor,
            _error: ApiError,
        ) -> Result<HttpResponse, ApiError> {
            Ok(HttpResponse::new(StatusCode::OK, "rescued"))
        }
    }

    #[tokio::test]
    async fn test_interceptor_installs_once() {
        let (client, _) = client_with(StatusCode::UNAUTHORIZED);
        assert!(client.set_interceptor(Arc::new(Rescue)));
        assert!(!client.set_interceptor(Arc::new(Rescue)));

        let response = client.execute(RequestDescriptor::get("/x/")).await.unwrap();
        assert_eq!(response.body, "rescued");
    }

    #[test]
    fn test_clear_access_token() {
        let (client, _) = client_with(StatusCode::OK);
        client.set_access_token("A1");
        let clone = client.clone();
        clone.clear_access_token();
        assert_eq!(client.access_token(), None);
    }
}
