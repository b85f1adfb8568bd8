//! Access-token refresh on 401, with coalescing of concurrent failures.
//!
//! The first request to fail with 401 becomes the refresh holder: it flips the
//! in-flight flag, calls the refresh endpoint, and on the way out drains the
//! queue of requests that failed while it was working. Those are replayed in
//! the order they arrived once the new token is in place, or rejected with the
//! refresh error if it could not be obtained.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::session::SessionStore;
use crate::api::{ApiClient, ApiError, HttpResponse, RequestDescriptor, ResponseInterceptor};

/// Default refresh endpoint of the backend
pub const DEFAULT_REFRESH_PATH: &str = "/api/auth/token/refresh/";

/// Callback run once each time a refresh attempt fails for good.
pub type RefreshFailureHandler = Arc<dyn Fn() + Send + Sync>;

/// Single registration slot for the failure handler, shared with the manager.
pub(crate) type FailureSlot = Arc<Mutex<Option<RefreshFailureHandler>>>;

type Reply = oneshot::Sender<Result<HttpResponse, ApiError>>;

/// A request waiting for the in-flight refresh to settle
struct PendingRequest {
    request: RequestDescriptor,
    reply: Reply,
}

#[derive(Default)]
struct RefreshState {
    refreshing: bool,
    pending: VecDeque<PendingRequest>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access: Option<String>,
    refresh: Option<String>,
}

/// Tokens obtained from a successful refresh call
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RefreshedTokens {
    pub access: String,
    pub refresh: String,
}

/// Exchange `refresh_token` for a new access token.
///
/// The call bypasses the interceptor and carries no Authorization header.
pub(crate) async fn request_token_refresh(
    client: &ApiClient,
    refresh_path: &str,
    refresh_token: &str,
) -> Result<RefreshedTokens, ApiError> {
    debug!("Refreshing access token...");
    let request = RequestDescriptor::post(refresh_path, json!({ "refresh": refresh_token }));
    let response = client.send_unauthenticated(&request).await?;

    let data: RefreshResponse = response.json().map_err(|_| missing_access())?;
    let access = data.access.filter(|a| !a.is_empty()).ok_or_else(missing_access)?;
    let refresh = data
        .refresh
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| refresh_token.to_string());

    Ok(RefreshedTokens { access, refresh })
}

fn missing_access() -> ApiError {
    ApiError::InvalidResponse("missing access token in refresh response".to_string())
}

/// Response interceptor that renews the access token on 401.
pub(crate) struct AuthInterceptor {
    session: SessionStore,
    refresh_path: String,
    on_failure: FailureSlot,
    state: Mutex<RefreshState>,
}

impl AuthInterceptor {
    pub(crate) fn new(session: SessionStore, refresh_path: &str, on_failure: FailureSlot) -> Self {
        Self {
            session,
            refresh_path: refresh_path.to_string(),
            on_failure,
            state: Mutex::new(RefreshState::default()),
        }
    }

    /// True while a refresh attempt holds the flag
    #[cfg(test)]
    pub(crate) fn is_refreshing(&self) -> bool {
        self.lock_state().refreshing
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Either claim the refresh or join the queue behind the current holder.
    fn claim_or_enqueue(&self, request: RequestDescriptor) -> Claim {
        let mut state = self.lock_state();
        if state.refreshing {
            let (reply, receiver) = oneshot::channel();
            state.pending.push_back(PendingRequest { request, reply });
            debug!(queued = state.pending.len(), "Refresh in flight, request queued");
            Claim::Queued(receiver)
        } else {
            state.refreshing = true;
            Claim::Holder(request)
        }
    }

    /// Refresh, persist and apply. Runs while holding the flag.
    async fn renew(&self, client: &ApiClient, refresh_token: &str) -> Result<(), ApiError> {
        let tokens = request_token_refresh(client, &self.refresh_path, refresh_token).await?;
        self.session
            .save_refreshed(&tokens.access, &tokens.refresh)
            .await?;
        client.set_access_token(&tokens.access);
        info!(rotated = tokens.refresh != refresh_token, "Access token refreshed");
        Ok(())
    }

    fn notify_failure(&self) {
        let handler = self
            .on_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(handler) = handler {
            handler();
        }
    }
}

enum Claim {
    Holder(RequestDescriptor),
    Queued(oneshot::Receiver<Result<HttpResponse, ApiError>>),
}

/// Clears the in-flight flag exactly once per refresh attempt.
///
/// `release` hands the queue to the caller; if the holder is dropped before
/// releasing, the queue is rejected with `RefreshCancelled`.
struct RefreshGuard<'a> {
    state: &'a Mutex<RefreshState>,
    released: bool,
}

impl<'a> RefreshGuard<'a> {
    fn new(state: &'a Mutex<RefreshState>) -> Self {
        Self {
            state,
            released: false,
        }
    }

    fn release(mut self) -> VecDeque<PendingRequest> {
        self.released = true;
        self.take_pending()
    }

    fn take_pending(&self) -> VecDeque<PendingRequest> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.refreshing = false;
        std::mem::take(&mut state.pending)
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let pending = self.take_pending();
        if !pending.is_empty() {
            warn!(queued = pending.len(), "Refresh abandoned, rejecting queued requests");
        }
        for entry in pending {
            let _ = entry.reply.send(Err(ApiError::RefreshCancelled));
        }
    }
}

#[async_trait]
impl ResponseInterceptor for AuthInterceptor {
    async fn on_error(
        &self,
        client: &ApiClient,
        request: RequestDescriptor,
        error: ApiError,
    ) -> Result<HttpResponse, ApiError> {
        if !error.is_unauthorized() {
            return Err(error);
        }
        if request.retried || request.path.contains(&self.refresh_path) {
            return Err(error);
        }
        let Some(refresh_token) = self.session.refresh_token().await else {
            debug!("401 without a stored refresh token");
            return Err(error);
        };

        let mut request = match self.claim_or_enqueue(request) {
            Claim::Holder(request) => request,
            Claim::Queued(receiver) => {
                return receiver.await.unwrap_or(Err(ApiError::RefreshCancelled));
            }
        };
        request.retried = true;
        let guard = RefreshGuard::new(&self.state);

        match self.renew(client, &refresh_token).await {
            Ok(()) => {
                let pending = guard.release();
                if !pending.is_empty() {
                    debug!(queued = pending.len(), "Replaying queued requests");
                }
                for mut entry in pending {
                    entry.request.retried = true;
                    let client = client.clone();
                    tokio::spawn(async move {
                        let result = client.execute(entry.request).await;
                        let _ = entry.reply.send(result);
                    });
                }
                client.execute(request).await
            }
            Err(refresh_error) => {
                warn!(error = %refresh_error, "Token refresh failed, clearing session");
                if let Err(e) = self.session.clear().await {
                    warn!(error = %e, "Failed to clear session after refresh failure");
                }
                client.clear_access_token();

                let error = ApiError::SessionExpired(Box::new(refresh_error));
                for entry in guard.release() {
                    let _ = entry.reply.send(Err(error.clone()));
                }
                self.notify_failure();
                Err(error)
            }
        }
    }
}
