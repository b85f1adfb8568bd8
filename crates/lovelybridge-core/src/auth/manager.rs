use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::refresh::{AuthInterceptor, FailureSlot, RefreshFailureHandler};
use super::session::{check_session_freshness, SessionFreshness, SessionStore, SessionTokens, StoredSession};
use crate::api::{ApiClient, ApiError};
use crate::models::{LoginRequest, LoginResponse};
use crate::storage::{KeyValueStore, StorageError};

/// Owns the persisted session and keeps the client's bearer token in step
/// with it.
///
/// Persistence goes through `SessionStore`; header changes go through the
/// shared `ApiClient`. A header change never precedes the write it mirrors.
pub struct AuthSessionManager {
    client: ApiClient,
    sessions: SessionStore,
    interceptor_installed: AtomicBool,
    on_failure: FailureSlot,
}

impl std::fmt::Debug for AuthSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSessionManager")
            .field("client", &self.client)
            .field(
                "interceptor_installed",
                &self.interceptor_installed.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

impl AuthSessionManager {
    pub fn new(client: ApiClient, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            client,
            sessions: SessionStore::new(store),
            interceptor_installed: AtomicBool::new(false),
            on_failure: Arc::new(Mutex::new(None)),
        }
    }

    /// The shared client every endpoint call goes through
    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// Persist a fresh login and apply its access token.
    pub async fn save_session(&self, tokens: &SessionTokens) -> Result<(), StorageError> {
        self.sessions.save(tokens, Utc::now()).await?;
        self.client.set_access_token(&tokens.access);
        debug!("Session saved");
        Ok(())
    }

    /// Forget the session. Safe to call when logged out.
    pub async fn clear_session(&self) -> Result<(), StorageError> {
        self.sessions.clear().await?;
        self.client.clear_access_token();
        debug!("Session cleared");
        Ok(())
    }

    pub fn apply_access_token(&self, token: &str) {
        self.client.set_access_token(token);
    }

    pub async fn load_session(&self) -> Option<StoredSession> {
        self.sessions.load().await
    }

    pub async fn load_session_timeout_minutes(&self) -> u32 {
        self.sessions.load_timeout_minutes().await
    }

    pub async fn save_session_timeout_minutes(&self, minutes: u32) -> Result<(), StorageError> {
        self.sessions.save_timeout_minutes(minutes).await
    }

    /// Install the 401 refresh interceptor on the shared client.
    ///
    /// Only the first call installs anything; later calls return `false` and
    /// leave both the refresh path and the failure handler as they were.
    pub fn install_auth_interceptor(
        &self,
        refresh_path: &str,
        on_failure: Option<RefreshFailureHandler>,
    ) -> bool {
        if self.interceptor_installed.swap(true, Ordering::SeqCst) {
            debug!("Auth interceptor already installed");
            return false;
        }
        if let Some(handler) = on_failure {
            self.set_refresh_failure_handler(Some(handler));
        }
        let interceptor = AuthInterceptor::new(
            self.sessions.clone(),
            refresh_path,
            Arc::clone(&self.on_failure),
        );
        if !self.client.set_interceptor(Arc::new(interceptor)) {
            warn!("Client already carries an interceptor, refresh handling not installed");
            return false;
        }
        debug!(refresh_path, "Auth interceptor installed");
        true
    }

    /// Replace (or remove) the callback run when a refresh fails.
    pub fn set_refresh_failure_handler(&self, handler: Option<RefreshFailureHandler>) {
        *self
            .on_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = handler;
    }

    /// Bring a stored session back at process start.
    ///
    /// An expired session is cleared; an active one has its access token
    /// applied.
    pub async fn restore_session(&self, now: DateTime<Utc>) -> Result<SessionFreshness, StorageError> {
        let session = self.load_session().await;
        let timeout = self.load_session_timeout_minutes().await;
        let freshness = check_session_freshness(session.as_ref(), now, timeout);

        match (freshness, session) {
            (SessionFreshness::Expired, _) => {
                info!(timeout_minutes = timeout, "Stored session expired, logging out");
                self.clear_session().await?;
            }
            (SessionFreshness::Active, Some(session)) => {
                self.apply_access_token(&session.access);
                debug!("Stored session restored");
            }
            _ => {}
        }
        Ok(freshness)
    }

    /// Log in with email and password and save the issued tokens.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let response = self.client.login(&request).await?;

        let tokens = SessionTokens {
            access: response.access.clone(),
            refresh: response.refresh.clone(),
            username: Some(response.username.clone()).filter(|u| !u.is_empty()),
            email: Some(response.email.clone()).filter(|e| !e.is_empty()),
        };
        self.save_session(&tokens).await?;
        info!(has_profile = response.has_profile, "Logged in");
        Ok(response)
    }

    pub async fn logout(&self) -> Result<(), StorageError> {
        self.clear_session().await?;
        info!("Logged out");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{HttpResponse, HttpTransport, OutgoingRequest};
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use chrono::Duration;
    use reqwest::StatusCode;

    struct NoNetwork;

    #[async_trait]
    impl HttpTransport for NoNetwork {
        async fn send(&self, _request: OutgoingRequest) -> Result<HttpResponse, ApiError> {
            Ok(HttpResponse::new(StatusCode::SERVICE_UNAVAILABLE, ""))
        }
    }

    /// Store whose writes always fail
    struct ReadOnlyStore;

    #[async_trait]
    impl KeyValueStore for ReadOnlyStore {
        async fn multi_get(&self, keys: &[&str]) -> Result<Vec<(String, Option<String>)>, StorageError> {
            Ok(keys.iter().map(|k| (k.to_string(), None)).collect())
        }

        async fn multi_set(&self, _items: &[(&str, String)]) -> Result<(), StorageError> {
            Err(StorageError::Io("read-only".to_string()))
        }

        async fn multi_remove(&self, _keys: &[&str]) -> Result<(), StorageError> {
            Err(StorageError::Io("read-only".to_string()))
        }
    }

    /// Memory store whose removals always fail
    #[derive(Default)]
    struct NoRemoveStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl KeyValueStore for NoRemoveStore {
        async fn multi_get(&self, keys: &[&str]) -> Result<Vec<(String, Option<String>)>, StorageError> {
            self.inner.multi_get(keys).await
        }

        async fn multi_set(&self, items: &[(&str, String)]) -> Result<(), StorageError> {
            self.inner.multi_set(items).await
        }

        async fn multi_remove(&self, _keys: &[&str]) -> Result<(), StorageError> {
            Err(StorageError::Io("remove failed".to_string()))
        }
    }

    fn manager_with(store: Arc<dyn KeyValueStore>) -> AuthSessionManager {
        AuthSessionManager::new(ApiClient::new("http://api.test", Arc::new(NoNetwork)), store)
    }

    #[tokio::test]
    async fn test_save_session_applies_header() {
        let manager = manager_with(Arc::new(MemoryStore::new()));
        manager.save_session(&SessionTokens::new("A1", "R1")).await.unwrap();

        assert_eq!(manager.client().access_token().as_deref(), Some("A1"));
        let session = manager.load_session().await.unwrap();
        assert_eq!(session.refresh, "R1");
        assert!(session.last_login_at.is_some());
    }

    #[tokio::test]
    async fn test_saved_session_loads_back() {
        let manager = manager_with(Arc::new(MemoryStore::new()));
        let mut tokens = SessionTokens::new("A1", "R1");
        tokens.username = Some("minji".to_string());
        tokens.email = Some("minji@example.com".to_string());

        let before = Utc::now();
        manager.save_session(&tokens).await.unwrap();
        let session = manager.load_session().await.unwrap();

        assert_eq!(session.access, tokens.access);
        assert_eq!(session.refresh, tokens.refresh);
        assert_eq!(session.username, tokens.username);
        assert_eq!(session.email, tokens.email);
        let saved_at = session.last_login().unwrap();
        assert!((saved_at - before).num_milliseconds().abs() < 1000);
    }

    #[tokio::test]
    async fn test_relogin_without_identity_is_a_single_write() {
        let manager = manager_with(Arc::new(NoRemoveStore::default()));
        let mut first = SessionTokens::new("A0", "R0");
        first.username = Some("minji".to_string());
        manager.save_session(&first).await.unwrap();

        manager.save_session(&SessionTokens::new("A1", "R1")).await.unwrap();

        assert_eq!(manager.client().access_token().as_deref(), Some("A1"));
        let session = manager.load_session().await.unwrap();
        assert_eq!(session.access, "A1");
        assert_eq!(session.refresh, "R1");
        assert_eq!(session.username, None);
    }

    #[tokio::test]
    async fn test_failed_save_leaves_header_alone() {
        let manager = manager_with(Arc::new(ReadOnlyStore));
        manager.apply_access_token("OLD");

        let err = manager
            .save_session(&SessionTokens::new("A1", "R1"))
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::Io("read-only".to_string()));
        assert_eq!(manager.client().access_token().as_deref(), Some("OLD"));
    }

    #[tokio::test]
    async fn test_clear_session_is_idempotent_and_keeps_timeout() {
        let manager = manager_with(Arc::new(MemoryStore::new()));
        manager.save_session_timeout_minutes(45).await.unwrap();
        manager.save_session(&SessionTokens::new("A1", "R1")).await.unwrap();

        manager.clear_session().await.unwrap();
        manager.clear_session().await.unwrap();

        assert_eq!(manager.load_session().await, None);
        assert_eq!(manager.client().access_token(), None);
        assert_eq!(manager.load_session_timeout_minutes().await, 45);
    }

    #[tokio::test]
    async fn test_install_interceptor_once() {
        let manager = manager_with(Arc::new(MemoryStore::new()));
        assert!(manager.install_auth_interceptor("/api/auth/token/refresh/", None));
        assert!(!manager.install_auth_interceptor("/other/", None));
    }

    #[tokio::test]
    async fn test_restore_expired_session_clears_it() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let sessions = SessionStore::new(Arc::clone(&store));
        let login = Utc::now() - Duration::minutes(31);
        sessions.save(&SessionTokens::new("A1", "R1"), login).await.unwrap();

        let manager = manager_with(store);
        let freshness = manager.restore_session(Utc::now()).await.unwrap();
        assert_eq!(freshness, SessionFreshness::Expired);
        assert_eq!(manager.load_session().await, None);
        assert_eq!(manager.client().access_token(), None);
    }

    #[tokio::test]
    async fn test_restore_active_session_applies_token() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let sessions = SessionStore::new(Arc::clone(&store));
        sessions
            .save(&SessionTokens::new("A1", "R1"), Utc::now() - Duration::minutes(5))
            .await
            .unwrap();

        let manager = manager_with(store);
        assert_eq!(manager.restore_session(Utc::now()).await.unwrap(), SessionFreshness::Active);
        assert_eq!(manager.client().access_token().as_deref(), Some("A1"));
    }

    #[tokio::test]
    async fn test_restore_without_session() {
        let manager = manager_with(Arc::new(MemoryStore::new()));
        assert_eq!(
            manager.restore_session(Utc::now()).await.unwrap(),
            SessionFreshness::NoSession
        );
    }
}
