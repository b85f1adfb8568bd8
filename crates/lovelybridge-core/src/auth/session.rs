use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::storage::{KeyValueStore, StorageError};

pub(crate) const ACCESS_KEY: &str = "auth.access";
pub(crate) const REFRESH_KEY: &str = "auth.refresh";
pub(crate) const USERNAME_KEY: &str = "auth.username";
pub(crate) const EMAIL_KEY: &str = "auth.email";
pub(crate) const LAST_LOGIN_KEY: &str = "auth.last_login_at";
pub(crate) const SESSION_TIMEOUT_KEY: &str = "auth.session_timeout_min";

/// Every key owned by a login; the timeout preference is not among them.
const SESSION_KEYS: [&str; 5] = [ACCESS_KEY, REFRESH_KEY, USERNAME_KEY, EMAIL_KEY, LAST_LOGIN_KEY];

/// Inactivity ceiling used when none is configured.
pub const DEFAULT_SESSION_TIMEOUT_MINUTES: u32 = 30;

/// Largest timeout a user may pick.
pub const MAX_SESSION_TIMEOUT_MINUTES: u32 = 240;

/// Tokens handed out by a successful login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTokens {
    pub access: String,
    pub refresh: String,
    pub username: Option<String>,
    pub email: Option<String>,
}

impl SessionTokens {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
            username: None,
            email: None,
        }
    }
}

/// Session as read back from storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSession {
    pub access: String,
    pub refresh: String,
    pub username: Option<String>,
    pub email: Option<String>,
    /// Epoch milliseconds of the last login
    pub last_login_at: Option<i64>,
}

impl StoredSession {
    pub fn last_login(&self) -> Option<DateTime<Utc>> {
        self.last_login_at.and_then(DateTime::<Utc>::from_timestamp_millis)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFreshness {
    NoSession,
    Expired,
    Active,
}

/// Decide whether a stored session is still inside the inactivity timeout.
///
/// A session without a login timestamp predates the timeout setting and is
/// treated as active.
pub fn check_session_freshness(
    session: Option<&StoredSession>,
    now: DateTime<Utc>,
    timeout_minutes: u32,
) -> SessionFreshness {
    let Some(session) = session else {
        return SessionFreshness::NoSession;
    };
    let last_login_at = match session.last_login_at {
        Some(ms) if ms > 0 => ms,
        _ => return SessionFreshness::Active,
    };

    let elapsed_ms = now.timestamp_millis() - last_login_at;
    if elapsed_ms > i64::from(timeout_minutes) * 60_000 {
        SessionFreshness::Expired
    } else {
        SessionFreshness::Active
    }
}

/// Whether a user-entered timeout is inside the accepted range
pub fn is_valid_session_timeout(minutes: u32) -> bool {
    (1..=MAX_SESSION_TIMEOUT_MINUTES).contains(&minutes)
}

/// Stored timeout value, or the default when it is not a positive number.
///
/// Fractional and exponent forms ("45.5", "1e2") are accepted and rounded up
/// to whole minutes.
fn parse_timeout_minutes(value: Option<&str>) -> u32 {
    value
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|minutes| minutes.is_finite() && *minutes > 0.0)
        .map(|minutes| minutes.ceil().min(f64::from(u32::MAX)) as u32)
        .unwrap_or(DEFAULT_SESSION_TIMEOUT_MINUTES)
}

/// Persistence half of the session: reads and writes the session keys.
/// Knows nothing about HTTP headers.
#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").finish_non_exhaustive()
    }
}

impl SessionStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Write tokens, identity and the login timestamp in one batch.
    ///
    /// Identity the new tokens do not carry is written as an empty value, so
    /// a previous login's username or email cannot survive the batch.
    pub async fn save(&self, tokens: &SessionTokens, now: DateTime<Utc>) -> Result<(), StorageError> {
        let items = [
            (ACCESS_KEY, tokens.access.clone()),
            (REFRESH_KEY, tokens.refresh.clone()),
            (USERNAME_KEY, tokens.username.clone().unwrap_or_default()),
            (EMAIL_KEY, tokens.email.clone().unwrap_or_default()),
            (LAST_LOGIN_KEY, now.timestamp_millis().to_string()),
        ];
        self.store.multi_set(&items).await
    }

    /// Replace the token values after a refresh; the login timestamp stays.
    pub async fn save_refreshed(&self, access: &str, refresh: &str) -> Result<(), StorageError> {
        self.store
            .multi_set(&[(ACCESS_KEY, access.to_string()), (REFRESH_KEY, refresh.to_string())])
            .await
    }

    pub async fn clear(&self) -> Result<(), StorageError> {
        self.store.multi_remove(&SESSION_KEYS).await
    }

    /// Load the stored session. Read failures count as "no session".
    pub async fn load(&self) -> Option<StoredSession> {
        let entries = match self.store.multi_get(&SESSION_KEYS).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Failed to read session, treating as logged out");
                return None;
            }
        };
        let mut values = entries.into_iter().map(|(_, value)| value);
        let access = values.next().flatten();
        let refresh = values.next().flatten();
        let username = values.next().flatten();
        let email = values.next().flatten();
        let last_login_at = values.next().flatten();

        let (Some(access), Some(refresh)) = (non_empty(access), non_empty(refresh)) else {
            debug!("No complete session stored");
            return None;
        };

        Some(StoredSession {
            access,
            refresh,
            username: non_empty(username),
            email: non_empty(email),
            last_login_at: last_login_at.and_then(|raw| raw.trim().parse().ok()),
        })
    }

    /// Stored refresh token. Read failures count as absence.
    pub async fn refresh_token(&self) -> Option<String> {
        match self.store.get_item(REFRESH_KEY).await {
            Ok(token) => non_empty(token),
            Err(e) => {
                warn!(error = %e, "Failed to read refresh token");
                None
            }
        }
    }

    pub async fn load_timeout_minutes(&self) -> u32 {
        match self.store.get_item(SESSION_TIMEOUT_KEY).await {
            Ok(value) => parse_timeout_minutes(value.as_deref()),
            Err(e) => {
                warn!(error = %e, "Failed to read session timeout, using default");
                DEFAULT_SESSION_TIMEOUT_MINUTES
            }
        }
    }

    pub async fn save_timeout_minutes(&self, minutes: u32) -> Result<(), StorageError> {
        self.store
            .set_item(SESSION_TIMEOUT_KEY, &minutes.to_string())
            .await
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
