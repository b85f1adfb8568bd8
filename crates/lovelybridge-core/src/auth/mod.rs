//! Authentication module for managing the user session.
//!
//! This module provides:
//! - `AuthSessionManager`: login/logout, token application and the 401
//!   refresh interceptor
//! - `SessionStore`: persisted tokens, login time and timeout preference
//! - `check_session_freshness`: the client-side inactivity timeout
//!
//! Sessions expire 30 minutes after login unless the user picks another
//! timeout.

pub mod manager;
pub mod refresh;
pub mod session;

pub use manager::AuthSessionManager;
pub use refresh::{RefreshFailureHandler, DEFAULT_REFRESH_PATH};
pub use session::{
    check_session_freshness, is_valid_session_timeout, SessionFreshness, SessionStore,
    SessionTokens, StoredSession, DEFAULT_SESSION_TIMEOUT_MINUTES, MAX_SESSION_TIMEOUT_MINUTES,
};
