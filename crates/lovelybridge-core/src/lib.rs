//! Core library for the LovelyBridge client.
//!
//! - `storage`: async key-value stores for session state
//! - `api`: REST client, transport and typed endpoints
//! - `auth`: session persistence, freshness policy and token refresh
//! - `config`: on-disk configuration
//! - `models`: request and response types

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod storage;

pub use api::{ApiClient, ApiError, ErrorBody};
pub use auth::{AuthSessionManager, SessionFreshness, SessionTokens};
pub use config::Config;
