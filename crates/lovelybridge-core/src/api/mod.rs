//! REST API client module for the LovelyBridge backend.
//!
//! This module provides the `ApiClient` for talking to the backend and the
//! typed wrappers for account, profile, couple, attendance and memory calls.
//!
//! The backend uses JWT bearer tokens; expired access tokens are renewed by
//! the interceptor installed from `auth`.

pub mod client;
mod endpoints;
pub mod error;
pub mod transport;

pub use reqwest::{Method, StatusCode};

pub use client::{ApiClient, ResponseInterceptor, DEFAULT_BASE_URL, DEFAULT_PROFILE_PATH};
pub use error::{ApiError, ErrorBody};
pub use transport::{
    HttpResponse, HttpTransport, OutgoingRequest, RequestDescriptor, ReqwestTransport,
    DEFAULT_REQUEST_TIMEOUT_SECS,
};
