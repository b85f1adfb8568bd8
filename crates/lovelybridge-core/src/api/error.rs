use std::fmt;

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

use crate::storage::StorageError;

#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("Unauthorized - token may be expired")]
    Unauthorized(ErrorBody),

    #[error("Access denied: {0}")]
    AccessDenied(ErrorBody),

    #[error("Resource not found: {0}")]
    NotFound(ErrorBody),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Request rejected with status {status}: {body}")]
    Rejected { status: u16, body: ErrorBody },

    #[error("Network error ({kind}): {message}")]
    Network { kind: &'static str, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Session expired: {0}")]
    SessionExpired(Box<ApiError>),

    #[error("Token refresh was abandoned before it completed")]
    RefreshCancelled,
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    pub fn from_status(status: StatusCode, body: &str) -> Self {
        match status.as_u16() {
            401 => ApiError::Unauthorized(ErrorBody::parse(body)),
            403 => ApiError::AccessDenied(ErrorBody::parse(body)),
            404 => ApiError::NotFound(ErrorBody::parse(body)),
            405 => ApiError::MethodNotAllowed,
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(Self::truncate_body(body)),
            code => ApiError::Rejected {
                status: code,
                body: ErrorBody::parse(body),
            },
        }
    }

    /// Categorize a transport failure the way it is logged
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            "timeout"
        } else if err.is_connect() {
            "connection_failed"
        } else if err.is_request() {
            "request_error"
        } else if err.is_body() {
            "body_error"
        } else if err.is_decode() {
            "decode_error"
        } else {
            "unknown"
        };
        ApiError::Network {
            kind,
            message: err.to_string(),
        }
    }

    /// HTTP status this error came from, if the server answered
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized(_) => Some(401),
            ApiError::AccessDenied(_) => Some(403),
            ApiError::NotFound(_) => Some(404),
            ApiError::MethodNotAllowed => Some(405),
            ApiError::RateLimited => Some(429),
            ApiError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_))
    }

    /// Parsed server body, when the error carries one
    pub fn body(&self) -> Option<&ErrorBody> {
        match self {
            ApiError::Unauthorized(body)
            | ApiError::AccessDenied(body)
            | ApiError::NotFound(body)
            | ApiError::Rejected { body, .. } => Some(body),
            ApiError::SessionExpired(inner) => inner.body(),
            _ => None,
        }
    }

    /// Message suitable for showing to a user
    pub fn user_message(&self) -> String {
        match self.body().and_then(ErrorBody::message) {
            Some(message) => message.to_string(),
            None => self.to_string(),
        }
    }
}

/// Server error payload, classified by the shapes the backend produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorBody {
    Empty,
    /// Body that is not a JSON object
    Text(String),
    Error(String),
    Detail(String),
    Message(String),
    NonFieldErrors(Vec<String>),
    /// Validation errors keyed by the first offending field
    FieldErrors { field: String, messages: Vec<String> },
    /// JSON object in none of the known shapes
    Other(String),
}

impl ErrorBody {
    pub fn parse(body: &str) -> Self {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            return ErrorBody::Empty;
        }
        let value = match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => value,
            Err(_) => return ErrorBody::Text(ApiError::truncate_body(trimmed)),
        };
        let object = match value {
            Value::Object(object) => object,
            Value::String(text) => return ErrorBody::Text(text),
            other => return ErrorBody::Other(other.to_string()),
        };

        if let Some(Value::String(error)) = object.get("error") {
            return ErrorBody::Error(error.clone());
        }
        if let Some(Value::String(detail)) = object.get("detail") {
            return ErrorBody::Detail(detail.clone());
        }
        if let Some(Value::String(message)) = object.get("message") {
            return ErrorBody::Message(message.clone());
        }
        if let Some(Value::Array(items)) = object.get("non_field_errors") {
            let messages = string_items(items);
            if !messages.is_empty() {
                return ErrorBody::NonFieldErrors(messages);
            }
        }
        // serde_json orders keys alphabetically, so "first field" is stable
        let field_errors = object.iter().find_map(|(field, value)| {
            let messages = string_items(value.as_array()?);
            (!messages.is_empty()).then(|| ErrorBody::FieldErrors {
                field: field.clone(),
                messages,
            })
        });
        field_errors.unwrap_or_else(|| ErrorBody::Other(ApiError::truncate_body(trimmed)))
    }

    /// First human-readable message, if the body has one
    pub fn message(&self) -> Option<&str> {
        match self {
            ErrorBody::Text(text)
            | ErrorBody::Error(text)
            | ErrorBody::Detail(text)
            | ErrorBody::Message(text) => Some(text.as_str()),
            ErrorBody::NonFieldErrors(messages) | ErrorBody::FieldErrors { messages, .. } => {
                messages.first().map(String::as_str)
            }
            ErrorBody::Empty | ErrorBody::Other(_) => None,
        }
    }

    pub fn message_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.message().unwrap_or(fallback)
    }
}

fn string_items(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| item.as_str().map(str::to_string))
        .collect()
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorBody::Empty => f.write_str("(empty body)"),
            ErrorBody::Other(raw) => f.write_str(raw),
            ErrorBody::FieldErrors { field, messages } => {
                write!(f, "{}: {}", field, messages.join(", "))
            }
            other => f.write_str(other.message().unwrap_or_default()),
        }
    }
}
