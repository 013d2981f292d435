//! Error taxonomy for API access
//!
//! The variants mirror how callers react:
//! - `Validation`: bad input caught locally, nothing was sent
//! - `AuthExpired`: the refresh failed and the session has been cleared
//! - `Connectivity`: the request went out but no response came back
//! - `Server`: the backend answered with a non-2xx status
//! - `Request`: the request could not be built (malformed URL, bad header)
//! - `InvalidResponse`: a 2xx body that doesn't match the expected shape
//! - `Storage`: the credential store failed to persist

use std::collections::BTreeMap;

use serde::Deserialize;

/// Message used when a server error body carries no message of its own.
pub const DEFAULT_SERVER_MESSAGE: &str = "server error";

/// Per-field validation messages reported by the backend.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("session expired: {0}")]
    AuthExpired(String),

    #[error("could not connect to the server, check your connection ({0})")]
    Connectivity(String),

    #[error("{message} (status {status})")]
    Server {
        message: String,
        status: u16,
        field_errors: Option<FieldErrors>,
    },

    #[error("request failed: {0}")]
    Request(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Result alias for API operations.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Error body shape used by the backend: `{"message": ..., "errors": {field: [..]}}`.
#[derive(Debug, Deserialize)]
struct ServerErrorBody {
    message: Option<String>,
    errors: Option<FieldErrors>,
}

impl ApiError {
    /// Build a `Server` error from a non-2xx status and its raw body.
    pub fn from_response(status: u16, body: &str) -> Self {
        let parsed = serde_json::from_str::<ServerErrorBody>(body).ok();
        let (message, field_errors) = match parsed {
            Some(body) => (body.message, body.errors),
            None => (None, None),
        };
        ApiError::Server {
            message: message
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| DEFAULT_SERVER_MESSAGE.to_string()),
            status,
            field_errors,
        }
    }

    /// HTTP status for server errors.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Field-level validation messages, when the server sent any.
    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            ApiError::Server { field_errors, .. } => field_errors.as_ref(),
            _ => None,
        }
    }

    /// Whether the error forced the session to be cleared.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, ApiError::AuthExpired(_))
    }
}

impl From<gym_auth::Error> for ApiError {
    fn from(err: gym_auth::Error) -> Self {
        ApiError::Storage(err.to_string())
    }
}
