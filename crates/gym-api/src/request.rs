//! Request and response values exchanged with a `Dispatcher`

use std::fmt;

use common::Secret;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{ApiError, Result};

/// HTTP methods used by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One retriable unit of work: everything needed to send (or resend) a call.
///
/// `bearer` is filled in by the interceptor right before dispatch. `retried`
/// marks a request that has already been replayed after a refresh so a
/// second 401 is reported instead of looping.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub headers: Vec<(String, String)>,
    pub bearer: Option<Secret<String>>,
    authenticated: bool,
    retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            headers: Vec::new(),
            bearer: None,
            authenticated: true,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::Put, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Attach a JSON body. Serialization failures are local request errors.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::Request(format!("serializing request body: {e}")))?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Opt out of bearer injection and 401 refresh handling. Used for the
    /// credential endpoints, where a 401 means "wrong password", not
    /// "expired token".
    pub fn anonymous(mut self) -> Self {
        self.authenticated = false;
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn is_retried(&self) -> bool {
        self.retried
    }

    pub(crate) fn mark_retried(&mut self) {
        self.retried = true;
    }
}

/// Raw response: any status the server returned, body unparsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    /// Pass 2xx through, turn anything else into `ApiError::Server`.
    pub fn into_success(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ApiError::from_response(self.status, &self.body))
        }
    }

    /// Decode the body as `T`.
    ///
    /// Bodies that are not JSON are offered to `T` as a JSON string, so
    /// plain-text replies decode into `String`. An empty body decodes as
    /// `null`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let trimmed = self.body.trim();
        let value = if trimmed.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(trimmed)
                .unwrap_or_else(|_| serde_json::Value::String(self.body.clone()))
        };
        serde_json::from_value(value)
            .map_err(|e| ApiError::InvalidResponse(format!("decoding response body: {e}")))
    }
}
