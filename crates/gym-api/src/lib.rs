//! Authenticated access layer for the gym member API
//!
//! Requests flow through three pieces:
//! - `Dispatcher` sends one HTTP exchange (base URL, timeout, default headers)
//! - `AuthInterceptor` attaches the bearer token and, on a 401, runs the
//!   single-flight refresh: one caller refreshes, every other 401 waits in a
//!   FIFO queue and retries once the new token is known
//! - `ApiClient` wraps both behind typed get/post/put/delete helpers
//!
//! All failures are reported as `ApiError`, whose variants are what calling
//! code branches on (validation, expired session, connectivity, server).

pub mod client;
pub mod dispatcher;
pub mod error;
pub mod interceptor;
pub mod metrics;
pub mod refresh;
pub mod request;

pub use client::ApiClient;
pub use dispatcher::{DEFAULT_TIMEOUT, Dispatcher, DispatcherConfig, HttpDispatcher};
pub use error::{ApiError, Result};
pub use interceptor::AuthInterceptor;
pub use refresh::refresh_session;
pub use request::{ApiRequest, Method, RawResponse};
