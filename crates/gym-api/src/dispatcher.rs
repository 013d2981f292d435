//! Request dispatch over HTTP
//!
//! `Dispatcher` is the seam between the access layer and the network: it
//! sends one request and returns whatever status the server answered with.
//! Only failures where no response exists are errors here (connectivity or a
//! request that could not be built). Status interpretation belongs to the
//! interceptor.
//!
//! `HttpDispatcher` is the reqwest implementation with a fixed base URL,
//! per-request timeout and JSON default headers.

use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, warn};

use crate::error::{ApiError, Result};
use crate::request::{ApiRequest, Method, RawResponse};

/// Request timeout used when the configuration doesn't set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends a single request. Implemented over reqwest in production and by
/// in-memory fakes in tests.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn Dispatcher>`).
pub trait Dispatcher: Send + Sync {
    fn dispatch<'a>(
        &'a self,
        request: &'a ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<RawResponse>> + Send + 'a>>;
}

/// Process-wide dispatch settings, fixed at startup.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub base_url: String,
    pub timeout: Duration,
    /// Extra headers sent with every request, on top of the JSON defaults.
    pub default_headers: Vec<(String, String)>,
}

impl DispatcherConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
            default_headers: Vec::new(),
        }
    }
}

/// reqwest-backed dispatcher.
pub struct HttpDispatcher {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpDispatcher {
    pub fn new(config: DispatcherConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .default_headers(default_headers(&config.default_headers))
            .build()
            .map_err(|e| ApiError::Request(format!("building HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url,
            timeout: config.timeout,
        })
    }

    /// Join the request path onto the base URL and append query pairs.
    fn url_for(&self, request: &ApiRequest) -> Result<reqwest::Url> {
        let joined = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            request.path.trim_start_matches('/')
        );
        let mut url = reqwest::Url::parse(&joined)
            .map_err(|e| ApiError::Request(format!("invalid URL {joined}: {e}")))?;
        if !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &request.query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn send(&self, request: &ApiRequest) -> Result<RawResponse> {
        let url = self.url_for(request)?;
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, url).timeout(self.timeout);
        for (name, value) in &request.headers {
            let name = HeaderName::from_str(name)
                .map_err(|e| ApiError::Request(format!("invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ApiError::Request(format!("invalid header value: {e}")))?;
            builder = builder.header(name, value);
        }
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token.expose_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| self.classify(e))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| self.classify(e))?;
        debug!(status, bytes = body.len(), "response received");
        Ok(RawResponse { status, body })
    }

    /// Map a reqwest failure onto the no-response half of the taxonomy.
    fn classify(&self, err: reqwest::Error) -> ApiError {
        if err.is_builder() {
            ApiError::Request(err.to_string())
        } else if err.is_timeout() {
            ApiError::Connectivity(format!(
                "request timed out after {}s",
                self.timeout.as_secs_f64()
            ))
        } else {
            ApiError::Connectivity(err.to_string())
        }
    }
}

impl Dispatcher for HttpDispatcher {
    fn dispatch<'a>(
        &'a self,
        request: &'a ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<RawResponse>> + Send + 'a>> {
        Box::pin(self.send(request))
    }
}

/// JSON content negotiation plus configured extras. Invalid extras are
/// skipped with a warning rather than failing startup.
fn default_headers(extra: &[(String, String)]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    for (name, value) in extra {
        let name = match HeaderName::from_str(name) {
            Ok(n) => n,
            Err(e) => {
                warn!(header = %name, error = %e, "skipping invalid header name");
                continue;
            }
        };
        if name == reqwest::header::AUTHORIZATION {
            warn!("refusing to set a static authorization header");
            continue;
        }
        let value = match HeaderValue::from_str(value) {
            Ok(v) => v,
            Err(e) => {
                warn!(header = %name, error = %e, "skipping invalid header value");
                continue;
            }
        };
        headers.insert(name, value);
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;
    use common::Secret;
    use tokio::net::TcpListener;

    /// Start a mock backend that echoes method, path, query, headers and body.
    async fn start_echo_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/api", listener.local_addr().unwrap());

        tokio::spawn(async move {
            let app =
                axum::Router::new().fallback(|request: axum::http::Request<Body>| async move {
                    let mut headers = serde_json::Map::new();
                    for (name, value) in request.headers() {
                        headers.insert(
                            name.to_string(),
                            serde_json::Value::String(value.to_str().unwrap_or("").to_string()),
                        );
                    }
                    let method = request.method().to_string();
                    let path = request.uri().path().to_string();
                    let query = request.uri().query().unwrap_or("").to_string();
                    let body = axum::body::to_bytes(request.into_body(), 1024 * 1024)
                        .await
                        .unwrap();
                    axum::Json(serde_json::json!({
                        "method": method,
                        "path": path,
                        "query": query,
                        "headers": headers,
                        "body": String::from_utf8_lossy(&body),
                    }))
                });
            axum::serve(listener, app).await.unwrap();
        });

        url
    }

    fn dispatcher(base_url: &str) -> HttpDispatcher {
        HttpDispatcher::new(DispatcherConfig::new(base_url)).unwrap()
    }

    #[tokio::test]
    async fn joins_base_url_and_sends_json_defaults() {
        let base = start_echo_server().await;
        let request = ApiRequest::get("check/status");

        let response = dispatcher(&base).dispatch(&request).await.unwrap();
        assert_eq!(response.status, 200);
        let echo: serde_json::Value = response.decode().unwrap();
        assert_eq!(echo["method"], "GET");
        assert_eq!(echo["path"], "/api/check/status");
        assert_eq!(echo["headers"]["content-type"], "application/json");
        assert_eq!(echo["headers"]["accept"], "application/json");
        assert!(echo["headers"].get("authorization").is_none());
    }

    #[tokio::test]
    async fn sends_bearer_query_and_body() {
        let base = start_echo_server().await;
        let mut request = ApiRequest::post("heart-rate/9")
            .query("bpm", 80)
            .json(&serde_json::json!({"note": "rest"}))
            .unwrap();
        request.bearer = Some(Secret::from("A1"));

        let response = dispatcher(&base).dispatch(&request).await.unwrap();
        let echo: serde_json::Value = response.decode().unwrap();
        assert_eq!(echo["method"], "POST");
        assert_eq!(echo["path"], "/api/heart-rate/9");
        assert_eq!(echo["query"], "bpm=80");
        assert_eq!(echo["headers"]["authorization"], "Bearer A1");
        assert_eq!(echo["body"], r#"{"note":"rest"}"#);
    }

    #[tokio::test]
    async fn configured_headers_are_added_but_never_authorization() {
        let base = start_echo_server().await;
        let mut config = DispatcherConfig::new(base);
        config.default_headers = vec![
            ("x-gym-client".into(), "cli".into()),
            ("authorization".into(), "Bearer static".into()),
            ("bad header".into(), "x".into()),
        ];
        let dispatcher = HttpDispatcher::new(config).unwrap();

        let response = dispatcher
            .dispatch(&ApiRequest::get("auth/me"))
            .await
            .unwrap();
        let echo: serde_json::Value = response.decode().unwrap();
        assert_eq!(echo["headers"]["x-gym-client"], "cli");
        assert!(echo["headers"].get("authorization").is_none());
    }

    #[tokio::test]
    async fn non_2xx_is_returned_not_raised() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let app = axum::Router::new().fallback(|| async {
                (
                    StatusCode::UNAUTHORIZED,
                    [(axum::http::header::CONTENT_TYPE, "application/json")],
                    r#"{"message":"token expired"}"#,
                )
            });
            axum::serve(listener, app).await.unwrap();
        });

        let response = dispatcher(&base)
            .dispatch(&ApiRequest::get("auth/me"))
            .await
            .unwrap();
        assert_eq!(response.status, 401);
        assert!(response.body.contains("token expired"));
    }

    #[tokio::test]
    async fn dead_backend_is_a_connectivity_error() {
        // Bind then drop to get a port with nothing listening
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let err = dispatcher(&base)
            .dispatch(&ApiRequest::get("check/status"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Connectivity(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn timeout_is_a_connectivity_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            loop {
                let (socket, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    // Accept but never answer
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    drop(socket);
                });
            }
        });

        let mut config = DispatcherConfig::new(base);
        config.timeout = Duration::from_millis(50);
        let err = HttpDispatcher::new(config)
            .unwrap()
            .dispatch(&ApiRequest::get("check/concurrency"))
            .await
            .unwrap_err();
        match err {
            ApiError::Connectivity(msg) => assert!(msg.contains("timed out"), "got: {msg}"),
            other => panic!("expected Connectivity, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_base_url_is_a_request_error() {
        let err = dispatcher("not a url")
            .dispatch(&ApiRequest::get("auth/me"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Request(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn invalid_request_header_is_a_request_error() {
        let base = start_echo_server().await;
        let request = ApiRequest::get("auth/me").header("bad header", "x");
        let err = dispatcher(&base).dispatch(&request).await.unwrap_err();
        assert!(matches!(err, ApiError::Request(_)), "got: {err:?}");
    }
}
