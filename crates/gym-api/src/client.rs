//! Typed client used by the repositories

use std::sync::Arc;

use gym_auth::CredentialStore;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::dispatcher::{Dispatcher, DispatcherConfig, HttpDispatcher};
use crate::error::Result;
use crate::interceptor::AuthInterceptor;
use crate::request::{ApiRequest, RawResponse};

/// Cheap-to-clone handle over one interceptor. Clones share the credential
/// store and the refresh state machine.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<AuthInterceptor>,
}

impl ApiClient {
    pub fn new(dispatcher: Arc<dyn Dispatcher>, store: Arc<CredentialStore>) -> Self {
        Self {
            inner: Arc::new(AuthInterceptor::new(dispatcher, store)),
        }
    }

    /// Build a client backed by reqwest.
    pub fn http(config: DispatcherConfig, store: Arc<CredentialStore>) -> Result<Self> {
        let dispatcher = HttpDispatcher::new(config)?;
        Ok(Self::new(Arc::new(dispatcher), store))
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        self.inner.store()
    }

    pub fn dispatcher(&self) -> &Arc<dyn Dispatcher> {
        self.inner.dispatcher()
    }

    pub fn interceptor(&self) -> &AuthInterceptor {
        &self.inner
    }

    /// Send a prepared request through the interceptor.
    pub async fn send(&self, request: ApiRequest) -> Result<RawResponse> {
        self.inner.execute(request).await
    }

    /// Send and decode the 2xx body.
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        self.send(request).await?.decode()
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send_json(ApiRequest::get(path)).await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(ApiRequest::post(path).json(body)?).await
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(ApiRequest::put(path).json(body)?).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send_json(ApiRequest::delete(path)).await
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("store", &self.store().dir())
            .field("refreshing", &self.inner.is_refreshing())
            .finish()
    }
}
