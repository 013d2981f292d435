//! Bearer injection and single-flight token refresh
//!
//! Every authenticated request passes through two hooks:
//!
//! - pre-request: the current access token (if any) is attached as a bearer
//!   credential
//! - post-response: a 401 on a request that has not been retried yet runs the
//!   refresh protocol, then the request is replayed once with the new token
//!
//! Refresh state machine:
//!
//! ```text
//!   Idle ──401──▶ Refreshing { waiters } ──settle──▶ Idle
//!                   │   ▲
//!                   └401┘ (enqueue waiter)
//! ```
//!
//! The first 401 flips `Idle` to `Refreshing` under a synchronous lock and
//! becomes the leader: it issues the one refresh call. Every 401 that arrives
//! while `Refreshing` pushes a oneshot sender onto the FIFO queue and waits.
//! When the refresh settles the leader returns to `Idle` and resolves every
//! waiter with the new token (each replays its own request) or rejects them
//! all with `AuthExpired` after clearing the stored session.
//!
//! A successful refresh bumps a generation counter. Requests remember the
//! generation they were sent under, so a 401 that arrives after a newer
//! token was already issued replays with that token instead of starting
//! another refresh. If a leader is dropped mid-refresh, the first released
//! waiter takes over and refreshes again.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use common::Secret;
use gym_auth::CredentialStore;
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};

use crate::dispatcher::Dispatcher;
use crate::error::{ApiError, Result};
use crate::refresh::refresh_session;
use crate::request::{ApiRequest, RawResponse};

/// What a queued request receives when the refresh settles. The error side
/// is the failure reason; waiters turn it into `ApiError::AuthExpired`.
type RefreshOutcome = std::result::Result<Secret<String>, String>;

type Waiters = VecDeque<oneshot::Sender<RefreshOutcome>>;

/// Interceptor refresh state.
#[derive(Debug, Default)]
struct RefreshState {
    /// Bumped by every successful refresh.
    generation: u64,
    phase: Phase,
}

#[derive(Debug, Default)]
enum Phase {
    #[default]
    Idle,
    Refreshing {
        waiters: Waiters,
    },
}

/// Role a 401'd request takes in the current refresh cycle.
enum Role {
    Leader,
    Waiter(oneshot::Receiver<RefreshOutcome>),
    /// A refresh settled after the request was sent.
    Superseded,
}

/// Attaches tokens and coordinates refresh for one credential store.
///
/// The refresh state is owned by the instance, so each client (and each
/// test) gets an independent state machine.
pub struct AuthInterceptor {
    dispatcher: Arc<dyn Dispatcher>,
    store: Arc<CredentialStore>,
    state: Mutex<RefreshState>,
}

impl AuthInterceptor {
    pub fn new(dispatcher: Arc<dyn Dispatcher>, store: Arc<CredentialStore>) -> Self {
        Self {
            dispatcher,
            store,
            state: Mutex::new(RefreshState::default()),
        }
    }

    pub fn dispatcher(&self) -> &Arc<dyn Dispatcher> {
        &self.dispatcher
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Whether a refresh call is currently outbound.
    pub fn is_refreshing(&self) -> bool {
        matches!(self.lock_state().phase, Phase::Refreshing { .. })
    }

    /// Number of requests parked behind the in-flight refresh.
    pub fn queued(&self) -> usize {
        match &self.lock_state().phase {
            Phase::Idle => 0,
            Phase::Refreshing { waiters } => waiters.len(),
        }
    }

    /// Send a request, refreshing and replaying it at most once on a 401.
    ///
    /// Returns the 2xx response; anything else is an `ApiError`.
    #[instrument(skip_all, fields(
        request_id = %format!("req_{}", uuid::Uuid::new_v4().as_simple()),
        method = %request.method,
        path = %request.path,
    ))]
    pub async fn execute(&self, mut request: ApiRequest) -> Result<RawResponse> {
        if !request.is_authenticated() {
            return self.send(&request).await?.into_success();
        }

        let generation = self.generation();
        self.authorize(&mut request).await;
        let response = self.send(&request).await?;
        if !response.is_unauthorized() || request.is_retried() {
            return response.into_success();
        }

        debug!("received 401, awaiting fresh token");
        request.mark_retried();
        let sent_with = request.bearer.take();
        let token = self
            .token_after(Some(generation), sent_with.as_ref())
            .await?;
        request.bearer = Some(token);

        let retried = self.send(&request).await?;
        if retried.is_unauthorized() {
            warn!("request still unauthorized after refresh, not retrying again");
        }
        retried.into_success()
    }

    /// Obtain a fresh access token through the single-flight protocol.
    ///
    /// Exactly one caller per cycle performs the refresh; concurrent callers
    /// wait for its outcome. Fails with `AuthExpired` (after the session has
    /// been cleared) if the refresh fails.
    pub async fn fresh_token(&self) -> Result<Secret<String>> {
        self.token_after(None, None).await
    }

    /// Token to replay a 401'd request with. `seen` is the generation the
    /// request was sent under and `sent_with` its bearer; `None` forces a
    /// refresh cycle.
    async fn token_after(
        &self,
        mut seen: Option<u64>,
        sent_with: Option<&Secret<String>>,
    ) -> Result<Secret<String>> {
        loop {
            match self.enter_refresh(seen) {
                Role::Superseded => match self.store.access_token().await {
                    Some(current)
                        if sent_with.is_none_or(|sent| sent.expose() != current.expose()) =>
                    {
                        debug!("token replaced since the request was sent, reusing it");
                        return Ok(current);
                    }
                    Some(_) => seen = None,
                    None => {
                        return Err(ApiError::AuthExpired(
                            "session was cleared".into(),
                        ));
                    }
                },
                Role::Waiter(rx) => {
                    crate::metrics::record_refresh_waiter();
                    match rx.await {
                        Ok(Ok(token)) => return Ok(token),
                        Ok(Err(reason)) => return Err(ApiError::AuthExpired(reason)),
                        Err(_) => debug!("refresh leader went away, taking over"),
                    }
                }
                Role::Leader => return self.lead().await,
            }
        }
    }

    /// Run one refresh cycle and resolve the queue in arrival order.
    async fn lead(&self) -> Result<Secret<String>> {
        let cycle = RefreshCycle {
            state: &self.state,
            settled: false,
        };
        let outcome = self.refresh().await;
        let waiters = cycle.settle(outcome.is_ok());

        info!(queued = waiters.len(), ok = outcome.is_ok(), "refresh settled");
        let shared: RefreshOutcome = match &outcome {
            Ok(token) => Ok(token.clone()),
            Err(ApiError::AuthExpired(reason)) => Err(reason.clone()),
            Err(other) => Err(other.to_string()),
        };
        for waiter in waiters {
            // A waiter whose caller went away has nothing to resolve
            let _ = waiter.send(shared.clone());
        }
        outcome
    }

    /// Pre-request hook.
    async fn authorize(&self, request: &mut ApiRequest) {
        request.bearer = self.store.access_token().await;
    }

    async fn send(&self, request: &ApiRequest) -> Result<RawResponse> {
        let response = self.dispatcher.dispatch(request).await?;
        crate::metrics::record_request(request.method.as_str(), response.status);
        Ok(response)
    }

    fn generation(&self) -> u64 {
        self.lock_state().generation
    }

    /// Check-and-set of the refresh state. Never yields between the check
    /// and the transition.
    fn enter_refresh(&self, seen: Option<u64>) -> Role {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        if seen.is_some_and(|g| g != state.generation) {
            return Role::Superseded;
        }
        match state.phase {
            Phase::Idle => {
                state.phase = Phase::Refreshing {
                    waiters: VecDeque::new(),
                };
                Role::Leader
            }
            Phase::Refreshing { ref mut waiters } => {
                let (tx, rx) = oneshot::channel();
                waiters.push_back(tx);
                debug!(queued = waiters.len(), "refresh in flight, queued");
                Role::Waiter(rx)
            }
        }
    }

    /// Leader side of the cycle: one refresh call, then persist the new pair
    /// or clear the session.
    async fn refresh(&self) -> Result<Secret<String>> {
        match self.try_refresh().await {
            Ok(token) => {
                crate::metrics::record_refresh("success");
                info!("token refresh succeeded");
                Ok(token)
            }
            Err(err) => {
                crate::metrics::record_refresh("failure");
                let reason = match err {
                    ApiError::AuthExpired(reason) => reason,
                    other => other.to_string(),
                };
                warn!(error = %reason, "token refresh failed, clearing session");
                if let Err(e) = self.store.clear_session().await {
                    warn!(error = %e, "failed to clear session after refresh failure");
                }
                Err(ApiError::AuthExpired(reason))
            }
        }
    }

    async fn try_refresh(&self) -> Result<Secret<String>> {
        let refresh_token = self
            .store
            .refresh_token()
            .await
            .ok_or_else(|| ApiError::AuthExpired("no refresh token stored".into()))?;
        let pair = refresh_session(self.dispatcher.as_ref(), &refresh_token).await?;
        self.store.save_tokens(&pair).await?;
        Ok(pair.access_token)
    }

    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Returns the state to `Idle` when the leader's cycle ends. If the leader
/// future is dropped mid-refresh, waiters are released (their receivers see
/// a closed channel and re-enter the protocol) instead of hanging forever.
struct RefreshCycle<'a> {
    state: &'a Mutex<RefreshState>,
    settled: bool,
}

impl RefreshCycle<'_> {
    fn settle(mut self, refreshed: bool) -> Waiters {
        self.settled = true;
        self.finish(refreshed)
    }

    fn finish(&self, refreshed: bool) -> Waiters {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if refreshed {
            state.generation = state.generation.wrapping_add(1);
        }
        match std::mem::take(&mut state.phase) {
            Phase::Refreshing { waiters } => waiters,
            Phase::Idle => VecDeque::new(),
        }
    }
}

impl Drop for RefreshCycle<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let abandoned = self.finish(false);
            warn!(queued = abandoned.len(), "refresh abandoned, releasing waiters");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gym_auth::{REFRESH_PATH, TokenPair};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// In-memory backend.
    ///
    /// - `auth/refresh` accepts `valid_refresh`, answers with `next` tokens,
    ///   and blocks on `gate` until the test releases it
    /// - every other path answers 200 with `{"path", "token"}` when the bearer
    ///   equals the current valid access token, 401 otherwise
    /// - a 401 on `held_path` is withheld until `release_held` is called
    struct FakeBackend {
        valid_access: Mutex<String>,
        valid_refresh: String,
        next: (String, Option<String>),
        refresh_fails: bool,
        gate: Semaphore,
        refresh_calls: AtomicUsize,
        refresh_bodies: Mutex<Vec<serde_json::Value>>,
        requests: Mutex<Vec<(String, Option<String>)>>,
        held_path: Option<String>,
        held: Semaphore,
    }

    impl FakeBackend {
        fn new() -> Self {
            Self {
                valid_access: Mutex::new("A2".into()),
                valid_refresh: "R1".into(),
                next: ("A2".into(), Some("R2".into())),
                refresh_fails: false,
                gate: Semaphore::new(Semaphore::MAX_PERMITS),
                refresh_calls: AtomicUsize::new(0),
                refresh_bodies: Mutex::new(Vec::new()),
                requests: Mutex::new(Vec::new()),
                held_path: None,
                held: Semaphore::new(0),
            }
        }

        /// Rejections on `path` park until `release_held` is called.
        fn holding(mut self, path: &str) -> Self {
            self.held_path = Some(path.into());
            self
        }

        fn release_held(&self) {
            self.held.add_permits(Semaphore::MAX_PERMITS / 2);
        }

        /// Refresh calls park until `open_gate` is called.
        fn gated(mut self) -> Self {
            self.gate = Semaphore::new(0);
            self
        }

        fn failing_refresh(mut self) -> Self {
            self.refresh_fails = true;
            self
        }

        fn open_gate(&self) {
            self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }

        fn refresh_calls(&self) -> usize {
            self.refresh_calls.load(Ordering::SeqCst)
        }

        /// Paths of non-refresh requests that carried `bearer`, in arrival order.
        fn paths_with(&self, bearer: &str) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, b)| b.as_deref() == Some(bearer))
                .map(|(path, _)| path.clone())
                .collect()
        }

        /// Bearer tokens seen on non-refresh requests, in arrival order.
        fn bearers_for(&self, path: &str) -> Vec<Option<String>> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|(p, _)| p == path)
                .map(|(_, bearer)| bearer.clone())
                .collect()
        }

        async fn handle(&self, request: &ApiRequest) -> Result<RawResponse> {
            if request.path == REFRESH_PATH {
                self.refresh_calls.fetch_add(1, Ordering::SeqCst);
                self.refresh_bodies
                    .lock()
                    .unwrap()
                    .push(request.body.clone().unwrap_or_default());
                let _permit = self.gate.acquire().await.unwrap();

                let sent = request.body.as_ref().and_then(|b| b["refreshToken"].as_str());
                if self.refresh_fails || sent != Some(self.valid_refresh.as_str()) {
                    return Ok(RawResponse::new(401, r#"{"message":"invalid refresh token"}"#));
                }
                let (access, refresh) = &self.next;
                let body = match refresh {
                    Some(r) => serde_json::json!({"token": access, "refreshToken": r, "expiresIn": 900}),
                    None => serde_json::json!({"accessToken": access}),
                };
                return Ok(RawResponse::new(200, body.to_string()));
            }

            let bearer = request.bearer.as_ref().map(|t| t.expose().clone());
            self.requests
                .lock()
                .unwrap()
                .push((request.path.clone(), bearer.clone()));
            let valid = self.valid_access.lock().unwrap().clone();
            if bearer.as_deref() == Some(valid.as_str()) {
                let body = serde_json::json!({"path": request.path, "token": valid});
                Ok(RawResponse::new(200, body.to_string()))
            } else {
                if self.held_path.as_deref() == Some(request.path.as_str()) {
                    let _permit = self.held.acquire().await.unwrap();
                }
                Ok(RawResponse::new(401, r#"{"message":"token expired"}"#))
            }
        }
    }

    impl Dispatcher for FakeBackend {
        fn dispatch<'a>(
            &'a self,
            request: &'a ApiRequest,
        ) -> Pin<Box<dyn Future<Output = Result<RawResponse>> + Send + 'a>> {
            Box::pin(self.handle(request))
        }
    }

    struct Harness {
        backend: Arc<FakeBackend>,
        interceptor: Arc<AuthInterceptor>,
        store: Arc<CredentialStore>,
        _dir: tempfile::TempDir,
    }

    async fn harness(backend: FakeBackend, tokens: Option<TokenPair>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            CredentialStore::load(dir.path().join("store"))
                .await
                .unwrap(),
        );
        if let Some(pair) = tokens {
            store.save_tokens(&pair).await.unwrap();
        }
        store
            .set(gym_auth::USER_DATA_KEY, &serde_json::json!({"id": 1}))
            .await
            .unwrap();
        let backend = Arc::new(backend);
        let interceptor = Arc::new(AuthInterceptor::new(backend.clone(), store.clone()));
        Harness {
            backend,
            interceptor,
            store,
            _dir: dir,
        }
    }

    async fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
        for _ in 0..500 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("timed out waiting for {what}");
    }

    /// Poll until `n` requests are parked behind the refresh.
    async fn wait_for_queue(interceptor: &AuthInterceptor, n: usize) {
        for _ in 0..500 {
            if interceptor.queued() == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!(
            "expected {n} queued requests, found {}",
            interceptor.queued()
        );
    }

    fn spawn_get(
        interceptor: &Arc<AuthInterceptor>,
        path: &str,
    ) -> tokio::task::JoinHandle<Result<RawResponse>> {
        let interceptor = interceptor.clone();
        let request = ApiRequest::get(path);
        tokio::spawn(async move { interceptor.execute(request).await })
    }

    #[tokio::test]
    async fn valid_token_passes_straight_through() {
        let h = harness(FakeBackend::new(), Some(TokenPair::new("A2", "R2"))).await;

        let response = h
            .interceptor
            .execute(ApiRequest::get("check/status"))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(h.backend.refresh_calls(), 0);
        assert_eq!(
            h.backend.bearers_for("check/status"),
            vec![Some("A2".to_string())]
        );
    }

    #[tokio::test]
    async fn expired_token_refreshes_once_and_retries_with_new_token() {
        let h = harness(FakeBackend::new(), Some(TokenPair::new("A1", "R1"))).await;

        let response = h
            .interceptor
            .execute(ApiRequest::get("check/status"))
            .await
            .unwrap();
        let body: serde_json::Value = response.decode().unwrap();
        assert_eq!(body["token"], "A2");

        assert_eq!(h.backend.refresh_calls(), 1);
        assert_eq!(
            h.backend.refresh_bodies.lock().unwrap()[0],
            serde_json::json!({"refreshToken": "R1"})
        );
        assert_eq!(
            h.backend.bearers_for("check/status"),
            vec![Some("A1".to_string()), Some("A2".to_string())]
        );
        assert_eq!(h.store.tokens().await, Some(TokenPair::new("A2", "R2")));
        assert!(!h.interceptor.is_refreshing());
    }

    #[tokio::test]
    async fn concurrent_401s_share_a_single_refresh() {
        let h = harness(FakeBackend::new().gated(), Some(TokenPair::new("A1", "R1"))).await;

        let paths = ["check/status", "check/concurrency", "auth/me", "heart-rate/1"];
        let handles: Vec<_> = paths
            .iter()
            .map(|path| spawn_get(&h.interceptor, path))
            .collect();

        // One leader is blocked in the refresh call, the rest are queued
        wait_for_queue(&h.interceptor, paths.len() - 1).await;
        assert!(h.interceptor.is_refreshing());
        assert_eq!(h.backend.refresh_calls(), 1);

        h.backend.open_gate();
        for handle in handles {
            let response = handle.await.unwrap().unwrap();
            let body: serde_json::Value = response.decode().unwrap();
            assert_eq!(body["token"], "A2");
        }

        assert_eq!(h.backend.refresh_calls(), 1);
        for path in paths {
            // One original attempt with A1, exactly one retry with A2
            assert_eq!(
                h.backend.bearers_for(path),
                vec![Some("A1".to_string()), Some("A2".to_string())],
                "path {path}"
            );
        }
        assert_eq!(h.store.tokens().await, Some(TokenPair::new("A2", "R2")));
        assert_eq!(h.interceptor.queued(), 0);
        assert!(!h.interceptor.is_refreshing());
    }

    #[tokio::test]
    async fn failed_refresh_rejects_every_waiter_and_clears_session() {
        let h = harness(
            FakeBackend::new().gated().failing_refresh(),
            Some(TokenPair::new("A1", "R1")),
        )
        .await;

        let handles: Vec<_> = (0..3)
            .map(|i| spawn_get(&h.interceptor, &format!("heart-rate/{i}")))
            .collect();
        wait_for_queue(&h.interceptor, 2).await;

        h.backend.open_gate();
        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert!(err.is_auth_expired(), "got: {err:?}");
        }

        assert_eq!(h.backend.refresh_calls(), 1);
        assert!(h.store.tokens().await.is_none());
        assert!(h.store.access_token().await.is_none());
        assert!(
            h.store
                .get::<serde_json::Value>(gym_auth::USER_DATA_KEY)
                .await
                .is_none()
        );
        assert!(!h.interceptor.is_refreshing());
    }

    #[tokio::test]
    async fn missing_refresh_token_fails_without_network_call() {
        let h = harness(FakeBackend::new(), None).await;
        h.store
            .set_secure(gym_auth::ACCESS_TOKEN_KEY, "A1".into())
            .await
            .unwrap();

        let err = h
            .interceptor
            .execute(ApiRequest::get("auth/me"))
            .await
            .unwrap_err();
        match err {
            ApiError::AuthExpired(reason) => assert!(reason.contains("no refresh token")),
            other => panic!("expected AuthExpired, got {other:?}"),
        }
        assert_eq!(h.backend.refresh_calls(), 0);
        assert!(h.store.access_token().await.is_none());
    }

    #[tokio::test]
    async fn second_401_after_refresh_is_not_retried_again() {
        let backend = FakeBackend::new();
        // Refresh hands out A2 but the backend only accepts A9
        *backend.valid_access.lock().unwrap() = "A9".into();
        let h = harness(backend, Some(TokenPair::new("A1", "R1"))).await;

        let err = h
            .interceptor
            .execute(ApiRequest::get("check/status"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(401));
        assert_eq!(h.backend.refresh_calls(), 1);
        assert_eq!(h.backend.bearers_for("check/status").len(), 2);
        // The refresh itself succeeded, so the session survives
        assert_eq!(h.store.tokens().await, Some(TokenPair::new("A2", "R2")));
    }

    #[tokio::test]
    async fn unrotated_refresh_keeps_old_refresh_token() {
        let mut backend = FakeBackend::new();
        backend.next = ("A2".into(), None);
        let h = harness(backend, Some(TokenPair::new("A1", "R1"))).await;

        h.interceptor
            .execute(ApiRequest::get("auth/me"))
            .await
            .unwrap();
        assert_eq!(h.store.tokens().await, Some(TokenPair::new("A2", "R1")));
    }

    #[tokio::test]
    async fn anonymous_request_skips_bearer_and_refresh() {
        let h = harness(FakeBackend::new(), Some(TokenPair::new("A1", "R1"))).await;

        let err = h
            .interceptor
            .execute(ApiRequest::post("auth/login").anonymous())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(401));
        assert_eq!(h.backend.refresh_calls(), 0);
        assert_eq!(h.backend.bearers_for("auth/login"), vec![None]);
        assert_eq!(h.store.tokens().await, Some(TokenPair::new("A1", "R1")));
    }

    #[tokio::test]
    async fn sequential_cycles_each_refresh_once() {
        let h = harness(FakeBackend::new(), Some(TokenPair::new("A1", "R1"))).await;
        h.interceptor
            .execute(ApiRequest::get("auth/me"))
            .await
            .unwrap();

        // Server rotates the accepted token again; the stored R2 is now the
        // only refresh token the fake will accept for the next cycle.
        let mut backend = FakeBackend::new();
        backend.valid_refresh = "R2".into();
        backend.next = ("A3".into(), Some("R3".into()));
        *backend.valid_access.lock().unwrap() = "A3".into();
        let backend = Arc::new(backend);
        let interceptor = AuthInterceptor::new(backend.clone(), h.store.clone());

        interceptor
            .execute(ApiRequest::get("auth/me"))
            .await
            .unwrap();
        assert_eq!(backend.refresh_calls(), 1);
        assert_eq!(h.store.tokens().await, Some(TokenPair::new("A3", "R3")));
    }

    #[tokio::test]
    async fn dropped_leader_hands_refresh_to_a_waiter() {
        let h = harness(FakeBackend::new().gated(), Some(TokenPair::new("A1", "R1"))).await;

        let leader = spawn_get(&h.interceptor, "auth/me");
        wait_until("leader refresh call", || h.backend.refresh_calls() == 1).await;
        let waiter = spawn_get(&h.interceptor, "check/status");
        wait_for_queue(&h.interceptor, 1).await;

        leader.abort();
        // The released waiter takes over and issues its own refresh call
        wait_until("takeover refresh call", || h.backend.refresh_calls() == 2).await;
        assert!(h.interceptor.is_refreshing());
        assert_eq!(h.interceptor.queued(), 0);

        h.backend.open_gate();
        let response = waiter.await.unwrap().unwrap();
        let body: serde_json::Value = response.decode().unwrap();
        assert_eq!(body["token"], "A2");
        assert_eq!(h.store.tokens().await, Some(TokenPair::new("A2", "R2")));
        assert!(!h.interceptor.is_refreshing());
    }

    #[tokio::test]
    async fn late_401_for_replaced_token_reuses_it_without_refreshing() {
        let h = harness(
            FakeBackend::new().holding("heart-rate/1"),
            Some(TokenPair::new("A1", "R1")),
        )
        .await;

        // Sent with A1, its 401 is held back by the backend
        let slow = spawn_get(&h.interceptor, "heart-rate/1");
        wait_until("slow request", || {
            !h.backend.bearers_for("heart-rate/1").is_empty()
        })
        .await;

        // Also sent with A1; runs a whole refresh cycle to A2/R2
        h.interceptor
            .execute(ApiRequest::get("check/status"))
            .await
            .unwrap();
        assert_eq!(h.backend.refresh_calls(), 1);

        h.backend.release_held();
        let response = slow.await.unwrap().unwrap();
        let body: serde_json::Value = response.decode().unwrap();
        assert_eq!(body["token"], "A2");

        assert_eq!(h.backend.refresh_calls(), 1);
        assert_eq!(
            h.backend.bearers_for("heart-rate/1"),
            vec![Some("A1".to_string()), Some("A2".to_string())]
        );
        assert_eq!(h.store.tokens().await, Some(TokenPair::new("A2", "R2")));
    }

    #[tokio::test]
    async fn late_401_after_logout_reports_expired_session() {
        let h = harness(
            FakeBackend::new().holding("heart-rate/1"),
            Some(TokenPair::new("A1", "R1")),
        )
        .await;

        let slow = spawn_get(&h.interceptor, "heart-rate/1");
        wait_until("slow request", || {
            !h.backend.bearers_for("heart-rate/1").is_empty()
        })
        .await;
        h.interceptor
            .execute(ApiRequest::get("check/status"))
            .await
            .unwrap();
        h.store.clear_session().await.unwrap();

        h.backend.release_held();
        let err = slow.await.unwrap().unwrap_err();
        assert!(err.is_auth_expired(), "got: {err:?}");
        assert_eq!(h.backend.refresh_calls(), 1);
        assert_eq!(h.backend.bearers_for("heart-rate/1").len(), 1);
    }

    #[tokio::test]
    async fn waiters_are_resolved_in_arrival_order() {
        let h = harness(FakeBackend::new().gated(), Some(TokenPair::new("A1", "R1"))).await;

        let mut handles = vec![spawn_get(&h.interceptor, "auth/me")];
        wait_until("leader refresh call", || h.backend.refresh_calls() == 1).await;

        // Enqueue one at a time so the arrival order is known
        let paths = ["heart-rate/3", "check/status", "heart-rate/1", "check/concurrency"];
        for (i, path) in paths.iter().enumerate() {
            handles.push(spawn_get(&h.interceptor, path));
            wait_for_queue(&h.interceptor, i + 1).await;
        }

        h.backend.open_gate();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let retried: Vec<String> = h
            .backend
            .paths_with("A2")
            .into_iter()
            .filter(|path| path != "auth/me")
            .collect();
        assert_eq!(retried, paths);
        assert_eq!(h.backend.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn connectivity_errors_pass_through_untouched() {
        struct Offline;
        impl Dispatcher for Offline {
            fn dispatch<'a>(
                &'a self,
                _request: &'a ApiRequest,
            ) -> Pin<Box<dyn Future<Output = Result<RawResponse>> + Send + 'a>> {
                Box::pin(async { Err(ApiError::Connectivity("connection refused".into())) })
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CredentialStore::load(dir.path().to_path_buf()).await.unwrap());
        store.save_tokens(&TokenPair::new("A1", "R1")).await.unwrap();
        let interceptor = AuthInterceptor::new(Arc::new(Offline), store.clone());

        let err = interceptor
            .execute(ApiRequest::get("check/status"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Connectivity(_)), "got: {err:?}");
        assert!(store.tokens().await.is_some());
    }
}
