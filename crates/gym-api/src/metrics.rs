//! Request and refresh counters
//!
//! - `api_requests_total` (counter): labels `method`, `status`
//! - `api_token_refresh_total` (counter): label `outcome` (`success`/`failure`)
//! - `api_refresh_waiters_total` (counter): requests that queued behind a refresh
//!
//! Nothing is exported by this crate; the calls are no-ops until the host
//! process installs a recorder.

/// Record one dispatched request and the status it came back with.
pub fn record_request(method: &str, status: u16) {
    metrics::counter!(
        "api_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record the outcome of one refresh cycle.
pub fn record_refresh(outcome: &'static str) {
    metrics::counter!("api_token_refresh_total", "outcome" => outcome).increment(1);
}

/// Record a request that queued behind an in-flight refresh.
pub fn record_refresh_waiter() {
    metrics::counter!("api_refresh_waiters_total").increment(1);
}
