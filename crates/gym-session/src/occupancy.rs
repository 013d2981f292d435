//! Background occupancy polling
//!
//! Keeps a display value fresh without blocking anything. A failed poll is
//! logged and the last published count stays in place.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::checks::CheckRepository;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Spawn a task that polls `check/concurrency` every `interval`, starting
/// immediately.
///
/// The receiver holds `None` until the first successful poll. The task ends
/// once every receiver has been dropped.
pub fn spawn_occupancy_poller(
    checks: CheckRepository,
    interval: Duration,
) -> (watch::Receiver<Option<u32>>, tokio::task::JoinHandle<()>) {
    let (tx, rx) = watch::channel(None);
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => poll_once(&checks, &tx).await,
                _ = tx.closed() => {
                    debug!("occupancy receivers dropped, stopping poller");
                    break;
                }
            }
        }
    });
    (rx, handle)
}

/// Run one poll, publishing the count on success.
async fn poll_once(checks: &CheckRepository, tx: &watch::Sender<Option<u32>>) {
    match checks.concurrency().await {
        Ok(count) => {
            tx.send_replace(Some(count));
        }
        Err(e) => {
            let last = *tx.borrow();
            warn!(error = %e, ?last, "occupancy poll failed, keeping last value");
        }
    }
}
