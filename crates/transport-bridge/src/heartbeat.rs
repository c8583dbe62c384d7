//! Client heartbeat ticker.

use std::future::Future;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::Result;

/// Fresh heartbeat nonce: nanoseconds since the Unix epoch.
pub fn nonce() -> String {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
        .to_string()
}

/// Call `send` with a fresh nonce every `interval` until `cancel` fires.
///
/// The first beat goes out one interval after start. Send failures are
/// logged and otherwise ignored; the receive loop notices dead streams.
pub async fn run_heartbeat<S, Fut>(interval: Duration, cancel: CancellationToken, mut send: S)
where
    S: FnMut(String) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {
                if let Err(e) = send(nonce()).await {
                    debug!(error = %e, "heartbeat send failed");
                }
            }
        }
    }
}
