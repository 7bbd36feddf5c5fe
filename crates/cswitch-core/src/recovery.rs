use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self as tokio_time, MissedTickBehavior};

use crate::blacklist::BlacklistTracker;

/// Periodic blacklist recovery sweep with an explicit stop handle.
pub struct RecoverySweeper {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RecoverySweeper {
    pub fn spawn(tracker: Arc<BlacklistTracker>, interval: Duration) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(sweep_loop(tracker, interval, stop_rx));
        Self { stop_tx, handle }
    }

    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(err) = self.handle.await {
            tracing::warn!(event = "recovery.join_failed", error = %err);
        }
    }
}

async fn sweep_loop(
    tracker: Arc<BlacklistTracker>,
    interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio_time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                match tracker.auto_recover_expired().await {
                    Ok(0) => {}
                    Ok(count) => tracing::info!(event = "recovery.sweep", recovered = count),
                    Err(err) => tracing::warn!(event = "recovery.sweep_failed", error = %err),
                }
            }
        }
    }
}
