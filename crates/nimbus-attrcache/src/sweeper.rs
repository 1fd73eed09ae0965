//! Background expiry sweeper.
//!
//! One long-lived task wakes on a fixed interval and purges entries older
//! than the configured time-to-live. Each tick is two short lock passes: a
//! shared-mode scan that collects candidate paths without mutating, then an
//! exclusive-mode pass that re-checks every candidate's age before deleting.
//! The double-check keeps the exclusive hold short on large caches and spares
//! entries refreshed between the two passes.
//!
//! Shutdown is a handshake: [`Sweeper::shutdown`] signals cancellation and
//! then awaits the task's join handle, so the owner never leaks the task.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::tree::CacheTree;

/// Handle to the running expiry task.
pub struct Sweeper {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Spawns the sweeper on the current tokio runtime.
    ///
    /// `ttl` is the entry time-to-live; `interval` is the wake-up period
    /// (callers clamp it to a non-zero floor, see
    /// [`CacheSettings::sweep_interval`](crate::settings::CacheSettings::sweep_interval)).
    #[must_use]
    pub fn spawn(tree: Arc<RwLock<CacheTree>>, ttl: Duration, interval: Duration) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        sweep(&tree, ttl);
                    }
                    _ = stop_rx.changed() => break,
                }
            }
            debug!("expiry sweeper stopped");
        });
        Self { stop_tx, handle }
    }

    /// Signals cancellation and waits for the task to acknowledge.
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(true);
        if let Err(err) = self.handle.await {
            warn!(?err, "expiry sweeper did not stop cleanly");
        }
    }
}

/// One sweep: shared-mode scan, then exclusive-mode re-check and delete.
fn sweep(tree: &RwLock<CacheTree>, ttl: Duration) {
    let candidates = tree.read().expired_paths(ttl);
    if candidates.is_empty() {
        return;
    }
    let removed = tree.write().remove_expired(&candidates, ttl);
    if removed > 0 {
        debug!(candidates = candidates.len(), removed, "swept expired attribute entries");
    }
}
