//! Periodic removal of expired cache entries.
//!
//! Reads only evict the key they touch. Request keys include client-chosen
//! bounding boxes, so keys that are written once and never read again would
//! otherwise stay in the store until restart.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use unrest_cache::CacheStore;

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct CacheSweeper {
    cache: CacheStore,
    interval: Duration,
    running: Mutex<Option<Running>>,
}

impl CacheSweeper {
    pub fn new(cache: CacheStore, interval: Duration) -> Self {
        Self {
            cache,
            interval,
            running: Mutex::new(None),
        }
    }

    /// Spawns the sweep loop; no-op while it is already running.
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(sweep_loop(self.cache.clone(), self.interval, cancel.clone()));
        *running = Some(Running { cancel, handle });
        info!(interval_secs = self.interval.as_secs(), "cache sweeper started");
    }

    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        running.cancel.cancel();
        if let Err(e) = running.handle.await {
            warn!(error = %e, "cache sweeper task ended abnormally");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }
}

async fn sweep_loop(cache: CacheStore, every: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                cache.purge_expired().await;
            }
        }
    }
}
