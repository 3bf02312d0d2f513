use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Tracks the browser's keep-alive pings.
///
/// Every beat schedules one check after `timeout`. The check fires only if
/// no beat arrived in between, so overlapping checks cannot shut the
/// server down while the page is still open.
pub struct Heartbeat {
    timeout: Duration,
    last_seen: Mutex<Instant>,
    beats: AtomicU64,
}

impl Heartbeat {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_seen: Mutex::new(Instant::now()),
            beats: AtomicU64::new(0),
        }
    }

    /// Records a ping and returns its sequence number.
    pub fn beat(&self) -> u64 {
        *self.last_seen.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
        self.beats.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn beats(&self) -> u64 {
        self.beats.load(Ordering::SeqCst)
    }

    pub fn last_seen(&self) -> Instant {
        *self.last_seen.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn expired(&self, now: Instant) -> bool {
        now >= self.last_seen() + self.timeout
    }

    /// Waits one timeout and calls `on_expire` unless another beat arrived.
    pub fn spawn_check<F>(self: &Arc<Self>, on_expire: F) -> tokio::task::JoinHandle<bool>
    where
        F: FnOnce() + Send + 'static,
    {
        let heartbeat = self.clone();
        let seen = heartbeat.beats();
        tokio::spawn(async move {
            tokio::time::sleep(heartbeat.timeout).await;
            if heartbeat.beats() != seen {
                debug!("Heartbeat renewed");
                return false;
            }
            if !heartbeat.expired(Instant::now()) {
                return false;
            }
            info!("Heartbeat expired.");
            on_expire();
            true
        })
    }
}
