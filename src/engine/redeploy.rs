// src/engine/redeploy.rs

//! Debounced redeploy requests.
//!
//! Each synced change can ask the consumer to reload the enclosing archive.
//! Reloads are expensive, so requests are debounced per archive: a new
//! trigger cancels the pending timer and starts a fresh one, and only the
//! timer that survives a full quiet period fires the callback.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Delay bounds; configured values are clamped into this range.
pub const MIN_REDEPLOY_DELAY: Duration = Duration::from_millis(500);
pub const MAX_REDEPLOY_DELAY: Duration = Duration::from_secs(10);

pub fn clamp_redeploy_delay(delay: Duration) -> Duration {
    delay.clamp(MIN_REDEPLOY_DELAY, MAX_REDEPLOY_DELAY)
}

type RedeployCallback = dyn Fn(&Path) + Send + Sync;

pub struct RedeployDebouncer {
    delay: Duration,
    runtime: Handle,
    callback: Arc<RedeployCallback>,
    pending: Arc<Mutex<HashMap<PathBuf, JoinHandle<()>>>>,
}

impl std::fmt::Debug for RedeployDebouncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedeployDebouncer")
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

impl RedeployDebouncer {
    /// `callback` runs on the blocking pool once an archive has been quiet
    /// for the (clamped) delay. Captures the current runtime handle, so
    /// this must be constructed inside the runtime.
    pub fn new(delay: Duration, callback: Arc<RedeployCallback>) -> Self {
        Self {
            delay: clamp_redeploy_delay(delay),
            runtime: Handle::current(),
            callback,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Request a redeploy of `archive`, superseding any pending request for
    /// the same archive.
    pub fn trigger(&self, archive: PathBuf) {
        let delay = self.delay;
        let callback = Arc::clone(&self.callback);
        let pending = Arc::clone(&self.pending);
        let key = archive.clone();

        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Ok(mut map) = pending.lock() {
                map.remove(&key);
            }
            debug!(archive = ?key, "redeploy delay elapsed, requesting redeploy");
            let blocking_key = key.clone();
            let result = tokio::task::spawn_blocking(move || callback(&blocking_key)).await;
            if let Err(err) = result {
                warn!(archive = ?key, error = %err, "redeploy callback panicked");
            }
        });

        match self.pending.lock() {
            Ok(mut map) => {
                if let Some(previous) = map.insert(archive.clone(), task) {
                    debug!(?archive, "superseding pending redeploy request");
                    previous.abort();
                }
            }
            Err(_) => task.abort(),
        }
    }

    /// Cancel every pending request. Used at shutdown.
    pub fn abort_all(&self) {
        if let Ok(mut map) = self.pending.lock() {
            for (_, task) in map.drain() {
                task.abort();
            }
        }
    }
}

impl Drop for RedeployDebouncer {
    fn drop(&mut self) {
        self.abort_all();
    }
}
