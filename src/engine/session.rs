// src/engine/session.rs

//! Wiring of one watch session.
//!
//! A session owns the notify backend, the coalescer task and the dispatcher
//! that fans coalesced events out to blocking workers. Stopping the session
//! tears these down in order: backend first (no new events), then the
//! coalescer (flushes its tail), then the dispatcher drains.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use globset::GlobSet;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

use crate::engine::hot_sync::HotSyncEngine;
use crate::engine::lock_ops::LockedFileOps;
use crate::engine::redeploy::RedeployDebouncer;
use crate::engine::retry::RetryPolicy;
use crate::errors::{HotSyncError, Result};
use crate::fs::{DeployFs, markers};
use crate::model::Deployment;
use crate::watch::bus::ObserverRegistry;
use crate::watch::coalescer::spawn_coalescer;
use crate::watch::event::CoalescedEvent;
use crate::watch::registrar::WatchRegistrar;
use crate::watch::watcher::{EventWatcher, NotifyWatcher, WatchFilter};

/// Maximum number of concurrent blocking workers a session may use.
pub const MAX_WORKERS: usize = 4;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub base_path: PathBuf,
    pub target_base: PathBuf,
    pub queue_capacity: usize,
    pub debounce_window: Duration,
    pub offer_timeout: Duration,
    pub worker_threads: usize,
    pub redeploy_delay: Duration,
    pub max_watch_depth: usize,
    pub excludes: Option<GlobSet>,
    pub retry: RetryPolicy,
}

/// A running watch session. Dropping it without [`WatchSession::stop`]
/// aborts the background tasks without draining.
pub struct WatchSession {
    watcher: Arc<NotifyWatcher>,
    debouncer: Arc<RedeployDebouncer>,
    coalescer: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

/// Build and start a session over an already-assembled deployment forest.
pub fn start(
    settings: SessionSettings,
    forest: &[Deployment],
    source_fs: Arc<dyn DeployFs>,
    target_fs: Arc<dyn DeployFs>,
) -> Result<WatchSession> {
    // The consumer scans the target root for archives and markers; if it
    // is not there, every copy would fail later anyway. Fail fast instead.
    if !target_fs.is_dir(&settings.target_base) {
        return Err(HotSyncError::WatchSetup(format!(
            "target root {} does not exist or is not a directory",
            settings.target_base.display()
        )));
    }

    let registry = Arc::new(ObserverRegistry::new());
    let (event_tx, event_rx) = mpsc::channel(settings.queue_capacity.max(1));

    let filter = Arc::new(WatchFilter::new(
        settings.base_path.clone(),
        settings.excludes.clone(),
    ));
    let watcher = NotifyWatcher::new(
        Arc::clone(&filter),
        Arc::clone(&registry),
        event_tx,
        settings.offer_timeout,
    )?;

    let registrar = Arc::new(WatchRegistrar::new(
        Arc::clone(&watcher) as Arc<dyn EventWatcher>,
        Arc::clone(&source_fs),
        filter,
        settings.max_watch_depth,
    ));
    registry.subscribe_technical(Arc::clone(&registrar) as _);

    let marker_fs = Arc::clone(&target_fs);
    let marker_base = settings.target_base.clone();
    let debouncer = Arc::new(RedeployDebouncer::new(
        settings.redeploy_delay,
        Arc::new(move |archive| {
            if let Err(err) = markers::request_redeploy(marker_fs.as_ref(), &marker_base, archive)
            {
                error!(?archive, error = %err, "failed to write redeploy marker");
            }
        }),
    ));

    let ops = LockedFileOps::new(source_fs, target_fs, settings.retry);
    let engine = Arc::new(HotSyncEngine::new(
        ops,
        Arc::clone(&registrar),
        Arc::clone(&debouncer),
        settings.target_base.clone(),
    ));
    engine.register_all(forest)?;
    registry.subscribe_functional(engine);

    let (batch_tx, batch_rx) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let coalescer = spawn_coalescer(event_rx, batch_tx, settings.debounce_window, shutdown_rx);
    let dispatcher = spawn_dispatcher(batch_rx, registry, settings.worker_threads);

    info!(
        base = ?settings.base_path,
        target = ?settings.target_base,
        "watch session started"
    );
    Ok(WatchSession {
        watcher,
        debouncer,
        coalescer,
        dispatcher,
        shutdown_tx: Some(shutdown_tx),
    })
}

/// Fan coalesced events out to the blocking pool, at most
/// `worker_threads` (clamped to `1..=MAX_WORKERS`) at a time. Exits once
/// the coalescer closes the batch channel, after draining in-flight work.
fn spawn_dispatcher(
    mut batch_rx: mpsc::Receiver<Vec<CoalescedEvent>>,
    registry: Arc<ObserverRegistry>,
    worker_threads: usize,
) -> JoinHandle<()> {
    let workers = worker_threads.clamp(1, MAX_WORKERS);
    tokio::spawn(async move {
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut in_flight = JoinSet::new();

        while let Some(batch) = batch_rx.recv().await {
            for event in batch {
                let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                    return;
                };
                let registry = Arc::clone(&registry);
                in_flight.spawn(async move {
                    let _permit = permit;
                    let result =
                        tokio::task::spawn_blocking(move || registry.notify_functional(&event))
                            .await;
                    if result.is_err() {
                        error!("event worker panicked");
                    }
                });
            }
            // Reap finished workers without blocking the next batch.
            while in_flight.try_join_next().is_some() {}
        }
        while in_flight.join_next().await.is_some() {}
    })
}

impl WatchSession {
    /// Orderly shutdown: stop the backend, flush the coalescer tail, drain
    /// the dispatcher, cancel pending redeploy timers. Bounded by a grace
    /// period.
    pub async fn stop(mut self) {
        self.watcher.stop();
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            let _ = self.coalescer.await;
            let _ = self.dispatcher.await;
        })
        .await;
        if drained.is_err() {
            warn!("shutdown grace period elapsed before all workers drained");
        }
        self.debouncer.abort_all();
        info!("watch session stopped");
    }
}
