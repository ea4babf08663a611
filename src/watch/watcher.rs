// src/watch/watcher.rs

//! Bridge between the OS watch primitive (`notify`) and the rest of the
//! engine.
//!
//! Every directory is registered individually with
//! `RecursiveMode::NonRecursive`; recursion, exclusions and re-registration
//! of new directories are handled by [`crate::watch::registrar`], not by
//! the backend. The notify callback thread plays the polling-thread role:
//! technical observers run inline there, then the event is offered to the
//! bounded producer channel feeding the coalescer.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use anyhow::{Result, anyhow};
use globset::GlobSet;
use notify::event::{EventKind as NotifyKind, ModifyKind, RenameMode};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::watch::bus::ObserverRegistry;
use crate::watch::event::{EventKind, PathEvent};

/// Seam over the OS watch primitive.
///
/// The registrar talks to this trait only, so tests can record
/// registrations and offered events without any real watcher.
pub trait EventWatcher: Send + Sync {
    /// Start watching a single directory (non-recursive).
    fn register(&self, path: &Path) -> Result<()>;

    /// Offer a raw event into the producer queue. Non-blocking apart from
    /// one short retry; on a full queue the event is dropped with a
    /// warning (documented lossy boundary).
    fn offer(&self, event: PathEvent);
}

/// Decides which raw event paths enter the producer queue.
///
/// Events outside every registered root are skipped (they can arrive for
/// pass-through directories whose siblings were not excludable at the OS
/// level), as are paths matching the configured exclude globs.
#[derive(Debug)]
pub struct WatchFilter {
    base: PathBuf,
    include_roots: RwLock<Vec<PathBuf>>,
    excludes: Option<GlobSet>,
}

impl WatchFilter {
    pub fn new(base: PathBuf, excludes: Option<GlobSet>) -> Self {
        Self {
            base,
            include_roots: RwLock::new(Vec::new()),
            excludes,
        }
    }

    pub fn add_include_root(&self, root: PathBuf) {
        if let Ok(mut roots) = self.include_roots.write() {
            roots.push(root);
        }
    }

    pub fn accepts(&self, path: &Path) -> bool {
        if let Some(excludes) = &self.excludes {
            let relative = path.strip_prefix(&self.base).unwrap_or(path);
            if excludes.is_match(relative) {
                return false;
            }
        }
        match self.include_roots.read() {
            Ok(roots) => roots.iter().any(|root| path.starts_with(root)),
            Err(_) => false,
        }
    }
}

/// `notify`-backed implementation of [`EventWatcher`].
pub struct NotifyWatcher {
    inner: Mutex<Option<RecommendedWatcher>>,
    tx: mpsc::Sender<PathEvent>,
    offer_timeout: Duration,
    filter: Arc<WatchFilter>,
}

impl std::fmt::Debug for NotifyWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyWatcher")
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

impl NotifyWatcher {
    /// Build the backend watcher. `tx` is the bounded producer channel into
    /// the coalescer; `registry` receives inline technical dispatches.
    pub fn new(
        filter: Arc<WatchFilter>,
        registry: Arc<ObserverRegistry>,
        tx: mpsc::Sender<PathEvent>,
        offer_timeout: Duration,
    ) -> Result<Arc<Self>> {
        let callback_filter = Arc::clone(&filter);
        let callback_tx = tx.clone();
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                handle_notify_event(
                    res,
                    &registry,
                    &callback_filter,
                    &callback_tx,
                    offer_timeout,
                );
            },
            Config::default(),
        )?;

        info!("file watcher backend started");
        Ok(Arc::new(Self {
            inner: Mutex::new(Some(watcher)),
            tx,
            offer_timeout,
            filter,
        }))
    }

    pub fn filter(&self) -> &WatchFilter {
        &self.filter
    }

    /// Drop the underlying notify watcher; no further OS events will be
    /// delivered after this returns.
    pub fn stop(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            if inner.take().is_some() {
                info!("file watcher backend stopped");
            }
        }
    }
}

impl EventWatcher for NotifyWatcher {
    fn register(&self, path: &Path) -> Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| anyhow!("watcher mutex poisoned"))?;
        match inner.as_mut() {
            Some(watcher) => {
                watcher.watch(path, RecursiveMode::NonRecursive)?;
                Ok(())
            }
            None => Err(anyhow!("watcher already stopped")),
        }
    }

    fn offer(&self, event: PathEvent) {
        offer_event(&self.tx, event, self.offer_timeout);
    }
}

/// Non-blocking offer into the bounded producer queue: one `try_send`, one
/// short sleep, one more `try_send`, then drop with a warning.
pub fn offer_event(tx: &mpsc::Sender<PathEvent>, event: PathEvent, offer_timeout: Duration) {
    let event = match tx.try_send(event) {
        Ok(()) => return,
        Err(TrySendError::Closed(_)) => {
            debug!("producer queue closed; dropping event");
            return;
        }
        Err(TrySendError::Full(event)) => event,
    };

    std::thread::sleep(offer_timeout);
    match tx.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => {
            warn!(path = ?event.path, "event queue is full, dropping event");
        }
        Err(TrySendError::Closed(_)) => {
            debug!("producer queue closed; dropping event");
        }
    }
}

fn handle_notify_event(
    res: notify::Result<Event>,
    registry: &ObserverRegistry,
    filter: &WatchFilter,
    tx: &mpsc::Sender<PathEvent>,
    offer_timeout: Duration,
) {
    let event = match res {
        Ok(event) => event,
        Err(err) => {
            warn!(error = %err, "file watch error");
            return;
        }
    };

    if event.need_rescan() {
        // The OS dropped events; surface distinctly instead of queueing.
        registry.notify_overflow();
        return;
    }

    let Some(kind) = map_notify_kind(&event.kind) else {
        return;
    };

    for path in event.paths {
        // Technical observers first, inline: a new directory must be
        // registered before any event inside it can slip past the watch.
        registry.notify_technical(&path, kind);

        if !filter.accepts(&path) {
            debug!(?path, "skipping event outside monitored directories");
            continue;
        }
        offer_event(tx, PathEvent::new(path, kind), offer_timeout);
    }
}

/// Map notify's event taxonomy onto create/modify/delete. Access events
/// carry no content change and are ignored.
fn map_notify_kind(kind: &NotifyKind) -> Option<EventKind> {
    match kind {
        NotifyKind::Create(_) => Some(EventKind::Create),
        NotifyKind::Remove(_) => Some(EventKind::Delete),
        NotifyKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(EventKind::Delete),
        NotifyKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(EventKind::Create),
        NotifyKind::Modify(_) => Some(EventKind::Modify),
        NotifyKind::Access(_) => None,
        NotifyKind::Any | NotifyKind::Other => Some(EventKind::Modify),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};

    #[test]
    fn notify_kinds_map_to_engine_kinds() {
        assert_eq!(
            map_notify_kind(&NotifyKind::Create(CreateKind::File)),
            Some(EventKind::Create)
        );
        assert_eq!(
            map_notify_kind(&NotifyKind::Remove(RemoveKind::Folder)),
            Some(EventKind::Delete)
        );
        assert_eq!(
            map_notify_kind(&NotifyKind::Modify(ModifyKind::Data(DataChange::Content))),
            Some(EventKind::Modify)
        );
        assert_eq!(
            map_notify_kind(&NotifyKind::Modify(ModifyKind::Name(RenameMode::From))),
            Some(EventKind::Delete)
        );
        assert_eq!(
            map_notify_kind(&NotifyKind::Modify(ModifyKind::Name(RenameMode::To))),
            Some(EventKind::Create)
        );
    }

    #[test]
    fn filter_requires_an_include_root() {
        let filter = WatchFilter::new(PathBuf::from("/p"), None);
        assert!(!filter.accepts(Path::new("/p/m/file.txt")));
        filter.add_include_root(PathBuf::from("/p/m"));
        assert!(filter.accepts(Path::new("/p/m/file.txt")));
        assert!(!filter.accepts(Path::new("/p/other/file.txt")));
    }

    #[test]
    fn filter_applies_exclude_globs_relative_to_base() {
        let mut builder = globset::GlobSetBuilder::new();
        builder.add(globset::Glob::new("**/*.swp").unwrap());
        let filter = WatchFilter::new(PathBuf::from("/p"), Some(builder.build().unwrap()));
        filter.add_include_root(PathBuf::from("/p"));
        assert!(filter.accepts(Path::new("/p/m/file.txt")));
        assert!(!filter.accepts(Path::new("/p/m/file.txt.swp")));
    }
}
