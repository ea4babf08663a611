// src/watch/bus.rs

//! Dual-channel observer registry.
//!
//! Two independent observer sets:
//!
//! - *technical* observers run synchronously on the thread that pulls raw
//!   OS events, before anything is queued. This ordering matters: a brand
//!   new directory must get its watch registered before create events for
//!   files inside it can be missed.
//! - *functional* observers run on the worker pool, after coalescing.

use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::watch::event::{CoalescedEvent, EventKind};

/// Callbacks for resolved file events. All methods default to no-ops so an
/// observer only implements what it cares about.
pub trait FileEventObserver: Send + Sync {
    fn on_create(&self, _path: &Path) {}
    fn on_modify(&self, _path: &Path) {}
    fn on_delete(&self, _path: &Path) {}
    fn on_overflow(&self) {}
}

#[derive(Default)]
pub struct ObserverRegistry {
    technical: RwLock<Vec<Arc<dyn FileEventObserver>>>,
    functional: RwLock<Vec<Arc<dyn FileEventObserver>>>,
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("technical", &self.technical.read().map(|v| v.len()))
            .field("functional", &self.functional.read().map(|v| v.len()))
            .finish()
    }
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe_technical(&self, observer: Arc<dyn FileEventObserver>) {
        if let Ok(mut observers) = self.technical.write() {
            observers.push(observer);
        }
    }

    pub fn subscribe_functional(&self, observer: Arc<dyn FileEventObserver>) {
        if let Ok(mut observers) = self.functional.write() {
            observers.push(observer);
        }
    }

    /// Dispatch a raw event to the technical observers, inline on the
    /// calling (polling) thread.
    pub fn notify_technical(&self, path: &Path, kind: EventKind) {
        if let Ok(observers) = self.technical.read() {
            for observer in observers.iter() {
                dispatch(observer.as_ref(), path, kind);
            }
        }
    }

    /// Dispatch a coalesced event to the functional observers. Called from
    /// worker threads; NoOp events must have been filtered out upstream.
    pub fn notify_functional(&self, event: &CoalescedEvent) {
        let Some(kind) = event.kind else {
            return;
        };
        if let Ok(observers) = self.functional.read() {
            for observer in observers.iter() {
                dispatch(observer.as_ref(), &event.path, kind);
            }
        }
    }

    /// Surface an overflow to every observer on both channels.
    pub fn notify_overflow(&self) {
        for set in [&self.technical, &self.functional] {
            if let Ok(observers) = set.read() {
                for observer in observers.iter() {
                    observer.on_overflow();
                }
            }
        }
    }
}

fn dispatch(observer: &dyn FileEventObserver, path: &Path, kind: EventKind) {
    match kind {
        EventKind::Create => observer.on_create(path),
        EventKind::Modify => observer.on_modify(path),
        EventKind::Delete => observer.on_delete(path),
    }
}
