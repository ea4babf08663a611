// src/watch/mod.rs

//! File watching pipeline: OS events in, coalesced batches out.
//!
//! ```text
//! notify backend ──▶ WatchFilter ──▶ bounded queue ──▶ coalescer ──▶ batches
//!        │
//!        └─▶ technical observers (inline: WatchRegistrar)
//! ```

pub mod bus;
pub mod coalescer;
pub mod event;
pub mod registrar;
pub mod watcher;

pub use bus::{FileEventObserver, ObserverRegistry};
pub use coalescer::{PendingEvents, spawn_coalescer};
pub use event::{CoalescedEvent, EventKind, PathEvent};
pub use registrar::WatchRegistrar;
pub use watcher::{EventWatcher, NotifyWatcher, WatchFilter, offer_event};
