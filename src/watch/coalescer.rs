// src/watch/coalescer.rs

//! Event coalescing and debouncing.
//!
//! Raw events are merged per path with the [`crate::watch::event`] merge
//! rule, kept in first-submitted order, and flushed as one batch once the
//! whole stream has been quiet for a full debounce window. The pending
//! state is owned by a single task; producers only ever talk to it through
//! the bounded channel, so no locking is involved.

use std::collections::{HashMap, VecDeque};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::watch::event::{CoalescedEvent, PathEvent};

/// Pending-event map plus FIFO submission order.
///
/// Merge and subsumption semantics live here, synchronously, so they can
/// be tested without any timers.
#[derive(Debug, Default)]
pub struct PendingEvents {
    events: HashMap<PathBuf, CoalescedEvent>,
    order: VecDeque<PathBuf>,
}

impl PendingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Merge a raw event into the pending state.
    pub fn submit(&mut self, event: PathEvent) {
        let path = normalize_lexically(&event.path);
        match self.events.get_mut(&path) {
            Some(existing) => existing.merge(event.kind),
            None => {
                self.order.push_back(path.clone());
                self.events
                    .insert(path.clone(), CoalescedEvent::new(path, event.kind));
            }
        }
    }

    /// Drain all pending events in submission order, applying subsumption:
    ///
    /// - a pending Delete on an ancestor replaces the event (the ancestor's
    ///   Delete is emitted once and its pending entry is consumed);
    /// - an emitted Delete removes all still-pending descendant events.
    ///
    /// Returns one group per surviving event.
    pub fn flush(&mut self) -> Vec<Vec<CoalescedEvent>> {
        let mut groups = Vec::new();
        while let Some(path) = self.order.pop_front() {
            let Some(event) = self.events.remove(&path) else {
                // Already consumed by an earlier subsumption in this flush.
                continue;
            };
            if event.is_noop() {
                trace!(?path, "dropping cancelled event");
                continue;
            }

            let mut group = vec![event];
            let mut current = path.parent();
            while let Some(ancestor) = current {
                let ancestor_deletes = self
                    .events
                    .get(ancestor)
                    .is_some_and(CoalescedEvent::is_deletion);
                if ancestor_deletes {
                    debug!(
                        ancestor = ?ancestor,
                        subsumed = ?path,
                        "ancestor deletion subsumes pending event"
                    );
                    if let Some(ancestor_event) = self.events.remove(ancestor) {
                        group = vec![ancestor_event];
                    }
                    break;
                }
                current = ancestor.parent();
            }

            if let Some(lead) = group.first() {
                if lead.is_deletion() {
                    let deleted = lead.path.clone();
                    self.events.retain(|pending_path, _| {
                        let subsumed =
                            pending_path.starts_with(&deleted) && *pending_path != deleted;
                        if subsumed {
                            debug!(
                                path = ?pending_path,
                                ancestor = ?deleted,
                                "pending event subsumed by ancestor deletion"
                            );
                        }
                        !subsumed
                    });
                }
            }
            groups.push(group);
        }
        self.order.clear();
        groups
    }
}

/// Spawn the coalescer task.
///
/// Consumes raw events from `rx` (the bounded producer channel), re-arms a
/// single global debounce deadline on every event (last-write-wins), and on
/// quiescence sends each surviving group into `batch_tx`. The task exits
/// when the producer channel closes or the shutdown signal fires; either
/// way the remaining pending events are flushed before it returns.
pub fn spawn_coalescer(
    mut rx: mpsc::Receiver<PathEvent>,
    batch_tx: mpsc::Sender<Vec<CoalescedEvent>>,
    debounce_window: Duration,
    mut shutdown: oneshot::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut pending = PendingEvents::new();
        let mut deadline: Option<tokio::time::Instant> = None;

        loop {
            tokio::select! {
                maybe_event = rx.recv() => match maybe_event {
                    Some(event) => {
                        trace!(?event, "coalescer received event");
                        pending.submit(event);
                        deadline = Some(tokio::time::Instant::now() + debounce_window);
                    }
                    None => break,
                },
                _ = sleep_until_or_pending(deadline), if deadline.is_some() => {
                    deadline = None;
                    for group in pending.flush() {
                        if batch_tx.send(group).await.is_err() {
                            debug!("batch channel closed; stopping coalescer");
                            return;
                        }
                    }
                }
                _ = &mut shutdown => {
                    debug!("coalescer shutdown requested");
                    break;
                }
            }
        }

        // Flush whatever is left so a clean producer-side close does not
        // lose the tail of the last burst.
        for group in pending.flush() {
            let _ = batch_tx.send(group).await;
        }
        debug!("coalescer finished");
    })
}

async fn sleep_until_or_pending(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        // Guarded out by `if deadline.is_some()`; never completes.
        None => std::future::pending().await,
    }
}

/// Lexical path cleanup: drops `.` components and folds `..` into the
/// accumulated prefix, without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}
