// src/watch/event.rs

//! Raw and coalesced filesystem event types.

use std::path::PathBuf;
use std::time::Instant;

/// Kind of a raw filesystem event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Create,
    Modify,
    Delete,
}

/// One raw event as produced by the OS watch primitive (or offered
/// synthetically by the registrar for files discovered in new directories).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathEvent {
    pub path: PathBuf,
    pub kind: EventKind,
}

impl PathEvent {
    pub fn new(path: impl Into<PathBuf>, kind: EventKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Result of merging every raw event seen for one path within a debounce
/// window. `kind == None` means the burst cancelled itself out
/// (Create followed by Delete) and the event is dropped at flush time.
#[derive(Debug, Clone)]
pub struct CoalescedEvent {
    pub path: PathBuf,
    pub kind: Option<EventKind>,
    pub timestamp: Instant,
}

impl CoalescedEvent {
    pub fn new(path: PathBuf, kind: EventKind) -> Self {
        Self {
            path,
            kind: Some(kind),
            timestamp: Instant::now(),
        }
    }

    pub fn merge(&mut self, new_kind: EventKind) {
        self.kind = merge_kinds(self.kind, new_kind);
        self.timestamp = Instant::now();
    }

    pub fn is_noop(&self) -> bool {
        self.kind.is_none()
    }

    pub fn is_deletion(&self) -> bool {
        self.kind == Some(EventKind::Delete)
    }
}

/// The coalescing merge rule:
///
/// | existing | new    | result    |
/// |----------|--------|-----------|
/// | Create   | Delete | cancelled |
/// | Create   | Modify | Create    |
/// | Delete   | Create | Modify    |
/// | Delete   | Modify | Delete    |
/// | any      | any    | new kind  |
///
/// A cancelled (`None`) entry has no special case: the next kind wins, so
/// Create → Delete → Create within one window surfaces as a plain Create.
pub fn merge_kinds(existing: Option<EventKind>, new: EventKind) -> Option<EventKind> {
    use EventKind::*;
    match existing {
        None => Some(new),
        Some(Create) => match new {
            Delete => None,
            _ => Some(Create),
        },
        Some(Delete) => match new {
            Create => Some(Modify),
            _ => Some(Delete),
        },
        Some(Modify) => Some(new),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use EventKind::*;

    #[test]
    fn merge_table_matches_contract() {
        assert_eq!(merge_kinds(Some(Create), Delete), None);
        assert_eq!(merge_kinds(Some(Create), Modify), Some(Create));
        assert_eq!(merge_kinds(Some(Create), Create), Some(Create));
        assert_eq!(merge_kinds(Some(Delete), Create), Some(Modify));
        assert_eq!(merge_kinds(Some(Delete), Modify), Some(Delete));
        assert_eq!(merge_kinds(Some(Delete), Delete), Some(Delete));
        assert_eq!(merge_kinds(Some(Modify), Create), Some(Create));
        assert_eq!(merge_kinds(Some(Modify), Delete), Some(Delete));
        assert_eq!(merge_kinds(Some(Modify), Modify), Some(Modify));
    }

    #[test]
    fn cancelled_entry_takes_next_kind() {
        assert_eq!(merge_kinds(None, Create), Some(Create));
        assert_eq!(merge_kinds(None, Modify), Some(Modify));
        assert_eq!(merge_kinds(None, Delete), Some(Delete));
    }

    #[test]
    fn create_then_delete_is_noop_event() {
        let mut event = CoalescedEvent::new(PathBuf::from("/a/b"), Create);
        event.merge(Delete);
        assert!(event.is_noop());
    }
}
