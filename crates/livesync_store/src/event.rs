//! Record lifecycle events.

use crate::record::Record;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle transition reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A record was created.
    Inserted,
    /// A record was saved.
    Updated,
    /// A record was submitted.
    Submitted,
    /// A submitted record is about to be cancelled.
    BeforeCancel,
    /// A record was deleted.
    Deleted,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EventKind::Inserted => "inserted",
            EventKind::Updated => "updated",
            EventKind::Submitted => "submitted",
            EventKind::BeforeCancel => "before-cancel",
            EventKind::Deleted => "deleted",
        };
        f.write_str(label)
    }
}

/// Receives lifecycle events from a store.
///
/// The store passes the caller's own record instance, so transient state on
/// that instance (such as the in-progress marker) is visible to listeners.
/// Listeners are invoked after the write, with no store lock held, and may
/// write back into the store.
pub trait RecordEventListener: Send + Sync {
    /// Called once per lifecycle transition.
    fn on_record_event(&self, record: &Record, kind: EventKind);
}

impl<F> RecordEventListener for F
where
    F: Fn(&Record, EventKind) + Send + Sync,
{
    fn on_record_event(&self, record: &Record, kind: EventKind) {
        self(record, kind);
    }
}
