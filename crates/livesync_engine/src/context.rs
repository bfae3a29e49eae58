//! Per-attempt sync context.

use crate::config::Direction;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use std::fmt;
use tracing::warn;

/// The event that triggered a sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncEvent {
    /// Source record was created.
    Insert,
    /// Source record was saved, submitted or is being cancelled.
    Update,
    /// Source record was deleted.
    Delete,
    /// Operator-requested single record sync.
    Manual,
    /// Bulk or background run.
    Bulk,
}

impl SyncEvent {
    /// Returns true for operator-initiated runs, which ignore
    /// `on_update_action`.
    pub fn is_operator_initiated(self) -> bool {
        matches!(self, SyncEvent::Manual | SyncEvent::Bulk)
    }
}

impl fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncEvent::Insert => "Insert",
            SyncEvent::Update => "Update",
            SyncEvent::Delete => "Delete",
            SyncEvent::Manual => "Manual",
            SyncEvent::Bulk => "Bulk",
        })
    }
}

/// State carried through one sync attempt.
///
/// Hooks use [`SyncContext::insert`] and [`SyncContext::get`] to hand data
/// from `before_sync` to `after_sync`. Notes end up in the sync log details.
#[derive(Debug, Clone)]
pub struct SyncContext {
    /// Configuration name.
    pub configuration: String,
    /// Sync direction.
    pub direction: Direction,
    /// Triggering event.
    pub event: SyncEvent,
    /// Whether the fast path is used.
    pub fast_mode: bool,
    /// Background job, if any.
    pub job_id: Option<String>,
    data: Map<String, Json>,
    notes: Map<String, Json>,
}

impl SyncContext {
    /// Creates an empty context.
    pub fn new(configuration: impl Into<String>, direction: Direction, event: SyncEvent) -> Self {
        Self {
            configuration: configuration.into(),
            direction,
            event,
            fast_mode: false,
            job_id: None,
            data: Map::new(),
            notes: Map::new(),
        }
    }

    /// Sets fast mode.
    #[must_use]
    pub fn fast(mut self, fast_mode: bool) -> Self {
        self.fast_mode = fast_mode;
        self
    }

    /// Tags the attempt with a job id.
    #[must_use]
    pub fn in_job(mut self, job_id: Option<String>) -> Self {
        self.job_id = job_id;
        self
    }

    /// Stores hook handoff data.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Serialize) {
        let key = key.into();
        match serde_json::to_value(value) {
            Ok(json) => {
                self.data.insert(key, json);
            }
            Err(err) => warn!(key = %key, error = %err, "context value is not serializable"),
        }
    }

    /// Reads hook handoff data.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Removes hook handoff data.
    pub fn remove(&mut self, key: &str) -> Option<Json> {
        self.data.remove(key)
    }

    /// Records a detail for the sync log.
    pub fn note(&mut self, key: impl Into<String>, value: impl Into<Json>) {
        self.notes.insert(key.into(), value.into());
    }

    /// Appends to a list-valued detail.
    pub fn note_list(&mut self, key: &str, value: impl Into<Json>) {
        let entry = self
            .notes
            .entry(key.to_string())
            .or_insert_with(|| Json::Array(Vec::new()));
        if let Json::Array(items) = entry {
            items.push(value.into());
        }
    }

    /// Returns the recorded details.
    pub fn notes(&self) -> &Map<String, Json> {
        &self.notes
    }

    /// Takes the recorded details.
    pub fn take_notes(&mut self) -> Map<String, Json> {
        std::mem::take(&mut self.notes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handoff_round_trip() {
        let mut ctx = SyncContext::new("c", Direction::Forward, SyncEvent::Manual);
        ctx.insert("previous_email", "old@example.com");
        assert_eq!(ctx.get::<String>("previous_email").as_deref(), Some("old@example.com"));
        assert_eq!(ctx.get::<u32>("previous_email"), None);
        assert!(ctx.remove("previous_email").is_some());
        assert_eq!(ctx.get::<String>("previous_email"), None);
    }

    #[test]
    fn notes_accumulate() {
        let mut ctx = SyncContext::new("c", Direction::Forward, SyncEvent::Insert);
        ctx.note_list("hook_errors", "before_sync: boom");
        ctx.note_list("hook_errors", "after_sync: bang");
        ctx.note("ambiguous_match", serde_json::json!(["A", "B"]));
        assert_eq!(ctx.notes()["hook_errors"].as_array().unwrap().len(), 2);
        assert_eq!(ctx.take_notes().len(), 2);
        assert!(ctx.notes().is_empty());
    }

    #[test]
    fn operator_events() {
        assert!(SyncEvent::Bulk.is_operator_initiated());
        assert!(!SyncEvent::Update.is_operator_initiated());
    }
}
