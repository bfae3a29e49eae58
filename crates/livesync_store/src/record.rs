//! Records, child rows and system fields.

use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field names maintained by the store rather than by callers.
pub const STANDARD_FIELDS: &[&str] = &[
    "name",
    "owner",
    "creation",
    "modified",
    "modified_by",
    "docstatus",
];

/// Returns true if `field` is a store-maintained field.
pub fn is_standard_field(field: &str) -> bool {
    STANDARD_FIELDS.contains(&field)
}

/// Document status of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DocStatus {
    /// Editable draft.
    #[default]
    Draft,
    /// Submitted (locked).
    Submitted,
    /// Cancelled after submission.
    Cancelled,
}

impl DocStatus {
    /// Numeric code as exposed through the `docstatus` field.
    pub fn code(self) -> i64 {
        match self {
            DocStatus::Draft => 0,
            DocStatus::Submitted => 1,
            DocStatus::Cancelled => 2,
        }
    }
}

/// System fields stamped on every persisted record.
///
/// The validated write path fills these automatically. Low-level writes
/// must populate them explicitly.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RecordMeta {
    /// Creation time.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Last modification time.
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
    /// User that created the record.
    #[serde(default)]
    pub owner: Option<String>,
    /// User that last modified the record.
    #[serde(default)]
    pub modified_by: Option<String>,
    /// Document status.
    #[serde(default)]
    pub docstatus: DocStatus,
}

impl RecordMeta {
    /// Stamps creation and modification with the same instant.
    pub fn stamp_new(&mut self, at: DateTime<Utc>, actor: &str) {
        self.created_at = Some(at);
        self.owner = Some(actor.to_string());
        self.stamp_modified(at, actor);
    }

    /// Stamps a modification.
    pub fn stamp_modified(&mut self, at: DateTime<Utc>, actor: &str) {
        self.modified_at = Some(at);
        self.modified_by = Some(actor.to_string());
    }
}

/// A row of a child (one-to-many) collection attached to a record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChildRow {
    /// Row identity, assigned by the store on insert.
    #[serde(default)]
    pub name: Option<String>,
    /// Position of the row within its table (0-based).
    #[serde(default)]
    pub idx: usize,
    /// Row field values.
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

impl ChildRow {
    /// Creates an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Returns a field value, `Null` when absent.
    pub fn get(&self, field: &str) -> Value {
        self.fields.get(field).cloned().unwrap_or_default()
    }

    /// Sets a field value.
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }
}

/// A record: identity, parent fields, child tables and system fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Collection (record type) this record belongs to.
    pub collection: String,
    /// Identity within the collection. `None` until assigned.
    #[serde(default)]
    pub name: Option<String>,
    /// Parent field values.
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    /// Child tables keyed by table field name.
    #[serde(default)]
    pub children: BTreeMap<String, Vec<ChildRow>>,
    /// System fields.
    #[serde(default)]
    pub meta: RecordMeta,
    /// Transient in-progress marker, never persisted.
    #[serde(skip)]
    syncing: bool,
}

impl Record {
    /// Creates an empty, unnamed record.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            name: None,
            fields: BTreeMap::new(),
            children: BTreeMap::new(),
            meta: RecordMeta::default(),
            syncing: false,
        }
    }

    /// Builder-style identity setter.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Builder-style child row append.
    #[must_use]
    pub fn with_row(mut self, table: impl Into<String>, row: ChildRow) -> Self {
        let rows = self.children.entry(table.into()).or_default();
        let mut row = row;
        row.idx = rows.len();
        rows.push(row);
        self
    }

    /// Returns the identity or an empty string.
    pub fn name_or_empty(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    /// Returns true if the record has not been assigned an identity.
    pub fn is_new(&self) -> bool {
        self.name.is_none()
    }

    /// Reads a parent field, including the standard fields.
    ///
    /// Absent fields read as `Null`.
    pub fn get(&self, field: &str) -> Value {
        match field {
            "name" => match self.fields.get("name") {
                Some(v) => v.clone(),
                None => self.name.clone().into(),
            },
            "owner" => self.meta.owner.clone().into(),
            "modified_by" => self.meta.modified_by.clone().into(),
            "creation" => self.meta.created_at.into(),
            "modified" => self.meta.modified_at.into(),
            "docstatus" => Value::Integer(self.meta.docstatus.code()),
            _ => self.fields.get(field).cloned().unwrap_or_default(),
        }
    }

    /// Writes a parent field.
    ///
    /// Writing `name` assigns the identity of an unnamed record and is
    /// ignored once the identity exists; the other standard fields are
    /// store-maintained and ignored. Returns true if the write took effect.
    pub fn set(&mut self, field: &str, value: Value) -> bool {
        match field {
            "name" => match (&self.name, value) {
                (None, Value::Text(text)) if !text.is_empty() => {
                    self.name = Some(text);
                    true
                }
                _ => false,
            },
            f if is_standard_field(f) => false,
            _ => {
                self.fields.insert(field.to_string(), value);
                true
            }
        }
    }

    /// Returns the rows of a child table (empty when absent).
    pub fn table(&self, table: &str) -> &[ChildRow] {
        self.children.get(table).map_or(&[], Vec::as_slice)
    }

    /// Returns the rows of a child table for mutation, creating it if absent.
    pub fn table_mut(&mut self, table: &str) -> &mut Vec<ChildRow> {
        self.children.entry(table.to_string()).or_default()
    }

    /// Appends a fresh row to a child table and returns it.
    pub fn append_row(&mut self, table: &str) -> &mut ChildRow {
        let rows = self.table_mut(table);
        let idx = rows.len();
        rows.push(ChildRow {
            idx,
            ..ChildRow::default()
        });
        &mut rows[idx]
    }

    /// Renumbers the rows of a table to match their positions.
    pub fn reindex(&mut self, table: &str) {
        if let Some(rows) = self.children.get_mut(table) {
            for (idx, row) in rows.iter_mut().enumerate() {
                row.idx = idx;
            }
        }
    }

    /// Marks the record as currently being synced.
    pub fn mark_syncing(&mut self) {
        self.syncing = true;
    }

    /// Clears the in-progress marker.
    pub fn clear_syncing(&mut self) {
        self.syncing = false;
    }

    /// Returns true while a sync involving this instance is in progress.
    pub fn is_syncing(&self) -> bool {
        self.syncing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_fields_read_through_meta() {
        let mut record = Record::new("Employee").with_name("EMP-1");
        record.meta.owner = Some("admin".into());

        assert_eq!(record.get("name"), Value::from("EMP-1"));
        assert_eq!(record.get("owner"), Value::from("admin"));
        assert_eq!(record.get("docstatus"), Value::Integer(0));
        assert_eq!(record.get("missing"), Value::Null);
    }

    #[test]
    fn name_is_assigned_once() {
        let mut record = Record::new("User");
        assert!(record.set("name", Value::from("U-1")));
        assert!(!record.set("name", Value::from("U-2")));
        assert_eq!(record.name.as_deref(), Some("U-1"));
        assert!(!record.set("owner", Value::from("x")));
    }

    #[test]
    fn child_rows_are_indexed() {
        let mut record = Record::new("Employee")
            .with_row("details", ChildRow::new().with("f1", "a"))
            .with_row("details", ChildRow::new().with("f1", "b"));

        assert_eq!(record.table("details").len(), 2);
        assert_eq!(record.table("details")[1].idx, 1);
        assert!(record.table("other").is_empty());

        record.table_mut("details").remove(0);
        record.reindex("details");
        assert_eq!(record.table("details")[0].idx, 0);
        assert_eq!(record.table("details")[0].get("f1"), Value::from("b"));
    }

    #[test]
    fn syncing_marker_is_not_serialized() {
        let mut record = Record::new("User").with_name("U-1");
        record.mark_syncing();
        let json = serde_json::to_string(&record).unwrap();
        let back: Record = serde_json::from_str(&json).unwrap();
        assert!(record.is_syncing());
        assert!(!back.is_syncing());
    }
}
