//! Field-path resolution.
//!
//! A field path addresses either a parent field (`status`) or a field of a
//! child table row:
//!
//! - `items.amount` - first row of `items`
//! - `items[2].amount` - third row of `items` (0-based)
//!
//! Resolution is pure apart from [`FieldPath::set`], which pads the child
//! table with empty rows when the index lies past its end.

use crate::error::{SyncError, SyncResult};
use livesync_store::{ChildRow, Record, Value};
use std::fmt;
use std::str::FromStr;

/// A parsed field path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    /// Child table, `None` for a parent field.
    pub table: Option<String>,
    /// Field name.
    pub field: String,
    /// Explicit row index.
    pub index: Option<usize>,
}

impl FieldPath {
    /// Parses a path.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Path`] for empty segments, more than one `.`, or
    /// a malformed `[index]`.
    pub fn parse(path: &str) -> SyncResult<Self> {
        let path = path.trim();
        let parts: Vec<&str> = path.split('.').collect();
        match parts.as_slice() {
            [field] => {
                check_name(path, field)?;
                Ok(Self {
                    table: None,
                    field: (*field).to_string(),
                    index: None,
                })
            }
            [table, field] => {
                check_name(path, field)?;
                let (table, index) = parse_table(path, table)?;
                Ok(Self {
                    table: Some(table),
                    field: (*field).to_string(),
                    index,
                })
            }
            _ => Err(SyncError::path(path, "expected at most one '.'")),
        }
    }

    /// Returns true if the path addresses a child table row.
    pub fn is_hierarchical(&self) -> bool {
        self.table.is_some()
    }

    /// The addressed row, defaulting to the first.
    pub fn row(&self) -> usize {
        self.index.unwrap_or(0)
    }

    /// Reads the addressed value, `Null` when the table or row is missing.
    pub fn get(&self, record: &Record) -> Value {
        match &self.table {
            None => record.get(&self.field),
            Some(table) => record
                .table(table)
                .get(self.row())
                .map(|row| row.get(&self.field))
                .unwrap_or_default(),
        }
    }

    /// Writes the addressed value.
    ///
    /// For child paths the table is padded with new rows up to the index
    /// (never truncated). Returns false if a parent write was ignored by the
    /// record (store-maintained fields).
    pub fn set(&self, record: &mut Record, value: Value) -> bool {
        match &self.table {
            None => record.set(&self.field, value),
            Some(table) => {
                let row = self.row();
                let rows = record.table_mut(table);
                while rows.len() <= row {
                    let idx = rows.len();
                    rows.push(ChildRow {
                        idx,
                        ..ChildRow::default()
                    });
                }
                rows[row].set(self.field.clone(), value);
                true
            }
        }
    }
}

fn check_name(path: &str, name: &str) -> SyncResult<()> {
    if name.is_empty() {
        return Err(SyncError::path(path, "empty field name"));
    }
    if name.contains(['[', ']']) {
        return Err(SyncError::path(path, "index is only allowed on the table"));
    }
    Ok(())
}

fn parse_table(path: &str, segment: &str) -> SyncResult<(String, Option<usize>)> {
    let Some(open) = segment.find('[') else {
        check_name(path, segment)?;
        return Ok((segment.to_string(), None));
    };
    let table = &segment[..open];
    let rest = &segment[open + 1..];
    let digits = rest
        .strip_suffix(']')
        .ok_or_else(|| SyncError::path(path, "unterminated index"))?;
    check_name(path, table)?;
    let index = digits
        .trim()
        .parse::<usize>()
        .map_err(|_| SyncError::path(path, format!("invalid index {digits:?}")))?;
    Ok((table.to_string(), Some(index)))
}

impl FromStr for FieldPath {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.table, self.index) {
            (None, _) => f.write_str(&self.field),
            (Some(table), None) => write!(f, "{table}.{}", self.field),
            (Some(table), Some(index)) => write!(f, "{table}[{index}].{}", self.field),
        }
    }
}

/// Reads `path` from `record`.
pub fn get(record: &Record, path: &str) -> SyncResult<Value> {
    Ok(FieldPath::parse(path)?.get(record))
}

/// Writes `value` at `path` on `record`.
pub fn set(record: &mut Record, path: &str, value: Value) -> SyncResult<()> {
    FieldPath::parse(path)?.set(record, value);
    Ok(())
}
