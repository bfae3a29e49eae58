//! Record store traits.

use crate::error::StoreResult;
use crate::filter::{Filter, Query};
use crate::record::{ChildRow, Record};
use crate::schema::Schema;
use crate::value::Value;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Validated record store API.
///
/// Writes through this trait run the collection's business rules, stamp
/// system fields and raise lifecycle events.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` so a store can be shared between
/// the event hook and background jobs.
pub trait RecordStore: Send + Sync {
    /// Reads a record by identity.
    fn get(&self, collection: &str, name: &str) -> StoreResult<Record>;

    /// Returns the identities of records matching `query`.
    fn find(&self, collection: &str, query: &Query) -> StoreResult<Vec<String>>;

    /// Returns true if any record matches `filter`.
    fn exists(&self, collection: &str, filter: &Filter) -> StoreResult<bool> {
        let query = Query::new(filter.clone()).limit(1);
        Ok(!self.find(collection, &query)?.is_empty())
    }

    /// Inserts a new record, assigning its identity if unset.
    ///
    /// On success the caller's instance reflects the persisted state.
    fn create(&self, record: &mut Record) -> StoreResult<()>;

    /// Saves an existing record.
    fn update(&self, record: &mut Record) -> StoreResult<()>;

    /// Deletes a record.
    fn delete(&self, collection: &str, name: &str) -> StoreResult<()>;

    /// Returns the schema of a collection.
    fn schema(&self, collection: &str) -> StoreResult<Schema>;

    /// Commits pending writes.
    fn commit(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// A positional update of an existing child row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowUpdate {
    /// Identity of the row.
    pub name: String,
    /// New position.
    pub idx: usize,
    /// Changed fields only.
    pub fields: BTreeMap<String, Value>,
}

/// Low-level store API that bypasses validation and lifecycle events.
///
/// Callers are responsible for system fields: [`DirectStore::raw_insert`]
/// rejects records without an identity or creation stamps, and
/// [`DirectStore::raw_insert_rows`] rejects rows without an identity.
pub trait DirectStore: RecordStore {
    /// Inserts a fully populated record.
    fn raw_insert(&self, record: &Record) -> StoreResult<()>;

    /// Overwrites parent field values.
    fn raw_set_values(
        &self,
        collection: &str,
        name: &str,
        values: &BTreeMap<String, Value>,
    ) -> StoreResult<()>;

    /// Sets the modification stamp.
    fn raw_touch(
        &self,
        collection: &str,
        name: &str,
        at: DateTime<Utc>,
        actor: &str,
    ) -> StoreResult<()>;

    /// Deletes child rows by identity, returning how many were removed.
    fn raw_delete_rows(
        &self,
        collection: &str,
        name: &str,
        table: &str,
        rows: &[String],
    ) -> StoreResult<usize>;

    /// Applies positional updates to existing child rows.
    fn raw_update_rows(
        &self,
        collection: &str,
        name: &str,
        table: &str,
        updates: &[RowUpdate],
    ) -> StoreResult<()>;

    /// Appends fully populated child rows.
    fn raw_insert_rows(
        &self,
        collection: &str,
        name: &str,
        table: &str,
        rows: &[ChildRow],
    ) -> StoreResult<()>;
}
