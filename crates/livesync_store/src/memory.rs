//! In-memory record store.

use crate::error::{StoreError, StoreResult};
use crate::event::{EventKind, RecordEventListener};
use crate::filter::{Order, Query};
use crate::record::{is_standard_field, ChildRow, DocStatus, Record};
use crate::schema::Schema;
use crate::store::{DirectStore, RecordStore, RowUpdate};
use crate::value::Value;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// A business rule run on every validated write.
pub type Validator = Arc<dyn Fn(&Record) -> Result<(), String> + Send + Sync>;

#[derive(Debug, Clone)]
struct Stored {
    seq: u64,
    record: Record,
}

#[derive(Debug, Default)]
struct Tables {
    schemas: HashMap<String, Schema>,
    records: HashMap<String, BTreeMap<String, Stored>>,
    next_seq: u64,
}

impl Tables {
    fn schema(&self, collection: &str) -> StoreResult<&Schema> {
        self.schemas
            .get(collection)
            .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))
    }

    fn table_mut(&mut self, collection: &str) -> StoreResult<&mut BTreeMap<String, Stored>> {
        self.schema(collection)?;
        Ok(self.records.entry(collection.to_string()).or_default())
    }

    fn stored_mut(&mut self, collection: &str, name: &str) -> StoreResult<&mut Record> {
        self.table_mut(collection)?
            .get_mut(name)
            .map(|s| &mut s.record)
            .ok_or_else(|| StoreError::not_found(collection, name))
    }

    fn bump(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

/// A thread-safe, in-memory record store.
///
/// Implements both the validated [`RecordStore`] API (schemas, required
/// fields, registered validators, system-field stamping, lifecycle events)
/// and the low-level [`DirectStore`] API.
///
/// # Example
///
/// ```rust
/// use livesync_store::{FieldKind, MemoryStore, Record, RecordStore, Schema};
///
/// let store = MemoryStore::new();
/// store.register_schema(Schema::new("User").field("email", FieldKind::Data));
///
/// let mut user = Record::new("User").with_field("email", "a@example.com");
/// store.create(&mut user).unwrap();
/// assert!(user.name.is_some());
/// assert_eq!(store.count("User"), 1);
/// ```
pub struct MemoryStore {
    tables: RwLock<Tables>,
    validators: RwLock<HashMap<String, Vec<Validator>>>,
    listeners: RwLock<Vec<Arc<dyn RecordEventListener>>>,
    actor: String,
    commits: AtomicU64,
}

impl MemoryStore {
    /// Creates an empty store acting as `Administrator`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_actor("Administrator")
    }

    /// Creates an empty store stamping writes with `actor`.
    #[must_use]
    pub fn with_actor(actor: impl Into<String>) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            validators: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            actor: actor.into(),
            commits: AtomicU64::new(0),
        }
    }

    /// Registers (or replaces) a collection schema.
    pub fn register_schema(&self, schema: Schema) {
        self.tables
            .write()
            .schemas
            .insert(schema.collection.clone(), schema);
    }

    /// Adds a business rule run on validated writes to `collection`.
    pub fn add_validator<F>(&self, collection: impl Into<String>, rule: F)
    where
        F: Fn(&Record) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validators
            .write()
            .entry(collection.into())
            .or_default()
            .push(Arc::new(rule));
    }

    /// Subscribes a lifecycle listener.
    pub fn subscribe(&self, listener: Arc<dyn RecordEventListener>) {
        self.listeners.write().push(listener);
    }

    /// Returns the number of records in a collection.
    pub fn count(&self, collection: &str) -> usize {
        self.tables
            .read()
            .records
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    /// Returns all records of a collection in insertion order.
    pub fn records(&self, collection: &str) -> Vec<Record> {
        let tables = self.tables.read();
        let mut stored: Vec<Stored> = tables
            .records
            .get(collection)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default();
        stored.sort_by_key(|s| s.seq);
        stored.into_iter().map(|s| s.record).collect()
    }

    /// Returns the number of commits issued.
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Submits a saved record, raising [`EventKind::Submitted`].
    pub fn submit(&self, record: &mut Record) -> StoreResult<()> {
        self.transition(record, DocStatus::Draft, DocStatus::Submitted)?;
        self.emit(record, EventKind::Submitted);
        Ok(())
    }

    /// Cancels a submitted record, raising [`EventKind::BeforeCancel`] first.
    pub fn cancel(&self, record: &mut Record) -> StoreResult<()> {
        if record.meta.docstatus != DocStatus::Submitted {
            return Err(StoreError::InvalidOperation(format!(
                "{} {} is not submitted",
                record.collection,
                record.name_or_empty()
            )));
        }
        self.emit(record, EventKind::BeforeCancel);
        self.transition(record, DocStatus::Submitted, DocStatus::Cancelled)
    }

    fn transition(&self, record: &mut Record, from: DocStatus, to: DocStatus) -> StoreResult<()> {
        let name = record
            .name
            .clone()
            .ok_or_else(|| StoreError::InvalidOperation("record has no identity".into()))?;
        let mut tables = self.tables.write();
        let stored = tables.stored_mut(&record.collection, &name)?;
        if stored.meta.docstatus != from {
            return Err(StoreError::InvalidOperation(format!(
                "{} {name} cannot move from {:?} to {to:?}",
                record.collection, stored.meta.docstatus
            )));
        }
        stored.meta.docstatus = to;
        stored.meta.stamp_modified(Utc::now(), &self.actor);
        record.meta = stored.meta.clone();
        Ok(())
    }

    fn validate(&self, schema: &Schema, record: &Record) -> StoreResult<()> {
        for field in schema.required_fields() {
            if record.get(&field.name).is_blank() {
                return Err(StoreError::validation(
                    &record.collection,
                    format!("{} is mandatory", field.name),
                ));
            }
        }
        let rules = self
            .validators
            .read()
            .get(&record.collection)
            .cloned()
            .unwrap_or_default();
        for rule in rules {
            rule(record).map_err(|message| StoreError::validation(&record.collection, message))?;
        }
        Ok(())
    }

    fn emit(&self, record: &Record, kind: EventKind) {
        let listeners = self.listeners.read().clone();
        debug!(
            collection = %record.collection,
            record = %record.name_or_empty(),
            event = %kind,
            listeners = listeners.len(),
            "dispatching record event"
        );
        for listener in listeners {
            listener.on_record_event(record, kind);
        }
    }

    fn new_name() -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }

    fn name_rows(record: &mut Record) {
        for rows in record.children.values_mut() {
            for (idx, row) in rows.iter_mut().enumerate() {
                row.idx = idx;
                if row.name.is_none() {
                    row.name = Some(Self::new_name());
                }
            }
        }
    }

    fn persisted(record: &Record) -> Record {
        let mut copy = record.clone();
        copy.clear_syncing();
        copy
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.tables.read();
        f.debug_struct("MemoryStore")
            .field("collections", &tables.schemas.len())
            .field("listeners", &self.listeners.read().len())
            .field("actor", &self.actor)
            .finish()
    }
}

impl RecordStore for MemoryStore {
    fn get(&self, collection: &str, name: &str) -> StoreResult<Record> {
        let tables = self.tables.read();
        tables.schema(collection)?;
        tables
            .records
            .get(collection)
            .and_then(|t| t.get(name))
            .map(|s| s.record.clone())
            .ok_or_else(|| StoreError::not_found(collection, name))
    }

    fn find(&self, collection: &str, query: &Query) -> StoreResult<Vec<String>> {
        let tables = self.tables.read();
        tables.schema(collection)?;
        let mut hits: Vec<&Stored> = tables
            .records
            .get(collection)
            .map(|t| t.values().filter(|s| query.filter.matches(&s.record)).collect())
            .unwrap_or_default();
        match query.order {
            Order::Unordered => hits.sort_by_key(|s| s.seq),
            Order::ModifiedAsc => hits.sort_by_key(|s| (s.record.meta.modified_at, s.seq)),
            Order::ModifiedDesc => {
                hits.sort_by_key(|s| (s.record.meta.modified_at, s.seq));
                hits.reverse();
            }
        }
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(hits
            .into_iter()
            .take(limit)
            .filter_map(|s| s.record.name.clone())
            .collect())
    }

    fn create(&self, record: &mut Record) -> StoreResult<()> {
        let schema = self.schema(&record.collection)?;
        self.validate(&schema, record)?;
        {
            let mut tables = self.tables.write();
            let name = record.name.clone().unwrap_or_else(Self::new_name);
            if tables
                .records
                .get(&record.collection)
                .is_some_and(|t| t.contains_key(&name))
            {
                return Err(StoreError::Duplicate {
                    collection: record.collection.clone(),
                    name,
                });
            }
            record.name = Some(name.clone());
            record.meta.stamp_new(Utc::now(), &self.actor);
            record.meta.docstatus = DocStatus::Draft;
            Self::name_rows(record);
            let seq = tables.bump();
            tables.table_mut(&record.collection)?.insert(
                name,
                Stored {
                    seq,
                    record: Self::persisted(record),
                },
            );
        }
        self.emit(record, EventKind::Inserted);
        Ok(())
    }

    fn update(&self, record: &mut Record) -> StoreResult<()> {
        let name = record
            .name
            .clone()
            .ok_or_else(|| StoreError::InvalidOperation("cannot update an unnamed record".into()))?;
        let schema = self.schema(&record.collection)?;
        self.validate(&schema, record)?;
        {
            let mut tables = self.tables.write();
            let stored = tables.stored_mut(&record.collection, &name)?;
            record.meta.created_at = stored.meta.created_at;
            record.meta.owner = stored.meta.owner.clone();
            record.meta.docstatus = stored.meta.docstatus;
            record.meta.stamp_modified(Utc::now(), &self.actor);
            Self::name_rows(record);
            *stored = Self::persisted(record);
        }
        self.emit(record, EventKind::Updated);
        Ok(())
    }

    fn delete(&self, collection: &str, name: &str) -> StoreResult<()> {
        let removed = {
            let mut tables = self.tables.write();
            tables
                .table_mut(collection)?
                .remove(name)
                .ok_or_else(|| StoreError::not_found(collection, name))?
        };
        self.emit(&removed.record, EventKind::Deleted);
        Ok(())
    }

    fn schema(&self, collection: &str) -> StoreResult<Schema> {
        self.tables.read().schema(collection).cloned()
    }

    fn commit(&self) -> StoreResult<()> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl DirectStore for MemoryStore {
    fn raw_insert(&self, record: &Record) -> StoreResult<()> {
        let missing = |field: &'static str| StoreError::MissingSystemField {
            collection: record.collection.clone(),
            field,
        };
        let name = record.name.clone().ok_or_else(|| missing("name"))?;
        if record.meta.created_at.is_none() {
            return Err(missing("creation"));
        }
        if record.meta.modified_at.is_none() {
            return Err(missing("modified"));
        }
        if record.meta.owner.is_none() {
            return Err(missing("owner"));
        }
        let has_unnamed_row = record
            .children
            .values()
            .flatten()
            .any(|row| row.name.is_none());
        if has_unnamed_row {
            return Err(missing("name"));
        }

        let mut tables = self.tables.write();
        let seq = tables.bump();
        let table = tables.table_mut(&record.collection)?;
        if table.contains_key(&name) {
            return Err(StoreError::Duplicate {
                collection: record.collection.clone(),
                name,
            });
        }
        table.insert(
            name,
            Stored {
                seq,
                record: Self::persisted(record),
            },
        );
        Ok(())
    }

    fn raw_set_values(
        &self,
        collection: &str,
        name: &str,
        values: &BTreeMap<String, Value>,
    ) -> StoreResult<()> {
        let mut tables = self.tables.write();
        let stored = tables.stored_mut(collection, name)?;
        for (field, value) in values {
            if !is_standard_field(field) {
                stored.fields.insert(field.clone(), value.clone());
            }
        }
        Ok(())
    }

    fn raw_touch(
        &self,
        collection: &str,
        name: &str,
        at: DateTime<Utc>,
        actor: &str,
    ) -> StoreResult<()> {
        let mut tables = self.tables.write();
        tables
            .stored_mut(collection, name)?
            .meta
            .stamp_modified(at, actor);
        Ok(())
    }

    fn raw_delete_rows(
        &self,
        collection: &str,
        name: &str,
        table: &str,
        rows: &[String],
    ) -> StoreResult<usize> {
        let mut tables = self.tables.write();
        let stored = tables.stored_mut(collection, name)?;
        let existing = stored.table_mut(table);
        let before = existing.len();
        existing.retain(|row| !row.name.as_ref().is_some_and(|n| rows.contains(n)));
        Ok(before - existing.len())
    }

    fn raw_update_rows(
        &self,
        collection: &str,
        name: &str,
        table: &str,
        updates: &[RowUpdate],
    ) -> StoreResult<()> {
        let mut tables = self.tables.write();
        let stored = tables.stored_mut(collection, name)?;
        let rows = stored.table_mut(table);
        for update in updates {
            let row = rows
                .iter_mut()
                .find(|row| row.name.as_deref() == Some(update.name.as_str()))
                .ok_or_else(|| StoreError::not_found(table, &update.name))?;
            row.idx = update.idx;
            for (field, value) in &update.fields {
                row.fields.insert(field.clone(), value.clone());
            }
        }
        rows.sort_by_key(|row| row.idx);
        Ok(())
    }

    fn raw_insert_rows(
        &self,
        collection: &str,
        name: &str,
        table: &str,
        rows: &[ChildRow],
    ) -> StoreResult<()> {
        if rows.iter().any(|row| row.name.is_none()) {
            return Err(StoreError::MissingSystemField {
                collection: collection.to_string(),
                field: "name",
            });
        }
        let mut tables = self.tables.write();
        let stored = tables.stored_mut(collection, name)?;
        let existing = stored.table_mut(table);
        existing.extend(rows.iter().cloned());
        existing.sort_by_key(|row| row.idx);
        Ok(())
    }
}
