//! Sync log: the durable audit trail of sync attempts.

use crate::config::{Direction, LogLevel, SyncConfiguration};
use crate::error::{ErrorType, SyncError, SyncResult};
use chrono::{DateTime, NaiveDate, Utc};
use livesync_store::{
    FieldCondition, FieldKind, Filter, Query, Record, RecordStore, Schema, Value,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use std::fmt;
use std::sync::Arc;

/// Collection used by [`RecordLogStore`].
pub const SYNC_LOG_COLLECTION: &str = "Sync Log";

/// Outcome status of a sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncStatus {
    /// Target written.
    Success,
    /// Nothing done.
    Skipped,
    /// Attempt failed.
    Error,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncStatus::Success => "Success",
            SyncStatus::Skipped => "Skipped",
            SyncStatus::Error => "Error",
        })
    }
}

/// One sync log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLog {
    /// Entry id.
    pub id: String,
    /// Configuration that produced the entry.
    pub sync_configuration: String,
    /// When the attempt finished.
    pub timestamp: DateTime<Utc>,
    /// Source collection.
    pub source_collection: String,
    /// Source record.
    pub source_name: String,
    /// Target collection.
    pub target_collection: String,
    /// Target record, if one was resolved.
    #[serde(default)]
    pub target_name: Option<String>,
    /// Outcome.
    pub status: SyncStatus,
    /// Direction.
    pub direction: Direction,
    /// Action taken, or the triggering event when nothing was done.
    pub event: String,
    /// Acting user.
    pub actor: String,
    /// Error classification.
    #[serde(default)]
    pub error_type: Option<ErrorType>,
    /// Error message or skip reason.
    #[serde(default)]
    pub error_message: Option<String>,
    /// Extra detail.
    #[serde(default)]
    pub details: Option<Map<String, Json>>,
    /// Background job that produced the entry.
    #[serde(default)]
    pub job_id: Option<String>,
}

/// Returns true if `config` wants an entry with `status` logged.
///
/// Errors are always logged, skips from `Warning` up, successes from `Info`
/// up; nothing is logged when logging is disabled.
pub fn should_log(config: &SyncConfiguration, status: SyncStatus) -> bool {
    if !config.enable_logging {
        return false;
    }
    match status {
        SyncStatus::Error => true,
        SyncStatus::Skipped => config.log_level >= LogLevel::Warning,
        SyncStatus::Success => config.log_level >= LogLevel::Info,
    }
}

/// Selects log entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogQuery {
    /// Configuration name.
    pub configuration: Option<String>,
    /// Source collection.
    pub source_collection: Option<String>,
    /// Job id.
    pub job_id: Option<String>,
    /// Calendar day (UTC) of the timestamp.
    pub day: Option<NaiveDate>,
    /// Status.
    pub status: Option<SyncStatus>,
}

impl LogQuery {
    /// Entries of one configuration.
    pub fn for_configuration(configuration: impl Into<String>) -> Self {
        Self {
            configuration: Some(configuration.into()),
            ..Self::default()
        }
    }

    /// Entries of one job.
    pub fn for_job(job_id: impl Into<String>) -> Self {
        Self {
            job_id: Some(job_id.into()),
            ..Self::default()
        }
    }

    /// Returns true if `entry` is selected.
    pub fn matches(&self, entry: &SyncLog) -> bool {
        self.configuration
            .as_ref()
            .map_or(true, |c| *c == entry.sync_configuration)
            && self
                .source_collection
                .as_ref()
                .map_or(true, |c| *c == entry.source_collection)
            && self
                .job_id
                .as_ref()
                .map_or(true, |j| entry.job_id.as_ref() == Some(j))
            && self
                .day
                .map_or(true, |d| entry.timestamp.date_naive() == d)
            && self.status.map_or(true, |s| entry.status == s)
    }
}

/// Append-only sink for sync log entries.
pub trait SyncLogStore: Send + Sync {
    /// Appends an entry.
    fn append(&self, entry: SyncLog) -> SyncResult<()>;

    /// Returns selected entries in append order.
    fn query(&self, query: &LogQuery) -> SyncResult<Vec<SyncLog>>;
}

/// In-memory sync log.
#[derive(Debug, Default)]
pub struct MemoryLogStore {
    entries: RwLock<Vec<SyncLog>>,
}

impl MemoryLogStore {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns every entry.
    pub fn entries(&self) -> Vec<SyncLog> {
        self.entries.read().clone()
    }
}

impl SyncLogStore for MemoryLogStore {
    fn append(&self, entry: SyncLog) -> SyncResult<()> {
        self.entries.write().push(entry);
        Ok(())
    }

    fn query(&self, query: &LogQuery) -> SyncResult<Vec<SyncLog>> {
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect())
    }
}

/// Sync log persisted as records of the [`SYNC_LOG_COLLECTION`] collection.
///
/// The collection schema must be registered with the store; see
/// [`RecordLogStore::schema`].
pub struct RecordLogStore<S: RecordStore> {
    store: Arc<S>,
}

const DETAILS_FIELD: &str = "details";

impl<S: RecordStore> RecordLogStore<S> {
    /// Creates a log writing into `store`.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Schema of the sync log collection.
    pub fn schema() -> Schema {
        Schema::new(SYNC_LOG_COLLECTION)
            .required_field("sync_configuration", FieldKind::Data)
            .field("timestamp", FieldKind::Datetime)
            .field("source_collection", FieldKind::Data)
            .field("source_name", FieldKind::Data)
            .field("target_collection", FieldKind::Data)
            .field("target_name", FieldKind::Data)
            .field("status", FieldKind::Select)
            .field("direction", FieldKind::Select)
            .field("event", FieldKind::Data)
            .field("actor", FieldKind::Data)
            .field("error_type", FieldKind::Select)
            .field("error_message", FieldKind::Data)
            .field(DETAILS_FIELD, FieldKind::Data)
            .field("job_id", FieldKind::Data)
    }

    fn to_record(entry: &SyncLog) -> SyncResult<Record> {
        let mut record = Record::new(SYNC_LOG_COLLECTION).with_name(entry.id.clone());
        let Json::Object(fields) = to_json(entry)? else {
            return Ok(record);
        };
        for (key, value) in fields {
            let value = match (key.as_str(), value) {
                ("id", _) => continue,
                (DETAILS_FIELD, Json::Null) => Value::Null,
                (DETAILS_FIELD, details) => Value::Text(details.to_string()),
                (_, other) => from_json(other)?,
            };
            record.set(&key, value);
        }
        Ok(record)
    }

    fn from_record(record: &Record) -> SyncResult<SyncLog> {
        let mut object = Map::new();
        object.insert("id".into(), Json::String(record.name_or_empty().to_string()));
        for (key, value) in &record.fields {
            let json = match (key.as_str(), value) {
                (DETAILS_FIELD, Value::Text(text)) => {
                    serde_json::from_str(text).map_err(|e| log_decode_error(record, e))?
                }
                _ => to_json(value)?,
            };
            object.insert(key.clone(), json);
        }
        serde_json::from_value(Json::Object(object)).map_err(|e| log_decode_error(record, e))
    }
}

fn to_json(value: impl Serialize) -> SyncResult<Json> {
    serde_json::to_value(value).map_err(|e| SyncError::Codec(e.to_string()))
}

fn from_json(value: Json) -> SyncResult<Value> {
    serde_json::from_value(value).map_err(|e| SyncError::Codec(e.to_string()))
}

fn log_decode_error(record: &Record, err: serde_json::Error) -> SyncError {
    SyncError::Codec(format!(
        "cannot decode sync log {}: {err}",
        record.name_or_empty()
    ))
}

impl<S: RecordStore> SyncLogStore for RecordLogStore<S> {
    fn append(&self, entry: SyncLog) -> SyncResult<()> {
        let mut record = Self::to_record(&entry)?;
        self.store.create(&mut record)?;
        Ok(())
    }

    fn query(&self, query: &LogQuery) -> SyncResult<Vec<SyncLog>> {
        let mut filter = Filter::everything();
        if let Some(configuration) = &query.configuration {
            filter = filter.and(FieldCondition::eq("sync_configuration", configuration.as_str()));
        }
        if let Some(job_id) = &query.job_id {
            filter = filter.and(FieldCondition::eq("job_id", job_id.as_str()));
        }
        let names = self.store.find(SYNC_LOG_COLLECTION, &Query::new(filter))?;
        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            let record = self.store.get(SYNC_LOG_COLLECTION, &name)?;
            let entry = Self::from_record(&record)?;
            if query.matches(&entry) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}

impl<S: RecordStore> fmt::Debug for RecordLogStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordLogStore")
            .field("collection", &SYNC_LOG_COLLECTION)
            .finish()
    }
}
