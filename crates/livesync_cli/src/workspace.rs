//! Workspace files: schemas, records and sync configurations in one JSON
//! document, loaded into a memory store and an engine.

use livesync_engine::{
    InlineJobQueue, MemoryLogStore, SyncConfiguration, SyncEngine, SyncError, SyncLog,
};
use livesync_store::{MemoryStore, Record, RecordStore, Schema, StoreError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised while loading or writing a workspace.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// The file could not be read or written.
    #[error("{path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not a valid workspace document.
    #[error("{path}: {source}")]
    Json {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// A record could not be stored.
    #[error("record {collection}/{name}: {source}")]
    Record {
        /// Record collection.
        collection: String,
        /// Record name, if any.
        name: String,
        /// Underlying error.
        source: StoreError,
    },

    /// A configuration was rejected.
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Contents of a workspace file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceFile {
    /// Collection schemas, child collections included.
    #[serde(default)]
    pub schemas: Vec<Schema>,
    /// Records, created in order.
    #[serde(default)]
    pub records: Vec<Record>,
    /// Sync configurations.
    #[serde(default)]
    pub configurations: Vec<SyncConfiguration>,
}

impl WorkspaceFile {
    /// Reads a workspace file.
    pub fn read(path: &Path) -> Result<Self, WorkspaceError> {
        let text = fs::read_to_string(path).map_err(|source| WorkspaceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| WorkspaceError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Writes the workspace as pretty-printed JSON.
    pub fn write(&self, path: &Path) -> Result<(), WorkspaceError> {
        let text = serde_json::to_string_pretty(self).map_err(|source| WorkspaceError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, text).map_err(|source| WorkspaceError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// A loaded workspace.
pub struct Workspace {
    /// The record store.
    pub store: Arc<MemoryStore>,
    /// The engine.
    pub engine: SyncEngine<MemoryStore>,
    /// The engine's sync log.
    pub logs: Arc<MemoryLogStore>,
    schemas: Vec<Schema>,
}

impl Workspace {
    /// Loads a workspace.
    ///
    /// With `live` set the engine listens to the store before the records
    /// are created, so loading replays them through the live sync path.
    /// Otherwise records are loaded silently.
    pub fn open(file: WorkspaceFile, live: bool) -> Result<Self, WorkspaceError> {
        let store = Arc::new(MemoryStore::new());
        for schema in &file.schemas {
            store.register_schema(schema.clone());
        }
        let logs = Arc::new(MemoryLogStore::new());
        let engine = SyncEngine::builder(Arc::clone(&store))
            .log_store(logs.clone())
            .job_queue(Arc::new(InlineJobQueue))
            .build();
        for config in file.configurations {
            engine.save_configuration(config)?;
        }
        if live {
            store.subscribe(engine.event_hook());
        }
        for mut record in file.records {
            debug!(collection = %record.collection, record = %record.name_or_empty(), "loading record");
            store.create(&mut record).map_err(|source| WorkspaceError::Record {
                collection: record.collection.clone(),
                name: record.name_or_empty().to_string(),
                source,
            })?;
        }
        info!(
            schemas = file.schemas.len(),
            records = file.schemas.iter().map(|s| store.count(&s.collection)).sum::<usize>(),
            live,
            "workspace loaded"
        );
        Ok(Self {
            store,
            engine,
            logs,
            schemas: file.schemas,
        })
    }

    /// Reads and loads a workspace file.
    pub fn load(path: &Path, live: bool) -> Result<Self, WorkspaceError> {
        Self::open(WorkspaceFile::read(path)?, live)
    }

    /// Snapshot of the current store and configurations.
    pub fn snapshot(&self) -> Result<WorkspaceFile, WorkspaceError> {
        let records = self
            .schemas
            .iter()
            .flat_map(|schema| self.store.records(&schema.collection))
            .collect();
        Ok(WorkspaceFile {
            schemas: self.schemas.clone(),
            records,
            configurations: self.engine.configurations().all()?,
        })
    }

    /// Every sync log entry written so far.
    pub fn sync_logs(&self) -> Vec<SyncLog> {
        self.logs.entries()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) const SAMPLE: &str = r#"{
        "schemas": [
            {"collection": "Employee", "fields": [
                {"name": "employee_name", "kind": {"type": "Data"}},
                {"name": "user_id", "kind": {"type": "Data"}}
            ]},
            {"collection": "User", "fields": [
                {"name": "full_name", "kind": {"type": "Data"}, "required": true}
            ]}
        ],
        "records": [
            {"collection": "Employee", "name": "EMP-1",
             "fields": {"employee_name": "Ada", "user_id": "ada"}},
            {"collection": "Employee", "name": "EMP-2",
             "fields": {"employee_name": "Grace", "user_id": "grace"}}
        ],
        "configurations": [
            {"name": "Employee-User", "source_collection": "Employee",
             "target_collection": "User", "bidirectional": true,
             "identifier_mapping": [{"source": "user_id", "target": "name"}],
             "direct_fields": [{"source": "employee_name", "target": "full_name"}]}
        ]
    }"#;

    pub(crate) fn sample_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        file
    }

    #[test]
    fn silent_load_does_not_sync() {
        let file = sample_file();
        let workspace = Workspace::load(file.path(), false).unwrap();
        assert_eq!(workspace.store.count("Employee"), 2);
        assert_eq!(workspace.store.count("User"), 0);
    }

    #[test]
    fn live_load_replays_records() {
        let file = sample_file();
        let workspace = Workspace::load(file.path(), true).unwrap();
        assert_eq!(workspace.store.count("User"), 2);
        assert_eq!(workspace.sync_logs().len(), 2);
    }

    #[test]
    fn snapshot_round_trips_through_disk() {
        let file = sample_file();
        let workspace = Workspace::load(file.path(), true).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.json");
        workspace.snapshot().unwrap().write(&out).unwrap();

        let written = WorkspaceFile::read(&out).unwrap();
        assert_eq!(written.records.len(), 4);
        assert_eq!(written.configurations.len(), 1);
    }

    #[test]
    fn bad_files_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(
            WorkspaceFile::read(&missing),
            Err(WorkspaceError::Io { .. })
        ));

        let garbage = dir.path().join("garbage.json");
        fs::write(&garbage, "{not json").unwrap();
        assert!(matches!(
            WorkspaceFile::read(&garbage),
            Err(WorkspaceError::Json { .. })
        ));
    }
}
