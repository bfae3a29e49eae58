//! Test fixtures and engine helpers.
//!
//! The fixtures model a small HR system: employees with an education table
//! synced to user accounts with a qualifications table.

use livesync_engine::{
    ChildMapping, DeferredJobQueue, EngineConfig, HookRegistry, MemoryLogStore, SyncConfiguration,
    SyncEngine, SyncLog,
};
use livesync_store::{ChildRow, FieldKind, MemoryStore, Record, RecordStore, Schema};
use std::sync::Arc;

/// Employee collection.
pub const EMPLOYEE: &str = "Employee";
/// Employee education rows.
pub const EMPLOYEE_EDUCATION: &str = "Employee Education";
/// User collection.
pub const USER: &str = "User";
/// User qualification rows.
pub const USER_QUALIFICATION: &str = "User Qualification";
/// Name of [`employee_user_config`].
pub const EMPLOYEE_USER: &str = "Employee-User";

/// Schemas of the HR fixture collections.
pub fn hr_schemas() -> Vec<Schema> {
    vec![
        Schema::new(EMPLOYEE)
            .field("employee_name", FieldKind::Data)
            .field("user_id", FieldKind::Data)
            .field("personal_email", FieldKind::Data)
            .field("cell_number", FieldKind::Data)
            .field("department", FieldKind::Data)
            .field("age", FieldKind::Int)
            .field("status", FieldKind::Select)
            .table("education", EMPLOYEE_EDUCATION),
        Schema::new(EMPLOYEE_EDUCATION)
            .field("school", FieldKind::Data)
            .field("qualification", FieldKind::Data)
            .field("year", FieldKind::Int),
        Schema::new(USER)
            .required_field("full_name", FieldKind::Data)
            .field("email", FieldKind::Data)
            .field("mobile_no", FieldKind::Data)
            .field("department", FieldKind::Data)
            .field("deleted_in_source", FieldKind::Check)
            .field("status", FieldKind::Select)
            .table("qualifications", USER_QUALIFICATION),
        Schema::new(USER_QUALIFICATION)
            .field("institution", FieldKind::Data)
            .field("degree", FieldKind::Data)
            .field("year", FieldKind::Int),
    ]
}

/// A memory store with the HR schemas registered.
pub fn hr_store() -> MemoryStore {
    let store = MemoryStore::new();
    for schema in hr_schemas() {
        store.register_schema(schema);
    }
    store
}

/// Bidirectional employee/user configuration.
///
/// Users are identified by `user_id`; education rows are paired by school.
pub fn employee_user_config() -> SyncConfiguration {
    SyncConfiguration::new(EMPLOYEE_USER, EMPLOYEE, USER)
        .bidirectional()
        .identify_by("user_id", "name")
        .map("employee_name", "full_name")
        .map("personal_email", "email")
        .map("cell_number", "mobile_no")
        .child(
            ChildMapping::new("education", "qualifications")
                .field("school", "institution")
                .field("qualification", "degree")
                .field("year", "year")
                .keyed_by("school"),
        )
}

/// An unsaved employee.
pub fn employee(name: &str, employee_name: &str, user_id: &str) -> Record {
    Record::new(EMPLOYEE)
        .with_name(name)
        .with_field("employee_name", employee_name)
        .with_field("user_id", user_id)
        .with_field("status", "Active")
}

/// An education row.
pub fn education(school: &str, qualification: &str, year: i64) -> ChildRow {
    ChildRow::new()
        .with("school", school)
        .with("qualification", qualification)
        .with("year", year)
}

/// An engine over the HR store, wired to the store's events.
///
/// Bulk jobs go to a [`DeferredJobQueue`]; run them with
/// `harness.queue.run_pending()`.
pub struct TestHarness {
    /// The record store.
    pub store: Arc<MemoryStore>,
    /// The engine.
    pub engine: SyncEngine<MemoryStore>,
    /// The engine's hook registry.
    pub registry: Arc<HookRegistry>,
    /// The engine's sync log.
    pub logs: Arc<MemoryLogStore>,
    /// The engine's job queue.
    pub queue: Arc<DeferredJobQueue>,
}

impl TestHarness {
    /// Creates a harness with default settings.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Creates a harness with the given settings.
    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_store(hr_store(), config)
    }

    /// Creates a harness over a prepared store.
    pub fn with_store(store: MemoryStore, config: EngineConfig) -> Self {
        let store = Arc::new(store);
        let registry = Arc::new(HookRegistry::new());
        let logs = Arc::new(MemoryLogStore::new());
        let queue = Arc::new(DeferredJobQueue::new());
        let engine = SyncEngine::builder(Arc::clone(&store))
            .config(config)
            .registry(Arc::clone(&registry))
            .log_store(logs.clone())
            .job_queue(queue.clone())
            .build();
        store.subscribe(engine.event_hook());
        Self {
            store,
            engine,
            registry,
            logs,
            queue,
        }
    }

    /// Creates a harness with [`employee_user_config`] saved.
    pub fn hr() -> Self {
        let harness = Self::new();
        harness.save(employee_user_config());
        harness
    }

    /// Saves a configuration, panicking if it is rejected.
    pub fn save(&self, config: SyncConfiguration) {
        let name = config.name.clone();
        if let Err(err) = self.engine.save_configuration(config) {
            panic!("configuration {name} rejected: {err}");
        }
    }

    /// Creates a record through the validated API.
    pub fn create(&self, mut record: Record) -> Record {
        if let Err(err) = self.store.create(&mut record) {
            panic!("create {} failed: {err}", record.collection);
        }
        record
    }

    /// Saves a record through the validated API.
    pub fn update(&self, record: &mut Record) {
        if let Err(err) = self.store.update(record) {
            panic!("update {} failed: {err}", record.name_or_empty());
        }
    }

    /// Reads a record, if it exists.
    pub fn find(&self, collection: &str, name: &str) -> Option<Record> {
        self.store.get(collection, name).ok()
    }

    /// Every sync log entry written so far.
    pub fn sync_logs(&self) -> Vec<SyncLog> {
        self.logs.entries()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Mapped values of a child table, without row identities.
pub fn row_values(record: &Record, table: &str) -> Vec<serde_json::Value> {
    record
        .table(table)
        .iter()
        .map(|row| serde_json::to_value(&row.fields).unwrap_or_default())
        .collect()
}
