//! The sync engine facade.
//!
//! [`SyncEngine`] owns every collaborator (record store, hook registry,
//! configuration store, sync log, job queue) and exposes the host-facing
//! operations. Public operations never return errors to the caller: failures
//! are converted into `{ success: false, message }` responses at this
//! boundary.

use crate::cache::TtlCache;
use crate::config::{Direction, EngineConfig, SyncConfiguration};
use crate::configs::{ConfigurationStore, MemoryConfigurationStore};
use crate::context::SyncEvent;
use crate::error::{SyncError, SyncResult};
use crate::executor::{Executor, SyncAction, SyncOutcome, SyncRequest};
use crate::jobs::{
    InlineJobQueue, JobProgress, JobQueue, ProgressEvent, ProgressFeed, ThreadJobQueue,
    TokioJobQueue,
};
use crate::log::{should_log, MemoryLogStore, SyncLogStore, SyncStatus, SYNC_LOG_COLLECTION};
use crate::registry::HookRegistry;
use crate::validate::validate_configuration;
use livesync_store::{DirectStore, EventKind, Record, RecordEventListener};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Collection holding sync configurations in a record-backed deployment.
pub const CONFIGURATION_COLLECTION: &str = "Live Sync";

/// Collections whose events the engine never reacts to.
pub const IGNORED_COLLECTIONS: [&str; 2] = [SYNC_LOG_COLLECTION, CONFIGURATION_COLLECTION];

impl From<EventKind> for SyncEvent {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Inserted => SyncEvent::Insert,
            EventKind::Updated | EventKind::Submitted | EventKind::BeforeCancel => {
                SyncEvent::Update
            }
            EventKind::Deleted => SyncEvent::Delete,
        }
    }
}

/// Engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Executor runs in the forward direction.
    pub attempts_forward: u64,
    /// Executor runs in the backward direction.
    pub attempts_backward: u64,
    /// Targets created.
    pub inserted: u64,
    /// Targets updated.
    pub updated: u64,
    /// Targets deleted.
    pub deleted: u64,
    /// Targets archived or flagged.
    pub archived: u64,
    /// Skipped attempts.
    pub skipped: u64,
    /// Failed attempts.
    pub errored: u64,
    /// Events ignored because the record was being written by a sync.
    pub suppressed: u64,
    /// Events dropped by the rate limit.
    pub rate_limited: u64,
}

impl EngineStats {
    /// Total executor runs.
    pub fn attempts(&self) -> u64 {
        self.attempts_forward + self.attempts_backward
    }
}

/// Result of [`SyncEngine::sync_one`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOneResponse {
    /// False only if the attempt errored or could not start.
    pub success: bool,
    /// Summary.
    pub message: String,
    /// Attempt status, if the attempt ran.
    pub status: Option<SyncStatus>,
    /// What was done to the target.
    pub action: Option<SyncAction>,
    /// Target collection.
    pub target_collection: Option<String>,
    /// Target record.
    pub target_name: Option<String>,
}

impl SyncOneResponse {
    fn failed(err: &SyncError) -> Self {
        Self {
            success: false,
            message: err.to_string(),
            status: None,
            action: None,
            target_collection: None,
            target_name: None,
        }
    }
}

impl From<SyncOutcome> for SyncOneResponse {
    fn from(outcome: SyncOutcome) -> Self {
        Self {
            success: outcome.status != SyncStatus::Error,
            message: outcome.message,
            status: Some(outcome.status),
            action: outcome.action,
            target_collection: Some(outcome.target_collection),
            target_name: outcome.target_name,
        }
    }
}

pub(crate) struct Inner<S: DirectStore + 'static> {
    pub(crate) store: Arc<S>,
    pub(crate) config: EngineConfig,
    pub(crate) registry: Arc<HookRegistry>,
    pub(crate) configs: Arc<dyn ConfigurationStore>,
    pub(crate) logs: Arc<dyn SyncLogStore>,
    pub(crate) queue: Arc<dyn JobQueue>,
    pub(crate) lookup: TtlCache<String, Vec<SyncConfiguration>>,
    lookup_fill: RwLock<()>,
    pub(crate) progress: TtlCache<String, JobProgress>,
    pub(crate) feed: ProgressFeed,
    stats: RwLock<EngineStats>,
    recent: RwLock<HashMap<(String, String, String), Instant>>,
}

/// Configuration-driven record sync engine.
///
/// Cloning is cheap; clones share all state.
///
/// # Example
///
/// ```rust,ignore
/// let store = Arc::new(MemoryStore::new());
/// let engine = SyncEngine::new(Arc::clone(&store));
/// store.subscribe(engine.event_hook());
///
/// engine.save_configuration(
///     SyncConfiguration::new("employee-user", "Employee", "User")
///         .identify_by("user_id", "name")
///         .map("employee_name", "full_name"),
/// )?;
/// ```
pub struct SyncEngine<S: DirectStore + 'static> {
    pub(crate) inner: Arc<Inner<S>>,
}

impl<S: DirectStore + 'static> Clone for SyncEngine<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: DirectStore + 'static> fmt::Debug for SyncEngine<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.inner.config)
            .field("registry", &self.inner.registry)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Builder for [`SyncEngine`].
pub struct SyncEngineBuilder<S: DirectStore + 'static> {
    store: Arc<S>,
    config: EngineConfig,
    registry: Option<Arc<HookRegistry>>,
    configs: Option<Arc<dyn ConfigurationStore>>,
    logs: Option<Arc<dyn SyncLogStore>>,
    queue: Option<Arc<dyn JobQueue>>,
}

impl<S: DirectStore + 'static> SyncEngineBuilder<S> {
    /// Sets the engine tunables.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the hook registry.
    pub fn registry(mut self, registry: Arc<HookRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Sets the configuration store.
    pub fn configuration_store(mut self, configs: Arc<dyn ConfigurationStore>) -> Self {
        self.configs = Some(configs);
        self
    }

    /// Sets the sync log sink.
    pub fn log_store(mut self, logs: Arc<dyn SyncLogStore>) -> Self {
        self.logs = Some(logs);
        self
    }

    /// Sets the background job queue.
    pub fn job_queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Builds the engine. Unset collaborators default to in-memory ones. The
    /// default job queue runs on the current tokio runtime if there is one,
    /// otherwise on a dedicated worker thread.
    pub fn build(self) -> SyncEngine<S> {
        let config = self.config;
        let inner = Inner {
            store: self.store,
            registry: self.registry.unwrap_or_default(),
            configs: self
                .configs
                .unwrap_or_else(|| Arc::new(MemoryConfigurationStore::new())),
            logs: self.logs.unwrap_or_else(|| Arc::new(MemoryLogStore::new())),
            queue: self.queue.unwrap_or_else(default_queue),
            lookup: TtlCache::new(config.config_cache_ttl),
            lookup_fill: RwLock::new(()),
            progress: TtlCache::new(config.job_progress_ttl),
            feed: ProgressFeed::new(),
            stats: RwLock::new(EngineStats::default()),
            recent: RwLock::new(HashMap::new()),
            config,
        };
        SyncEngine {
            inner: Arc::new(inner),
        }
    }
}

fn default_queue() -> Arc<dyn JobQueue> {
    if let Ok(queue) = TokioJobQueue::current() {
        return Arc::new(queue);
    }
    match ThreadJobQueue::spawn("livesync-jobs") {
        Ok(queue) => Arc::new(queue),
        Err(err) => {
            warn!(error = %err, "no job worker available, running jobs inline");
            Arc::new(InlineJobQueue)
        }
    }
}

impl<S: DirectStore + 'static> SyncEngine<S> {
    /// Creates an engine with default collaborators.
    pub fn new(store: Arc<S>) -> Self {
        Self::builder(store).build()
    }

    /// Starts building an engine over `store`.
    pub fn builder(store: Arc<S>) -> SyncEngineBuilder<S> {
        SyncEngineBuilder {
            store,
            config: EngineConfig::default(),
            registry: None,
            configs: None,
            logs: None,
            queue: None,
        }
    }

    /// The record store.
    pub fn store(&self) -> &Arc<S> {
        &self.inner.store
    }

    /// The hook registry.
    pub fn registry(&self) -> &HookRegistry {
        &self.inner.registry
    }

    /// The engine tunables.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// The configuration store.
    pub fn configurations(&self) -> &Arc<dyn ConfigurationStore> {
        &self.inner.configs
    }

    /// The sync log.
    pub fn logs(&self) -> &Arc<dyn SyncLogStore> {
        &self.inner.logs
    }

    /// Returns a snapshot of the engine counters.
    pub fn stats(&self) -> EngineStats {
        *self.inner.stats.read()
    }

    /// Subscribes to job progress events.
    pub fn subscribe_progress(&self) -> Receiver<ProgressEvent> {
        self.inner.feed.subscribe()
    }

    /// The job progress feed.
    pub fn progress_feed(&self) -> &ProgressFeed {
        &self.inner.feed
    }

    /// Returns a listener to subscribe to the record store.
    ///
    /// The listener holds a weak reference, so a store owning it does not
    /// keep the engine alive.
    pub fn event_hook(&self) -> Arc<dyn RecordEventListener> {
        Arc::new(EngineListener {
            inner: Arc::downgrade(&self.inner),
        })
    }

    /// Validates and stores a configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Configuration`] listing every problem found.
    pub fn save_configuration(&self, config: SyncConfiguration) -> SyncResult<()> {
        let inner = &self.inner;
        let all = inner.configs.all()?;
        let previous = all.iter().find(|c| c.name == config.name).cloned();
        let others: Vec<SyncConfiguration> =
            all.into_iter().filter(|c| c.name != config.name).collect();

        validate_configuration(&config, inner.store.as_ref(), &inner.registry, &others)?;

        inner.configs.put(config.clone())?;
        self.invalidate_lookup(&config);
        if let Some(previous) = &previous {
            self.invalidate_lookup(previous);
        }
        info!(
            configuration = %config.name,
            source = %config.source_collection,
            target = %config.target_collection,
            bidirectional = config.bidirectional,
            "sync configuration saved"
        );
        Ok(())
    }

    /// Removes a configuration.
    pub fn remove_configuration(&self, name: &str) -> SyncResult<SyncConfiguration> {
        let removed = self.inner.configs.remove(name)?;
        self.invalidate_lookup(&removed);
        Ok(removed)
    }

    pub(crate) fn invalidate_lookup(&self, config: &SyncConfiguration) {
        let _fill = self.inner.lookup_fill.write();
        self.inner.lookup.invalidate(&config.source_collection);
        self.inner.lookup.invalidate(&config.target_collection);
    }

    fn configurations_for(&self, collection: &str) -> SyncResult<Vec<SyncConfiguration>> {
        let key = collection.to_string();
        if let Some(cached) = self.inner.lookup.get(&key) {
            return Ok(cached);
        }
        // A fill runs entirely before or after an invalidation, so it can
        // never cache configurations older than the last save.
        let _fill = self.inner.lookup_fill.read();
        let found = self.inner.configs.for_collection(collection)?;
        self.inner.lookup.insert(key, found.clone());
        Ok(found)
    }

    /// Reacts to a lifecycle event raised by the record store.
    ///
    /// Never fails: every attempt's outcome goes to the stats, the tracing
    /// log and (when enabled) the sync log.
    pub fn on_record_event(&self, record: &Record, kind: EventKind) {
        if IGNORED_COLLECTIONS.contains(&record.collection.as_str()) {
            return;
        }
        if record.is_syncing() {
            self.inner.stats.write().suppressed += 1;
            debug!(
                collection = %record.collection,
                record = %record.name_or_empty(),
                event = %kind,
                "event raised by a sync write, ignoring"
            );
            return;
        }

        let configs = match self.configurations_for(&record.collection) {
            Ok(configs) => configs,
            Err(err) => {
                error!(collection = %record.collection, error = %err, "configuration lookup failed");
                return;
            }
        };
        let event = SyncEvent::from(kind);
        for config in configs {
            let Ok(direction) = config.direction_for(&record.collection) else {
                continue;
            };
            if self.rate_limited(&config, record) {
                continue;
            }
            let outcome = self.execute(&config, record, direction, event, false, None);
            self.record_outcome(&config, &outcome, None);
        }
    }

    fn rate_limited(&self, config: &SyncConfiguration, record: &Record) -> bool {
        let Some(window) = self.inner.config.rate_limit else {
            return false;
        };
        let key = (
            config.name.clone(),
            record.collection.clone(),
            record.name_or_empty().to_string(),
        );
        let now = Instant::now();
        let mut recent = self.inner.recent.write();
        recent.retain(|_, seen| now.duration_since(*seen) < window);
        if recent.contains_key(&key) {
            drop(recent);
            self.inner.stats.write().rate_limited += 1;
            warn!(
                configuration = %config.name,
                collection = %record.collection,
                record = %record.name_or_empty(),
                "event rate limited"
            );
            return true;
        }
        recent.insert(key, now);
        false
    }

    /// Runs one executor attempt.
    pub(crate) fn execute(
        &self,
        config: &SyncConfiguration,
        record: &Record,
        direction: Direction,
        event: SyncEvent,
        fast_mode: bool,
        job_id: Option<&str>,
    ) -> SyncOutcome {
        let inner = &self.inner;
        {
            let mut stats = inner.stats.write();
            match direction {
                Direction::Forward => stats.attempts_forward += 1,
                Direction::Backward => stats.attempts_backward += 1,
            }
        }
        let executor = Executor::new(inner.store.as_ref(), &inner.registry, &inner.config.actor);
        let request = SyncRequest::new(config, direction, event)
            .fast(fast_mode)
            .in_job(job_id);
        if event == SyncEvent::Delete {
            executor.run_delete(record, &request)
        } else {
            executor.run(record, &request)
        }
    }

    /// Counts an outcome and writes its sync log entry.
    pub(crate) fn record_outcome(
        &self,
        config: &SyncConfiguration,
        outcome: &SyncOutcome,
        job_id: Option<&str>,
    ) {
        let inner = &self.inner;
        {
            let mut stats = inner.stats.write();
            match (outcome.status, outcome.action) {
                (SyncStatus::Success, Some(SyncAction::Insert)) => stats.inserted += 1,
                (SyncStatus::Success, Some(SyncAction::Update)) => stats.updated += 1,
                (SyncStatus::Success, Some(SyncAction::Delete)) => stats.deleted += 1,
                (SyncStatus::Success, Some(SyncAction::Archive)) => stats.archived += 1,
                (SyncStatus::Success, None) | (SyncStatus::Skipped, _) => stats.skipped += 1,
                (SyncStatus::Error, _) => stats.errored += 1,
            }
        }

        let guard_skip = outcome.skip.as_ref().is_some_and(|s| s.is_guard());
        if guard_skip && !inner.config.log_guard_skips {
            return;
        }
        if !should_log(config, outcome.status) {
            return;
        }
        if let Err(err) = inner.logs.append(outcome.to_log(&inner.config.actor, job_id)) {
            warn!(configuration = %config.name, error = %err, "failed to write sync log");
        }
    }

    /// Syncs one record on request.
    ///
    /// `on_update_action` does not apply to manual runs.
    pub fn sync_one(
        &self,
        configuration: &str,
        collection: &str,
        record_id: &str,
        fast_mode: bool,
    ) -> SyncOneResponse {
        match self.try_sync_one(configuration, collection, record_id, fast_mode) {
            Ok(outcome) => outcome.into(),
            Err(err) => {
                warn!(configuration = %configuration, record = %record_id, error = %err, "sync_one failed");
                SyncOneResponse::failed(&err)
            }
        }
    }

    fn try_sync_one(
        &self,
        configuration: &str,
        collection: &str,
        record_id: &str,
        fast_mode: bool,
    ) -> SyncResult<SyncOutcome> {
        let config = self.enabled_configuration(configuration)?;
        let direction = config.direction_for(collection)?;
        let record = self.inner.store.get(collection, record_id)?;
        let outcome = self.execute(&config, &record, direction, SyncEvent::Manual, fast_mode, None);
        self.record_outcome(&config, &outcome, None);
        Ok(outcome)
    }

    pub(crate) fn enabled_configuration(&self, name: &str) -> SyncResult<SyncConfiguration> {
        let config = self.inner.configs.get(name)?;
        if !config.enabled {
            return Err(SyncError::Disabled(config.name));
        }
        Ok(config)
    }
}

struct EngineListener<S: DirectStore + 'static> {
    inner: Weak<Inner<S>>,
}

impl<S: DirectStore + 'static> RecordEventListener for EngineListener<S> {
    fn on_record_event(&self, record: &Record, kind: EventKind) {
        if let Some(inner) = self.inner.upgrade() {
            SyncEngine { inner }.on_record_event(record, kind);
        }
    }
}
