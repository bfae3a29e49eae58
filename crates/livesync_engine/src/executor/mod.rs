//! Single-record sync execution.
//!
//! One [`Executor::run`] call takes a source record through the full
//! attempt: guard, conditions, `before_sync`, target resolution, mapping,
//! persistence, `after_sync`. Every failure is caught and reported in the
//! returned [`SyncOutcome`]; nothing propagates to the caller.
//!
//! Persistence uses either the validated store API ([`standard`]) or direct
//! writes ([`fast`]). Both paths share the mapping code and reach the same
//! end state for every field they write.

mod children;
mod delete;
mod fast;
pub(crate) mod mapping;
mod standard;

pub use children::{diff_rows, reconcile, RowPlan};

use crate::config::{Direction, DirectedMapping, OnUpdateAction, SyncConfiguration};
use crate::context::{SyncContext, SyncEvent};
use crate::error::{ErrorType, SyncError, SyncResult};
use crate::guard::InProgress;
use crate::log::{SyncLog, SyncStatus};
use crate::matcher::find_target;
use crate::registry::{HookInput, HookRegistry};
use chrono::Utc;
use livesync_store::{DirectStore, Record};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use std::fmt;
use tracing::{debug, error, info, warn};

/// What a successful attempt did to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncAction {
    /// Target created.
    Insert,
    /// Target saved.
    Update,
    /// Target deleted.
    Delete,
    /// Target flagged as archived.
    Archive,
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncAction::Insert => "Insert",
            SyncAction::Update => "Update",
            SyncAction::Delete => "Delete",
            SyncAction::Archive => "Archive",
        })
    }
}

/// Why an attempt did nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// The record is being written by a sync already.
    InProgress,
    /// The configuration is disabled.
    Disabled,
    /// Backward sync on a one-way configuration.
    NotBidirectional,
    /// A skip / only-if condition gated the record out.
    Condition(String),
    /// `on_update_action` excludes the triggering event.
    EventFiltered(SyncEvent),
    /// No target to delete or archive.
    NoTarget,
    /// The delete policy is `None`.
    NoDeleteAction,
    /// The target has nowhere to record the delete.
    NoDeleteField(String),
}

impl SkipReason {
    /// Returns true for loop-guard and disabled skips.
    pub fn is_guard(&self) -> bool {
        matches!(
            self,
            SkipReason::InProgress | SkipReason::Disabled | SkipReason::NotBidirectional
        )
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::InProgress => f.write_str("record is already being synced"),
            SkipReason::Disabled => f.write_str("sync configuration is disabled"),
            SkipReason::NotBidirectional => f.write_str("configuration is not bidirectional"),
            SkipReason::Condition(reason) => f.write_str(reason),
            SkipReason::EventFiltered(event) => {
                write!(f, "{event} events are excluded by on_update_action")
            }
            SkipReason::NoTarget => f.write_str("no matching target record"),
            SkipReason::NoDeleteAction => f.write_str("no delete action configured"),
            SkipReason::NoDeleteField(field) => {
                write!(f, "target has no {field} field to record the delete")
            }
        }
    }
}

/// Result of one sync attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOutcome {
    /// Configuration name.
    pub configuration: String,
    /// Outcome status.
    pub status: SyncStatus,
    /// What was done to the target, on success.
    pub action: Option<SyncAction>,
    /// Triggering event.
    pub event: SyncEvent,
    /// Direction.
    pub direction: Direction,
    /// Source collection.
    pub source_collection: String,
    /// Source record.
    pub source_name: String,
    /// Target collection.
    pub target_collection: String,
    /// Target record, once resolved.
    pub target_name: Option<String>,
    /// Human-readable summary.
    pub message: String,
    /// Why nothing was done.
    pub skip: Option<SkipReason>,
    /// Error classification.
    pub error_type: Option<ErrorType>,
    /// Extra detail for the sync log.
    pub details: Map<String, Json>,
}

impl SyncOutcome {
    fn base(request: &SyncRequest<'_>, source: &Record) -> Self {
        let config = request.configuration;
        let target_collection = match request.direction {
            Direction::Forward => &config.target_collection,
            Direction::Backward => &config.source_collection,
        };
        Self {
            configuration: config.name.clone(),
            status: SyncStatus::Skipped,
            action: None,
            event: request.event,
            direction: request.direction,
            source_collection: source.collection.clone(),
            source_name: source.name_or_empty().to_string(),
            target_collection: target_collection.clone(),
            target_name: None,
            message: String::new(),
            skip: None,
            error_type: None,
            details: Map::new(),
        }
    }

    fn skipped(mut self, reason: SkipReason) -> Self {
        self.status = SyncStatus::Skipped;
        self.message = reason.to_string();
        self.skip = Some(reason);
        self
    }

    fn succeeded(mut self, action: SyncAction, target_name: Option<String>) -> Self {
        self.status = SyncStatus::Success;
        self.message = format!(
            "{action} {} {}",
            self.target_collection,
            target_name.as_deref().unwrap_or_default()
        )
        .trim_end()
        .to_string();
        self.action = Some(action);
        self.target_name = target_name;
        self
    }

    fn failed(mut self, err: &SyncError) -> Self {
        self.status = SyncStatus::Error;
        self.message = err.to_string();
        self.error_type = Some(err.error_type());
        self
    }

    fn with_notes(mut self, ctx: &mut SyncContext) -> Self {
        self.details.extend(ctx.take_notes());
        self
    }

    /// Returns true if the target was written.
    pub fn is_success(&self) -> bool {
        self.status == SyncStatus::Success
    }

    /// Label recorded as the sync log event.
    pub fn event_label(&self) -> String {
        self.action
            .map_or_else(|| self.event.to_string(), |a| a.to_string())
    }

    /// Converts the outcome into a sync log entry.
    pub fn to_log(&self, actor: &str, job_id: Option<&str>) -> SyncLog {
        let error_message = match self.status {
            SyncStatus::Success => None,
            _ => Some(self.message.clone()),
        };
        SyncLog {
            id: uuid::Uuid::new_v4().to_string(),
            sync_configuration: self.configuration.clone(),
            timestamp: Utc::now(),
            source_collection: self.source_collection.clone(),
            source_name: self.source_name.clone(),
            target_collection: self.target_collection.clone(),
            target_name: self.target_name.clone(),
            status: self.status,
            direction: self.direction,
            event: self.event_label(),
            actor: actor.to_string(),
            error_type: self.error_type,
            error_message,
            details: (!self.details.is_empty()).then(|| self.details.clone()),
            job_id: job_id.map(str::to_string),
        }
    }
}

/// Parameters of one sync attempt.
#[derive(Debug, Clone, Copy)]
pub struct SyncRequest<'a> {
    /// Active configuration.
    pub configuration: &'a SyncConfiguration,
    /// Direction.
    pub direction: Direction,
    /// Triggering event.
    pub event: SyncEvent,
    /// Use direct writes.
    pub fast_mode: bool,
    /// Background job, if any.
    pub job_id: Option<&'a str>,
}

impl<'a> SyncRequest<'a> {
    /// Creates a standard-path request.
    pub fn new(configuration: &'a SyncConfiguration, direction: Direction, event: SyncEvent) -> Self {
        Self {
            configuration,
            direction,
            event,
            fast_mode: false,
            job_id: None,
        }
    }

    /// Selects the fast path.
    #[must_use]
    pub fn fast(mut self, fast_mode: bool) -> Self {
        self.fast_mode = fast_mode;
        self
    }

    /// Tags the attempt with a job id.
    #[must_use]
    pub fn in_job(mut self, job_id: Option<&'a str>) -> Self {
        self.job_id = job_id;
        self
    }
}

fn event_allowed(action: OnUpdateAction, event: SyncEvent) -> bool {
    if event.is_operator_initiated() {
        return true;
    }
    match action {
        OnUpdateAction::Any => true,
        OnUpdateAction::OnlyCreate => event == SyncEvent::Insert,
        OnUpdateAction::OnlyUpdate => event == SyncEvent::Update,
    }
}

/// Runs sync attempts against a store.
pub struct Executor<'a, S: DirectStore + ?Sized> {
    store: &'a S,
    registry: &'a HookRegistry,
    actor: &'a str,
}

impl<'a, S: DirectStore + ?Sized> Executor<'a, S> {
    /// Creates an executor stamping direct writes with `actor`.
    pub fn new(store: &'a S, registry: &'a HookRegistry, actor: &'a str) -> Self {
        Self {
            store,
            registry,
            actor,
        }
    }

    /// Syncs `source` to its counterpart.
    pub fn run(&self, source: &Record, request: &SyncRequest<'_>) -> SyncOutcome {
        let outcome = SyncOutcome::base(request, source);
        let config = request.configuration;

        if let Some(reason) = Self::guard(source, request) {
            debug!(configuration = %config.name, record = %source.name_or_empty(), reason = %reason, "sync skipped");
            return outcome.skipped(reason);
        }
        let mapping = match config.directed(request.direction) {
            Ok(mapping) => mapping,
            Err(_) => return outcome.skipped(SkipReason::NotBidirectional),
        };
        if let Some(reason) = config.conditions.rejection(source) {
            debug!(configuration = %config.name, record = %source.name_or_empty(), reason = %reason, "sync gated by conditions");
            return outcome.skipped(SkipReason::Condition(reason));
        }
        if !event_allowed(config.on_update_action, request.event) {
            return outcome.skipped(SkipReason::EventFiltered(request.event));
        }

        let mut ctx = SyncContext::new(&config.name, request.direction, request.event)
            .fast(request.fast_mode)
            .in_job(request.job_id.map(str::to_string));

        if let Some(hook) = &config.hooks.before_sync {
            let input = HookInput {
                source,
                target: None,
                direction: request.direction,
                configuration: config,
            };
            self.run_hook(hook, &input, &mut ctx);
        }

        let (mut target, is_new) = match self.resolve_target(&mapping, source, &mut ctx) {
            Ok(resolved) => resolved,
            Err(err) => return self.report_error(outcome.with_notes(&mut ctx), &err),
        };

        let result = {
            let mut guard = InProgress::new(&mut target);
            self.write(&mapping, source, &mut guard, is_new, request.fast_mode, &mut ctx)
        };

        match result {
            Ok(action) => {
                info!(
                    configuration = %config.name,
                    direction = ?request.direction,
                    record = %source.name_or_empty(),
                    target = %target.name_or_empty(),
                    action = %action,
                    fast = request.fast_mode,
                    "record synced"
                );
                outcome
                    .with_notes(&mut ctx)
                    .succeeded(action, target.name.clone())
            }
            Err(err) => {
                let mut outcome = outcome.with_notes(&mut ctx);
                outcome.target_name = target.name.clone();
                self.report_error(outcome, &err)
            }
        }
    }

    fn guard(source: &Record, request: &SyncRequest<'_>) -> Option<SkipReason> {
        let config = request.configuration;
        if source.is_syncing() {
            Some(SkipReason::InProgress)
        } else if !config.enabled {
            Some(SkipReason::Disabled)
        } else if request.direction == Direction::Backward && !config.bidirectional {
            Some(SkipReason::NotBidirectional)
        } else {
            None
        }
    }

    fn report_error(&self, outcome: SyncOutcome, err: &SyncError) -> SyncOutcome {
        error!(
            configuration = %outcome.configuration,
            direction = ?outcome.direction,
            record = %outcome.source_name,
            error = %err,
            "sync failed"
        );
        outcome.failed(err)
    }

    /// Runs a lifecycle hook; failures are logged and noted, never fatal.
    fn run_hook(&self, name: &str, input: &HookInput<'_>, ctx: &mut SyncContext) {
        if let Err(err) = self.registry.run_hook(name, input, ctx) {
            warn!(configuration = %input.configuration.name, hook = %name, error = %err, "hook failed");
            ctx.note_list("hook_errors", err.to_string());
        }
    }

    /// Loads the target, or allocates a new one.
    ///
    /// A `sync_name` hook result takes priority over the matcher.
    fn resolve_target(
        &self,
        mapping: &DirectedMapping<'_>,
        source: &Record,
        ctx: &mut SyncContext,
    ) -> SyncResult<(Record, bool)> {
        let config = mapping.configuration;
        if let Some(hook) = &config.hooks.sync_name {
            let input = HookInput {
                source,
                target: None,
                direction: mapping.direction,
                configuration: config,
            };
            match self.registry.run_name_hook(hook, &input, ctx) {
                Ok(Some(name)) => {
                    return match self.store.get(mapping.target_collection, &name) {
                        Ok(existing) => Ok((existing, false)),
                        Err(err) if err.is_not_found() => {
                            Ok((Record::new(mapping.target_collection).with_name(name), true))
                        }
                        Err(err) => Err(err.into()),
                    };
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(configuration = %config.name, hook = %hook, error = %err, "sync_name hook failed");
                    ctx.note_list("hook_errors", err.to_string());
                }
            }
        }

        let found = find_target(self.store, mapping, source)?;
        if found.is_ambiguous() {
            ctx.note("ambiguous_match", found.ambiguous.clone());
        }
        match found.target {
            Some(name) => Ok((self.store.get(mapping.target_collection, &name)?, false)),
            None => Ok((Record::new(mapping.target_collection), true)),
        }
    }

    /// Maps onto `target`, persists it and runs `after_sync`.
    fn write(
        &self,
        mapping: &DirectedMapping<'_>,
        source: &Record,
        target: &mut Record,
        is_new: bool,
        fast_mode: bool,
        ctx: &mut SyncContext,
    ) -> SyncResult<SyncAction> {
        let before = target.clone();

        mapping::apply_computed(self.registry, mapping, source, target, ctx)?;
        mapping::apply_fields(self.registry, mapping, source, target, ctx)?;
        mapping::apply_children(self.registry, mapping, source, target, ctx);

        let action = if fast_mode {
            fast::persist(self.store, self.actor, &before, target, is_new)?
        } else {
            standard::persist(self.store, target, is_new)?
        };

        if let Some(hook) = &mapping.configuration.hooks.after_sync {
            let input = HookInput {
                source,
                target: Some(&*target),
                direction: mapping.direction,
                configuration: mapping.configuration,
            };
            self.run_hook(hook, &input, ctx);
        }
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChildMapping;
    use crate::error::HookError;
    use livesync_store::{
        ChildRow, FieldCondition, FieldKind, MemoryStore, RecordStore, Schema, Value,
    };

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.register_schema(
            Schema::new("Employee")
                .field("employee_name", FieldKind::Data)
                .field("user_id", FieldKind::Data)
                .field("status", FieldKind::Select)
                .table("education", "Employee Education"),
        );
        store.register_schema(
            Schema::new("Employee Education")
                .field("school", FieldKind::Data)
                .field("year", FieldKind::Int),
        );
        store.register_schema(
            Schema::new("User")
                .required_field("full_name", FieldKind::Data)
                .field("status", FieldKind::Select)
                .table("qualifications", "User Qualification"),
        );
        store.register_schema(
            Schema::new("User Qualification")
                .field("institution", FieldKind::Data)
                .field("year", FieldKind::Int),
        );
        store
    }

    fn config() -> SyncConfiguration {
        SyncConfiguration::new("emp-user", "Employee", "User")
            .identify_by("user_id", "name")
            .map("employee_name", "full_name")
            .child(
                ChildMapping::new("education", "qualifications")
                    .field("school", "institution")
                    .field("year", "year")
                    .keyed_by("school"),
            )
    }

    fn employee() -> Record {
        Record::new("Employee")
            .with_name("EMP-1")
            .with_field("employee_name", "Ada")
            .with_field("user_id", "ada")
            .with_row("education", ChildRow::new().with("school", "MIT").with("year", 1990))
    }

    #[test]
    fn inserts_then_updates() {
        let store = store();
        let registry = HookRegistry::new();
        let executor = Executor::new(&store, &registry, "Administrator");
        let config = config();
        let request = SyncRequest::new(&config, Direction::Forward, SyncEvent::Manual);

        let first = executor.run(&employee(), &request);
        assert_eq!(first.action, Some(SyncAction::Insert));
        assert_eq!(first.target_name.as_deref(), Some("ada"));

        let second = executor.run(&employee(), &request);
        assert_eq!(second.action, Some(SyncAction::Update));
        assert_eq!(store.count("User"), 1);
        let user = store.get("User", "ada").unwrap();
        assert_eq!(user.get("full_name"), Value::from("Ada"));
        assert_eq!(user.table("qualifications").len(), 1);
    }

    #[test]
    fn fast_path_matches_standard_path() {
        let registry = HookRegistry::new();
        let config = config();
        let request = SyncRequest::new(&config, Direction::Forward, SyncEvent::Manual);

        let standard_store = store();
        Executor::new(&standard_store, &registry, "sync").run(&employee(), &request);
        let fast_store = store();
        let outcome =
            Executor::new(&fast_store, &registry, "sync").run(&employee(), &request.fast(true));
        assert!(outcome.is_success(), "{}", outcome.message);

        let a = standard_store.get("User", "ada").unwrap();
        let b = fast_store.get("User", "ada").unwrap();
        assert_eq!(a.fields, b.fields);
        let rows = |r: &Record| -> Vec<_> {
            r.table("qualifications").iter().map(|row| row.fields.clone()).collect()
        };
        assert_eq!(rows(&a), rows(&b));
        assert!(b.meta.created_at.is_some());
        assert_eq!(b.meta.owner.as_deref(), Some("sync"));
    }

    #[test]
    fn guard_and_conditions_skip() {
        let store = store();
        let registry = HookRegistry::new();
        let executor = Executor::new(&store, &registry, "Administrator");

        let config = config().skip_if(FieldCondition::eq("status", "Draft"));
        let request = SyncRequest::new(&config, Direction::Forward, SyncEvent::Update);
        let draft = employee().with_field("status", "Draft");
        let outcome = executor.run(&draft, &request);
        assert!(matches!(outcome.skip, Some(SkipReason::Condition(_))));
        assert_eq!(store.count("User"), 0);

        let mut busy = employee();
        busy.mark_syncing();
        assert_eq!(executor.run(&busy, &request).skip, Some(SkipReason::InProgress));

        let backward = SyncRequest::new(&config, Direction::Backward, SyncEvent::Update);
        assert_eq!(
            executor.run(&employee(), &backward).skip,
            Some(SkipReason::NotBidirectional)
        );
    }

    #[test]
    fn on_update_action_filters_events() {
        let store = store();
        let registry = HookRegistry::new();
        let executor = Executor::new(&store, &registry, "Administrator");
        let mut config = config();
        config.on_update_action = OnUpdateAction::OnlyCreate;

        let update = SyncRequest::new(&config, Direction::Forward, SyncEvent::Update);
        assert_eq!(
            executor.run(&employee(), &update).skip,
            Some(SkipReason::EventFiltered(SyncEvent::Update))
        );
        let insert = SyncRequest::new(&config, Direction::Forward, SyncEvent::Insert);
        assert!(executor.run(&employee(), &insert).is_success());
    }

    #[test]
    fn validation_failures_are_reported_not_raised() {
        let store = store();
        let registry = HookRegistry::new();
        let executor = Executor::new(&store, &registry, "Administrator");
        let config = config();
        let request = SyncRequest::new(&config, Direction::Forward, SyncEvent::Manual);

        let nameless = Record::new("Employee").with_name("EMP-2").with_field("user_id", "x");
        let outcome = executor.run(&nameless, &request);
        assert_eq!(outcome.status, SyncStatus::Error);
        assert_eq!(outcome.error_type, Some(ErrorType::Validation));
        assert!(outcome.message.contains("full_name is mandatory"));
    }

    #[test]
    fn hooks_run_and_failures_are_noted() {
        let store = store();
        let registry = HookRegistry::new();
        registry.register_hook("stash", |input: &HookInput<'_>, ctx: &mut SyncContext| {
            ctx.insert("source_name", input.source.get("employee_name").to_string());
            Ok(())
        });
        registry.register_hook("check", |input: &HookInput<'_>, ctx: &mut SyncContext| {
            let stashed: Option<String> = ctx.get("source_name");
            let target = input.target.map(|t| t.get("full_name").to_string());
            if stashed == target {
                Err(HookError::new("after_sync saw the handoff"))
            } else {
                Ok(())
            }
        });
        let mut config = config();
        config.hooks.before_sync = Some("stash".into());
        config.hooks.after_sync = Some("check".into());
        let executor = Executor::new(&store, &registry, "Administrator");
        let request = SyncRequest::new(&config, Direction::Forward, SyncEvent::Manual);

        let outcome = executor.run(&employee(), &request);
        assert!(outcome.is_success());
        let errors = outcome.details["hook_errors"].as_array().unwrap();
        assert!(errors[0].as_str().unwrap().contains("after_sync saw the handoff"));
    }

    #[test]
    fn name_hook_takes_priority() {
        let store = store();
        let registry = HookRegistry::new();
        registry.register_name_hook("fixed", |_: &HookInput<'_>, _: &mut SyncContext| {
            Ok(Some("fixed-user".to_string()))
        });
        let mut config = config();
        config.hooks.sync_name = Some("fixed".into());
        let executor = Executor::new(&store, &registry, "Administrator");
        let request = SyncRequest::new(&config, Direction::Forward, SyncEvent::Manual);

        let outcome = executor.run(&employee(), &request);
        assert_eq!(outcome.target_name.as_deref(), Some("fixed-user"));
        assert!(store.get("User", "fixed-user").is_ok());
    }

    #[test]
    fn outcome_log_entry() {
        let store = store();
        let registry = HookRegistry::new();
        let config = config();
        let request = SyncRequest::new(&config, Direction::Forward, SyncEvent::Insert);
        let outcome = Executor::new(&store, &registry, "Administrator").run(&employee(), &request);

        let log = outcome.to_log("Administrator", Some("job-1"));
        assert_eq!(log.event, "Insert");
        assert_eq!(log.status, SyncStatus::Success);
        assert_eq!(log.error_message, None);
        assert_eq!(log.job_id.as_deref(), Some("job-1"));
    }
}
