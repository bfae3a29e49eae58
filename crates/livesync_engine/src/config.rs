//! Sync configurations and engine settings.

use crate::error::{SyncError, SyncResult};
use crate::path::FieldPath;
use chrono::{DateTime, Utc};
use livesync_store::{FieldCondition, Record};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Direction of a sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Source collection to target collection.
    Forward,
    /// Target collection back to source collection.
    Backward,
}

impl Direction {
    /// Returns the opposite direction.
    pub fn reverse(self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Forward => "Forward",
            Direction::Backward => "Backward",
        })
    }
}

/// A `source -> target` field path pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldPair {
    /// Source-side path.
    pub source: String,
    /// Target-side path.
    pub target: String,
}

impl FieldPair {
    /// Creates a pair.
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    /// Returns the pair with source and target swapped.
    #[must_use]
    pub fn swapped(&self) -> Self {
        Self::new(self.target.clone(), self.source.clone())
    }
}

/// Row-level mapping between two child tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildMapping {
    /// Child table on the source collection.
    pub source_table: String,
    /// Child table on the target collection.
    pub target_table: String,
    /// Source row field to target row field.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    /// Source-side row field used to pair rows.
    #[serde(default)]
    pub key_field: Option<String>,
}

impl ChildMapping {
    /// Creates a child mapping with no fields.
    pub fn new(source_table: impl Into<String>, target_table: impl Into<String>) -> Self {
        Self {
            source_table: source_table.into(),
            target_table: target_table.into(),
            fields: BTreeMap::new(),
            key_field: None,
        }
    }

    /// Adds a row field mapping.
    #[must_use]
    pub fn field(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.fields.insert(source.into(), target.into());
        self
    }

    /// Sets the key field.
    #[must_use]
    pub fn keyed_by(mut self, key_field: impl Into<String>) -> Self {
        self.key_field = Some(key_field.into());
        self
    }
}

/// Names of registered lifecycle hooks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hooks {
    /// Called before mapping.
    #[serde(default)]
    pub before_sync: Option<String>,
    /// Called after the target is persisted.
    #[serde(default)]
    pub after_sync: Option<String>,
    /// Resolves the target identity ahead of matching.
    #[serde(default)]
    pub sync_name: Option<String>,
}

/// A target field whose value is computed from the source record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputedField {
    /// Target field path.
    pub target_field: String,
    /// Registered compute function.
    pub compute: String,
}

/// Skip / only gates evaluated against the source record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conditions {
    /// Any match skips the record.
    #[serde(default)]
    pub skip_if: Vec<FieldCondition>,
    /// Every condition must match or the record is skipped.
    #[serde(default)]
    pub only_if: Vec<FieldCondition>,
}

impl Conditions {
    /// Returns the reason the record is gated out, if any.
    pub fn rejection(&self, record: &Record) -> Option<String> {
        if let Some(hit) = self.skip_if.iter().find(|c| c.matches(record)) {
            return Some(format!("skip condition met: {} {} {}", hit.field, hit.op, hit.value));
        }
        if let Some(miss) = self.only_if.iter().find(|c| !c.matches(record)) {
            return Some(format!(
                "only-if condition not met: {} {} {}",
                miss.field, miss.op, miss.value
            ));
        }
        None
    }

    /// Iterates over every condition.
    pub fn iter(&self) -> impl Iterator<Item = &FieldCondition> {
        self.skip_if.iter().chain(self.only_if.iter())
    }
}

/// Which lifecycle events trigger a sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnUpdateAction {
    /// Inserts and updates.
    #[default]
    Any,
    /// Inserts only.
    #[serde(rename = "Only Create")]
    OnlyCreate,
    /// Updates only.
    #[serde(rename = "Only Update")]
    OnlyUpdate,
}

/// What happens to the target when the source is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnDeleteAction {
    /// Leave the target alone.
    #[default]
    None,
    /// Delete the target.
    Delete,
    /// Flag the target as archived.
    Archive,
    /// Set `on_delete_field` to 1.
    #[serde(rename = "Set Field")]
    SetField,
}

/// Sync log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    /// Errors only.
    Error,
    /// Errors and skips.
    Warning,
    /// Everything.
    #[default]
    Info,
    /// Everything, with mapping detail.
    Debug,
}

fn enabled_default() -> bool {
    true
}

/// Configuration of one sync relationship between two collections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfiguration {
    /// Unique name.
    pub name: String,
    /// Source collection.
    pub source_collection: String,
    /// Target collection.
    pub target_collection: String,
    /// Whether target changes flow back to the source.
    #[serde(default)]
    pub bidirectional: bool,
    /// Master switch.
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    /// Pairs used to find the matching record.
    #[serde(default)]
    pub identifier_mapping: Vec<FieldPair>,
    /// Field mappings, applied in order.
    #[serde(default)]
    pub direct_fields: Vec<FieldPair>,
    /// Child table mappings.
    #[serde(default)]
    pub child_mappings: Vec<ChildMapping>,
    /// Source field path to registered transform.
    #[serde(default)]
    pub transforms: BTreeMap<String, String>,
    /// Lifecycle hooks.
    #[serde(default)]
    pub hooks: Hooks,
    /// Target fields computed before mapping.
    #[serde(default)]
    pub computed_fields: Vec<ComputedField>,
    /// Skip / only gates.
    #[serde(default)]
    pub conditions: Conditions,
    /// Which events trigger a sync.
    #[serde(default)]
    pub on_update_action: OnUpdateAction,
    /// Delete policy.
    #[serde(default)]
    pub on_delete_action: OnDeleteAction,
    /// Field set by [`OnDeleteAction::SetField`].
    #[serde(default)]
    pub on_delete_field: Option<String>,
    /// Whether sync logs are written.
    #[serde(default = "enabled_default")]
    pub enable_logging: bool,
    /// Sync log verbosity.
    #[serde(default)]
    pub log_level: LogLevel,
    /// Forward delta watermark.
    #[serde(default)]
    pub last_synced_forward: Option<DateTime<Utc>>,
    /// Backward delta watermark.
    #[serde(default)]
    pub last_synced_backward: Option<DateTime<Utc>>,
}

impl SyncConfiguration {
    /// Creates an enabled, one-way configuration with no mappings.
    pub fn new(
        name: impl Into<String>,
        source_collection: impl Into<String>,
        target_collection: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source_collection: source_collection.into(),
            target_collection: target_collection.into(),
            bidirectional: false,
            enabled: true,
            identifier_mapping: Vec::new(),
            direct_fields: Vec::new(),
            child_mappings: Vec::new(),
            transforms: BTreeMap::new(),
            hooks: Hooks::default(),
            computed_fields: Vec::new(),
            conditions: Conditions::default(),
            on_update_action: OnUpdateAction::Any,
            on_delete_action: OnDeleteAction::None,
            on_delete_field: None,
            enable_logging: true,
            log_level: LogLevel::Info,
            last_synced_forward: None,
            last_synced_backward: None,
        }
    }

    /// Makes the configuration bidirectional.
    #[must_use]
    pub fn bidirectional(mut self) -> Self {
        self.bidirectional = true;
        self
    }

    /// Adds an identifier pair.
    #[must_use]
    pub fn identify_by(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.identifier_mapping.push(FieldPair::new(source, target));
        self
    }

    /// Adds a direct field mapping.
    #[must_use]
    pub fn map(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.direct_fields.push(FieldPair::new(source, target));
        self
    }

    /// Adds a child table mapping.
    #[must_use]
    pub fn child(mut self, mapping: ChildMapping) -> Self {
        self.child_mappings.push(mapping);
        self
    }

    /// Registers a transform for a source field path.
    #[must_use]
    pub fn transform(mut self, field: impl Into<String>, name: impl Into<String>) -> Self {
        self.transforms.insert(field.into(), name.into());
        self
    }

    /// Adds a computed target field.
    #[must_use]
    pub fn compute(mut self, target_field: impl Into<String>, compute: impl Into<String>) -> Self {
        self.computed_fields.push(ComputedField {
            target_field: target_field.into(),
            compute: compute.into(),
        });
        self
    }

    /// Adds a skip condition.
    #[must_use]
    pub fn skip_if(mut self, condition: FieldCondition) -> Self {
        self.conditions.skip_if.push(condition);
        self
    }

    /// Adds an only-if condition.
    #[must_use]
    pub fn only_if(mut self, condition: FieldCondition) -> Self {
        self.conditions.only_if.push(condition);
        self
    }

    /// Sets the delete policy.
    #[must_use]
    pub fn on_delete(mut self, action: OnDeleteAction) -> Self {
        self.on_delete_action = action;
        self
    }

    /// Returns the watermark for a direction.
    pub fn watermark(&self, direction: Direction) -> Option<DateTime<Utc>> {
        match direction {
            Direction::Forward => self.last_synced_forward,
            Direction::Backward => self.last_synced_backward,
        }
    }

    /// Sets the watermark for a direction.
    pub fn set_watermark(&mut self, direction: Direction, at: DateTime<Utc>) {
        match direction {
            Direction::Forward => self.last_synced_forward = Some(at),
            Direction::Backward => self.last_synced_backward = Some(at),
        }
    }

    /// Returns true if the configuration fires for records of `collection`.
    pub fn watches(&self, collection: &str) -> bool {
        self.source_collection == collection
            || (self.bidirectional && self.target_collection == collection)
    }

    /// Resolves the direction in which a record of `collection` is synced.
    pub fn direction_for(&self, collection: &str) -> SyncResult<Direction> {
        if self.source_collection == collection {
            Ok(Direction::Forward)
        } else if self.bidirectional && self.target_collection == collection {
            Ok(Direction::Backward)
        } else {
            Err(SyncError::InvalidDirection {
                configuration: self.name.clone(),
                collection: collection.to_string(),
            })
        }
    }

    /// Returns the mapping as seen from `direction`.
    ///
    /// Backward mappings swap every pair and every child table.
    pub fn directed(&self, direction: Direction) -> SyncResult<DirectedMapping<'_>> {
        let (source_collection, target_collection) = match direction {
            Direction::Forward => (&self.source_collection, &self.target_collection),
            Direction::Backward if self.bidirectional => {
                (&self.target_collection, &self.source_collection)
            }
            Direction::Backward => {
                return Err(SyncError::InvalidDirection {
                    configuration: self.name.clone(),
                    collection: self.target_collection.clone(),
                })
            }
        };
        let orient = |pairs: &[FieldPair]| -> Vec<FieldPair> {
            pairs
                .iter()
                .map(|p| match direction {
                    Direction::Forward => p.clone(),
                    Direction::Backward => p.swapped(),
                })
                .collect()
        };
        Ok(DirectedMapping {
            configuration: self,
            direction,
            source_collection,
            target_collection,
            identifiers: orient(&self.identifier_mapping),
            direct: orient(&self.direct_fields),
            children: self
                .child_mappings
                .iter()
                .map(|c| DirectedChild::new(c, direction))
                .collect(),
        })
    }
}

/// A child mapping oriented for one direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectedChild {
    /// Table read from.
    pub source_table: String,
    /// Table written to.
    pub target_table: String,
    /// Row field pairs, source to target.
    pub fields: Vec<FieldPair>,
    /// Key field on source rows.
    pub source_key: Option<String>,
    /// Key field on target rows.
    pub target_key: Option<String>,
}

impl DirectedChild {
    fn new(mapping: &ChildMapping, direction: Direction) -> Self {
        let counterpart = mapping.key_field.as_ref().map(|key| {
            mapping
                .fields
                .get(key)
                .cloned()
                .unwrap_or_else(|| key.clone())
        });
        let pairs = mapping
            .fields
            .iter()
            .map(|(s, t)| FieldPair::new(s.clone(), t.clone()));
        match direction {
            Direction::Forward => Self {
                source_table: mapping.source_table.clone(),
                target_table: mapping.target_table.clone(),
                fields: pairs.collect(),
                source_key: mapping.key_field.clone(),
                target_key: counterpart,
            },
            Direction::Backward => Self {
                source_table: mapping.target_table.clone(),
                target_table: mapping.source_table.clone(),
                fields: pairs.map(|p| p.swapped()).collect(),
                source_key: counterpart,
                target_key: mapping.key_field.clone(),
            },
        }
    }

    /// Transform key for a row field: `"<source_table>.<field>"`.
    pub fn transform_key(&self, field: &str) -> String {
        format!("{}.{field}", self.source_table)
    }
}

/// A configuration oriented for one direction.
#[derive(Debug, Clone)]
pub struct DirectedMapping<'a> {
    /// The underlying configuration.
    pub configuration: &'a SyncConfiguration,
    /// Orientation.
    pub direction: Direction,
    /// Collection read from.
    pub source_collection: &'a str,
    /// Collection written to.
    pub target_collection: &'a str,
    /// Identifier pairs, source to target.
    pub identifiers: Vec<FieldPair>,
    /// Direct field pairs, source to target.
    pub direct: Vec<FieldPair>,
    /// Child mappings, source to target.
    pub children: Vec<DirectedChild>,
}

impl DirectedMapping<'_> {
    /// Pairs tried by the matcher: identifiers, else the first direct field.
    pub fn match_candidates(&self) -> Vec<&FieldPair> {
        if self.identifiers.is_empty() {
            self.direct.iter().take(1).collect()
        } else {
            self.identifiers.iter().collect()
        }
    }

    /// Identifier pairs followed by direct pairs.
    pub fn all_pairs(&self) -> impl Iterator<Item = &FieldPair> {
        self.identifiers.iter().chain(self.direct.iter())
    }

    /// Registered transform for a source path.
    pub fn transform_for(&self, source_path: &str) -> Option<&str> {
        self.configuration
            .transforms
            .get(source_path)
            .map(String::as_str)
    }
}

/// Parsed form of a [`FieldPair`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPair {
    /// Source path.
    pub source: FieldPath,
    /// Target path.
    pub target: FieldPath,
}

impl ResolvedPair {
    /// Parses both sides of a pair.
    pub fn parse(pair: &FieldPair) -> SyncResult<Self> {
        Ok(Self {
            source: FieldPath::parse(&pair.source)?,
            target: FieldPath::parse(&pair.target)?,
        })
    }
}

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bulk runs with at most this many candidates execute inline.
    pub small_batch_threshold: usize,
    /// Default candidate limit for bulk runs.
    pub default_bulk_limit: usize,
    /// Lifetime of cached per-collection configuration lookups.
    pub config_cache_ttl: Duration,
    /// Lifetime of job progress entries.
    pub job_progress_ttl: Duration,
    /// Wall-clock limit for a background job.
    pub job_timeout: Duration,
    /// Queue name for background jobs.
    pub job_queue: String,
    /// User stamped on direct writes and sync logs.
    pub actor: String,
    /// Minimum gap between events for the same record, if limited.
    pub rate_limit: Option<Duration>,
    /// Whether loop-guard and disabled skips are written to the sync log.
    pub log_guard_skips: bool,
}

impl EngineConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            small_batch_threshold: 10,
            default_bulk_limit: 100,
            config_cache_ttl: Duration::from_secs(3600),
            job_progress_ttl: Duration::from_secs(86_400),
            job_timeout: Duration::from_secs(3600),
            job_queue: "long".into(),
            actor: "Administrator".into(),
            rate_limit: None,
            log_guard_skips: false,
        }
    }

    /// Sets the inline threshold for bulk runs.
    pub fn with_small_batch_threshold(mut self, threshold: usize) -> Self {
        self.small_batch_threshold = threshold;
        self
    }

    /// Sets the default bulk limit.
    pub fn with_default_bulk_limit(mut self, limit: usize) -> Self {
        self.default_bulk_limit = limit;
        self
    }

    /// Sets the configuration cache lifetime.
    pub fn with_config_cache_ttl(mut self, ttl: Duration) -> Self {
        self.config_cache_ttl = ttl;
        self
    }

    /// Sets the job progress lifetime.
    pub fn with_job_progress_ttl(mut self, ttl: Duration) -> Self {
        self.job_progress_ttl = ttl;
        self
    }

    /// Sets the background job timeout.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Sets the acting user.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    /// Enables the per-record rate limit.
    pub fn with_rate_limit(mut self, window: Duration) -> Self {
        self.rate_limit = Some(window);
        self
    }

    /// Logs loop-guard and disabled skips.
    pub fn with_guard_skip_logging(mut self, enabled: bool) -> Self {
        self.log_guard_skips = enabled;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
