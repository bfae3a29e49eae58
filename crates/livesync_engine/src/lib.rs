//! # LiveSync Engine
//!
//! Configuration-driven, bidirectional record synchronization.
//!
//! This crate provides:
//! - Field-path resolution into parent fields and child-table rows
//! - Sync configurations with save-time validation
//! - Target matching by identifier fields
//! - Standard (validated) and fast (direct-write) executors
//! - Loop prevention for bidirectional syncs
//! - A sync log audit trail
//! - Bulk delta syncs with background jobs and progress reporting
//! - Dry-run previews
//!
//! ## Architecture
//!
//! The engine is wired into a record store as a lifecycle listener. Each
//! store event is dispatched to the configurations watching the record's
//! collection; each configuration runs one executor attempt:
//!
//! 1. Guard, conditions and event filter
//! 2. `before_sync` hook
//! 3. Target resolution (`sync_name` hook, identifier match, identity)
//! 4. Computed fields, field mappings, child-table reconciliation
//! 5. Persist (validated or direct), then `after_sync`
//!
//! ## Key Invariants
//!
//! - A null source value never overwrites a target value
//! - A record being written by a sync never triggers another sync
//! - Two enabled bidirectional configurations never form a 2-cycle
//! - A failing target write never fails the source write
//! - Per-record failures never stop a bulk run

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bulk;
mod cache;
mod config;
mod configs;
mod context;
mod engine;
mod error;
mod executor;
mod guard;
mod jobs;
mod log;
mod matcher;
mod path;
mod preview;
mod registry;
mod validate;

pub use bulk::{
    batch_size, delta_query, new_job_id, parse_job_id, progress_interval, BulkOptions,
    BulkSummary, BulkSyncResponse, JobKey, JobStatusResponse, RecordDetail,
};
pub use cache::TtlCache;
pub use config::{
    ChildMapping, ComputedField, Conditions, DirectedChild, DirectedMapping, Direction,
    EngineConfig, FieldPair, Hooks, LogLevel, OnDeleteAction, OnUpdateAction, ResolvedPair,
    SyncConfiguration,
};
pub use configs::{ConfigurationStore, MemoryConfigurationStore};
pub use context::{SyncContext, SyncEvent};
pub use engine::{
    EngineStats, SyncEngine, SyncEngineBuilder, SyncOneResponse, CONFIGURATION_COLLECTION,
    IGNORED_COLLECTIONS,
};
pub use error::{ErrorType, HookError, HookKind, SyncError, SyncResult};
pub use executor::{
    diff_rows, reconcile, Executor, RowPlan, SkipReason, SyncAction, SyncOutcome, SyncRequest,
};
pub use guard::{find_reverse_pair, InProgress};
pub use jobs::{
    DeferredJobQueue, InlineJobQueue, JobFn, JobProgress, JobQueue, JobSpec, JobStatus,
    ProgressEvent, ProgressFeed, ProgressKind, ThreadJobQueue, TokioJobQueue,
};
pub use log::{
    should_log, LogQuery, MemoryLogStore, RecordLogStore, SyncLog, SyncLogStore, SyncStatus,
    SYNC_LOG_COLLECTION,
};
pub use matcher::{find_target, MatchOutcome, MatchVia};
pub use path::{get as get_path, set as set_path, FieldPath};
pub use preview::{ChildPreview, ComputedPreview, FieldPreview, PreviewResponse, SyncPreview};
pub use registry::{ComputeFn, HookInput, HookRegistry, NameHook, SyncHook, TransformFn};
pub use validate::validate_configuration;
