//! Sync command implementation.

use crate::workspace::Workspace;
use livesync_engine::{BulkOptions, BulkSyncResponse, EngineStats, JobStatusResponse, SyncLog};
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// What to sync.
#[derive(Debug, Clone, Default)]
pub struct SyncArgs {
    /// Configuration name.
    pub configuration: String,
    /// Collection synced from; defaults to the configuration's source.
    pub collection: Option<String>,
    /// Sync only this record.
    pub record: Option<String>,
    /// Candidate limit for bulk runs.
    pub limit: Option<usize>,
    /// Use the fast path.
    pub fast: bool,
    /// Write the resulting workspace here.
    pub output: Option<std::path::PathBuf>,
}

/// Combined result of a sync run.
#[derive(Debug, Serialize)]
pub struct SyncReport {
    /// Bulk response, for bulk runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bulk: Option<BulkSyncResponse>,
    /// Final job status, for queued bulk runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<JobStatusResponse>,
    /// Single-record response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<livesync_engine::SyncOneResponse>,
    /// Engine counters.
    pub stats: EngineStats,
    /// Sync log entries written.
    pub logs: Vec<SyncLog>,
}

impl SyncReport {
    fn succeeded(&self) -> bool {
        let bulk = self.bulk.as_ref().map_or(true, |b| b.success);
        let job = self.job.as_ref().map_or(true, |j| j.success);
        let record = self.record.as_ref().map_or(true, |r| r.success);
        bulk && job && record
    }
}

/// Runs a sync over a loaded workspace.
pub fn execute(workspace: &Workspace, args: &SyncArgs) -> SyncReport {
    let engine = &workspace.engine;
    let mut report = SyncReport {
        bulk: None,
        job: None,
        record: None,
        stats: EngineStats::default(),
        logs: Vec::new(),
    };

    match &args.record {
        Some(record) => {
            let collection = args.collection.clone().unwrap_or_else(|| {
                engine
                    .configurations()
                    .get(&args.configuration)
                    .map(|c| c.source_collection)
                    .unwrap_or_default()
            });
            report.record = Some(engine.sync_one(&args.configuration, &collection, record, args.fast));
        }
        None => {
            let mut options = BulkOptions::new().fast(args.fast);
            if let Some(collection) = &args.collection {
                options = options.collection(collection.clone());
            }
            if let Some(limit) = args.limit {
                options = options.limit(limit);
            }
            let response = engine.trigger_bulk_sync(&args.configuration, options);
            if let Some(job_id) = &response.job_id {
                info!(job_id = %job_id, "bulk sync ran as a job");
                report.job = Some(engine.get_job_status(job_id));
            }
            report.bulk = Some(response);
        }
    }

    report.stats = engine.stats();
    report.logs = workspace.sync_logs();
    report
}

/// Runs the sync command.
pub fn run(path: &Path, args: &SyncArgs) -> Result<(), Box<dyn std::error::Error>> {
    let workspace = Workspace::load(path, false)?;
    let report = execute(&workspace, args);
    super::print_json(&report)?;

    if let Some(output) = &args.output {
        workspace.snapshot()?.write(output)?;
        info!(path = %output.display(), "workspace written");
    }
    if report.succeeded() {
        Ok(())
    } else {
        Err("sync failed".into())
    }
}
