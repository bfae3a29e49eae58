//! Bulk synchronization.
//!
//! A bulk run selects the records of one collection changed since the
//! direction's watermark, oldest first, and syncs them one by one. Small runs
//! execute inline; larger ones become a background job processed in batches,
//! with progress kept in the engine's progress cache and published on the
//! progress feed. The watermark advances only after a run in which at least
//! one record succeeded.

use crate::config::{Direction, SyncConfiguration};
use crate::context::SyncEvent;
use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};
use crate::executor::{SyncAction, SyncOutcome};
use crate::jobs::{JobProgress, JobSpec, JobStatus, ProgressKind};
use crate::log::{LogQuery, SyncStatus};
use crate::registry::panic_message;
use chrono::{DateTime, NaiveDate, Utc};
use livesync_store::{DirectStore, FieldCondition, Filter, Operator, Order, Query, Value};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, error, info, warn};

/// Records per batch for a job of `total` records.
///
/// Smaller jobs use smaller batches so progress is reported more often.
pub fn batch_size(total: usize) -> usize {
    match total {
        0..=50 => 5,
        51..=200 => 10,
        201..=1000 => 25,
        _ => 50,
    }
}

/// Records between progress updates for a job of `total` records.
pub fn progress_interval(total: usize) -> usize {
    (total / 20).clamp(1, 25)
}

const JOB_ID_SEPARATOR: &str = "::";

/// Escapes `%` and `:` so a component never contains the separator.
fn escape_component(part: &str) -> String {
    part.replace('%', "%25").replace(':', "%3A")
}

fn unescape_component(part: &str) -> String {
    part.replace("%3A", ":").replace("%25", "%")
}

/// Creates a job id: `<configuration>::<collection>::<YYYYMMDD>::<suffix>`.
///
/// `%` and `:` inside the configuration and collection names are
/// percent-escaped.
pub fn new_job_id(configuration: &str, collection: &str, at: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{configuration}{sep}{collection}{sep}{day}{sep}{suffix}",
        configuration = escape_component(configuration),
        collection = escape_component(collection),
        sep = JOB_ID_SEPARATOR,
        day = at.format("%Y%m%d"),
        suffix = &suffix[..8],
    )
}

/// Components encoded in a job id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobKey {
    /// Configuration name.
    pub configuration: String,
    /// Source collection.
    pub collection: String,
    /// Day the job was created.
    pub day: NaiveDate,
}

/// Parses a job id created by [`new_job_id`].
pub fn parse_job_id(job_id: &str) -> Option<JobKey> {
    let parts: Vec<&str> = job_id.split(JOB_ID_SEPARATOR).collect();
    let [configuration, collection, day, _suffix] = parts[..] else {
        return None;
    };
    let day = NaiveDate::parse_from_str(day, "%Y%m%d").ok()?;
    if collection.is_empty() || configuration.is_empty() {
        return None;
    }
    Some(JobKey {
        configuration: unescape_component(configuration),
        collection: unescape_component(collection),
        day,
    })
}

/// Parameters of a bulk run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkOptions {
    /// Collection synced from; defaults to the configuration's source.
    #[serde(default)]
    pub collection: Option<String>,
    /// Extra filters, combined with the delta filter.
    #[serde(default)]
    pub filters: Filter,
    /// Candidate limit; defaults to the engine's bulk limit.
    #[serde(default)]
    pub limit: Option<usize>,
    /// Use the fast path.
    #[serde(default)]
    pub fast_mode: bool,
}

impl BulkOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Syncs from `collection`.
    #[must_use]
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    /// Adds a filter condition.
    #[must_use]
    pub fn filter(mut self, condition: FieldCondition) -> Self {
        self.filters = self.filters.and(condition);
        self
    }

    /// Sets the candidate limit.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Selects the fast path.
    #[must_use]
    pub fn fast(mut self, fast_mode: bool) -> Self {
        self.fast_mode = fast_mode;
        self
    }
}

/// Outcome of one record in a bulk run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDetail {
    /// Source record.
    pub source: String,
    /// Status.
    pub status: SyncStatus,
    /// Summary or error message.
    pub message: String,
    /// Target record, if resolved.
    pub target: Option<String>,
}

/// Totals of a bulk run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkSummary {
    /// Records selected.
    pub total: usize,
    /// Records attempted.
    pub processed: usize,
    /// Successful attempts.
    pub succeeded: usize,
    /// Failed attempts.
    pub failed: usize,
    /// Targets created.
    pub created: usize,
    /// Targets updated.
    pub updated: usize,
    /// Records skipped.
    pub skipped: usize,
    /// Per-record outcomes, in processing order.
    pub details: Vec<RecordDetail>,
}

impl BulkSummary {
    fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    fn add(&mut self, outcome: &SyncOutcome) {
        self.processed += 1;
        match outcome.status {
            SyncStatus::Success => {
                self.succeeded += 1;
                match outcome.action {
                    Some(SyncAction::Insert) => self.created += 1,
                    Some(SyncAction::Update) => self.updated += 1,
                    _ => {}
                }
            }
            SyncStatus::Skipped => self.skipped += 1,
            SyncStatus::Error => self.failed += 1,
        }
        self.details.push(RecordDetail {
            source: outcome.source_name.clone(),
            status: outcome.status,
            message: outcome.message.clone(),
            target: outcome.target_name.clone(),
        });
    }

    fn add_failure(&mut self, source: &str, err: &SyncError) {
        self.processed += 1;
        self.failed += 1;
        self.details.push(RecordDetail {
            source: source.to_string(),
            status: SyncStatus::Error,
            message: err.to_string(),
            target: None,
        });
    }

    fn apply_to(&self, progress: &mut JobProgress) {
        progress.processed = self.processed;
        progress.succeeded = self.succeeded;
        progress.failed = self.failed;
        progress.created = self.created;
        progress.updated = self.updated;
        progress.skipped = self.skipped;
    }
}

/// Result of [`SyncEngine::trigger_bulk_sync`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkSyncResponse {
    /// False if the run could not start.
    pub success: bool,
    /// Summary.
    pub message: String,
    /// Background job id, when the run was queued.
    pub job_id: Option<String>,
    /// Records selected.
    pub total: usize,
    /// Results, when the run executed inline.
    pub results: Option<BulkSummary>,
}

impl BulkSyncResponse {
    fn failed(err: &SyncError) -> Self {
        Self {
            success: false,
            message: err.to_string(),
            job_id: None,
            total: 0,
            results: None,
        }
    }

    /// Returns true if the run was handed to the job queue.
    pub fn is_queued(&self) -> bool {
        self.job_id.is_some()
    }
}

/// Result of [`SyncEngine::get_job_status`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusResponse {
    /// False if the job is unknown.
    pub success: bool,
    /// Summary.
    pub message: String,
    /// Progress snapshot.
    pub progress: Option<JobProgress>,
    /// True if the snapshot was rebuilt from the sync log.
    pub reconstructed: bool,
}

/// Work carried by a background bulk job.
#[derive(Debug, Clone)]
struct BulkJob {
    job_id: String,
    configuration: String,
    collection: String,
    direction: Direction,
    records: Vec<String>,
    fast_mode: bool,
}

/// Query selecting candidates changed since the direction's watermark.
pub fn delta_query(
    config: &SyncConfiguration,
    direction: Direction,
    filters: Filter,
    limit: usize,
) -> Query {
    let mut filter = Filter::everything();
    if let Some(watermark) = config.watermark(direction) {
        filter = filter.and(FieldCondition::new(
            "modified",
            Operator::Gt,
            Value::from(watermark),
        ));
    }
    Query::new(filter.merge(filters))
        .order(Order::ModifiedAsc)
        .limit(limit)
}

impl<S: DirectStore + 'static> SyncEngine<S> {
    /// Syncs every record of a collection changed since the last bulk run.
    ///
    /// Runs with at most the small-batch threshold of candidates execute
    /// inline and return their results; larger runs are queued and return a
    /// job id.
    pub fn trigger_bulk_sync(&self, configuration: &str, options: BulkOptions) -> BulkSyncResponse {
        match self.try_bulk_sync(configuration, options) {
            Ok(response) => response,
            Err(err) => {
                warn!(configuration = %configuration, error = %err, "bulk sync failed to start");
                BulkSyncResponse::failed(&err)
            }
        }
    }

    fn try_bulk_sync(&self, name: &str, options: BulkOptions) -> SyncResult<BulkSyncResponse> {
        let inner = &self.inner;
        let config = self.enabled_configuration(name)?;
        let collection = options
            .collection
            .unwrap_or_else(|| config.source_collection.clone());
        let direction = config.direction_for(&collection)?;
        let limit = options.limit.unwrap_or(inner.config.default_bulk_limit);

        let query = delta_query(&config, direction, options.filters, limit);
        let records = inner.store.find(&collection, &query)?;
        let total = records.len();
        info!(
            configuration = %config.name,
            collection = %collection,
            direction = ?direction,
            candidates = total,
            fast = options.fast_mode,
            "bulk sync selected records"
        );

        if total <= inner.config.small_batch_threshold {
            let summary = self.process(&config, direction, &collection, &records, options.fast_mode, None)?;
            self.advance_watermark(&config, direction, &summary)?;
            return Ok(BulkSyncResponse {
                success: true,
                message: format!(
                    "processed {} records: {} succeeded, {} failed",
                    summary.processed, summary.succeeded, summary.failed
                ),
                job_id: None,
                total,
                results: Some(summary),
            });
        }

        let job_id = new_job_id(&config.name, &collection, Utc::now());
        inner.progress.insert(
            job_id.clone(),
            JobProgress::queued(&job_id, &config.name, &collection, direction, total),
        );
        let job = BulkJob {
            job_id: job_id.clone(),
            configuration: config.name.clone(),
            collection,
            direction,
            records,
            fast_mode: options.fast_mode,
        };
        let spec = JobSpec {
            job_id: job_id.clone(),
            queue: inner.config.job_queue.clone(),
            timeout: inner.config.job_timeout,
        };
        let engine = self.clone();
        inner
            .queue
            .enqueue(spec, Box::new(move || engine.run_job(job)))?;
        info!(configuration = %config.name, job_id = %job_id, total, "bulk sync queued");

        Ok(BulkSyncResponse {
            success: true,
            message: format!("queued {total} records as job {job_id}"),
            job_id: Some(job_id),
            total,
            results: None,
        })
    }

    /// Syncs `records` in batches, committing after each batch.
    ///
    /// With a job id, progress is published every few records.
    fn process(
        &self,
        config: &SyncConfiguration,
        direction: Direction,
        collection: &str,
        records: &[String],
        fast_mode: bool,
        job_id: Option<&str>,
    ) -> SyncResult<BulkSummary> {
        let store = &self.inner.store;
        let total = records.len();
        let interval = progress_interval(total);
        let mut summary = BulkSummary::new(total);

        for (n, batch) in records.chunks(batch_size(total)).enumerate() {
            debug!(configuration = %config.name, batch = n, size = batch.len(), "processing batch");
            for name in batch {
                match store.get(collection, name) {
                    Ok(record) => {
                        let outcome =
                            self.execute(config, &record, direction, SyncEvent::Bulk, fast_mode, job_id);
                        self.record_outcome(config, &outcome, job_id);
                        summary.add(&outcome);
                    }
                    Err(err) => {
                        let err = SyncError::from(err);
                        warn!(configuration = %config.name, record = %name, error = %err, "bulk candidate unreadable");
                        summary.add_failure(name, &err);
                    }
                }
                if let Some(job_id) = job_id {
                    if summary.processed % interval == 0 || summary.processed == total {
                        self.publish_progress(job_id, &summary, ProgressKind::Progress, |_| {});
                    }
                }
            }
            store.commit()?;
        }
        Ok(summary)
    }

    fn publish_progress(
        &self,
        job_id: &str,
        summary: &BulkSummary,
        kind: ProgressKind,
        finish: impl FnOnce(&mut JobProgress),
    ) {
        let inner = &self.inner;
        let key = job_id.to_string();
        let updated = inner.progress.update(&key, |progress| {
            summary.apply_to(progress);
            finish(progress);
        });
        if !updated {
            debug!(job_id = %job_id, "progress entry expired");
            return;
        }
        if let Some(progress) = inner.progress.get(&key) {
            inner.feed.emit(kind, progress);
        }
    }

    fn advance_watermark(
        &self,
        config: &SyncConfiguration,
        direction: Direction,
        summary: &BulkSummary,
    ) -> SyncResult<()> {
        if summary.succeeded == 0 {
            return Ok(());
        }
        let now = Utc::now();
        self.inner.configs.set_watermark(&config.name, direction, now)?;
        self.invalidate_lookup(config);
        debug!(configuration = %config.name, direction = ?direction, watermark = %now, "watermark advanced");
        Ok(())
    }

    fn run_job(&self, job: BulkJob) {
        let inner = &self.inner;
        inner.progress.update(&job.job_id, |p| {
            p.status = JobStatus::Running;
            p.started_at = Some(Utc::now());
        });

        let result = catch_unwind(AssertUnwindSafe(|| self.execute_job(&job)))
            .unwrap_or_else(|payload| {
                Err(SyncError::Queue(format!(
                    "job panicked: {}",
                    panic_message(payload.as_ref())
                )))
            });

        match result {
            Ok(summary) => {
                info!(
                    job_id = %job.job_id,
                    processed = summary.processed,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    "bulk job completed"
                );
                self.publish_progress(&job.job_id, &summary, ProgressKind::Completed, |p| {
                    p.status = JobStatus::Completed;
                    p.finished_at = Some(Utc::now());
                });
            }
            Err(err) => {
                error!(job_id = %job.job_id, error = %err, "bulk job errored");
                let message = err.to_string();
                let key = job.job_id.clone();
                inner.progress.update(&key, |p| {
                    p.status = JobStatus::Errored;
                    p.message = Some(message);
                    p.finished_at = Some(Utc::now());
                });
                if let Some(progress) = inner.progress.get(&key) {
                    inner.feed.emit(ProgressKind::Error, progress);
                }
            }
        }
    }

    fn execute_job(&self, job: &BulkJob) -> SyncResult<BulkSummary> {
        let config = self.enabled_configuration(&job.configuration)?;
        let summary = self.process(
            &config,
            job.direction,
            &job.collection,
            &job.records,
            job.fast_mode,
            Some(&job.job_id),
        )?;
        self.advance_watermark(&config, job.direction, &summary)?;
        Ok(summary)
    }

    /// Returns the progress of a bulk job.
    ///
    /// Jobs no longer in the progress cache are rebuilt from the sync log:
    /// entries tagged with the job id, or else every entry of the job's
    /// configuration, day and collection.
    pub fn get_job_status(&self, job_id: &str) -> JobStatusResponse {
        if let Some(progress) = self.inner.progress.get(&job_id.to_string()) {
            return JobStatusResponse {
                success: true,
                message: format!("{} ({:.0}%)", progress.status, progress.percent()),
                progress: Some(progress),
                reconstructed: false,
            };
        }
        match self.reconstruct_job(job_id) {
            Ok(progress) => JobStatusResponse {
                success: true,
                message: format!("{} (from sync log)", progress.status),
                progress: Some(progress),
                reconstructed: true,
            },
            Err(err) => JobStatusResponse {
                success: false,
                message: err.to_string(),
                progress: None,
                reconstructed: false,
            },
        }
    }

    fn reconstruct_job(&self, job_id: &str) -> SyncResult<JobProgress> {
        let key = parse_job_id(job_id).ok_or_else(|| SyncError::JobNotFound(job_id.to_string()))?;
        let logs = &self.inner.logs;
        let mut entries = logs.query(&LogQuery::for_job(job_id))?;
        if entries.is_empty() {
            entries = logs.query(&LogQuery {
                configuration: Some(key.configuration.clone()),
                source_collection: Some(key.collection.clone()),
                day: Some(key.day),
                ..LogQuery::default()
            })?;
        }
        let Some(first) = entries.first() else {
            return Err(SyncError::JobNotFound(job_id.to_string()));
        };

        let mut progress = JobProgress::queued(
            job_id,
            &key.configuration,
            &key.collection,
            first.direction,
            entries.len(),
        );
        for entry in &entries {
            progress.processed += 1;
            match entry.status {
                SyncStatus::Success => {
                    progress.succeeded += 1;
                    match entry.event.as_str() {
                        "Insert" => progress.created += 1,
                        "Update" => progress.updated += 1,
                        _ => {}
                    }
                }
                SyncStatus::Skipped => progress.skipped += 1,
                SyncStatus::Error => progress.failed += 1,
            }
        }
        progress.status = JobStatus::Completed;
        progress.started_at = entries.iter().map(|e| e.timestamp).min();
        progress.finished_at = entries.iter().map(|e| e.timestamp).max();
        Ok(progress)
    }
}
