//! Background jobs and their progress.
//!
//! Bulk runs too large to execute inline are handed to a [`JobQueue`]. The
//! running job reports through [`JobProgress`] snapshots, which are kept in
//! the engine's progress cache and published on a [`ProgressFeed`].
//!
//! # Usage
//!
//! ```rust,ignore
//! let receiver = engine.subscribe_progress();
//! std::thread::spawn(move || {
//!     while let Ok(event) = receiver.recv() {
//!         println!("{}: {:.0}%", event.progress.job_id, event.progress.percent());
//!     }
//! });
//! ```

use crate::config::Direction;
use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::{debug, error, warn};

/// Lifecycle state of a background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    /// Enqueued, not started.
    Queued,
    /// Processing batches.
    Running,
    /// Finished.
    Completed,
    /// Stopped by an unhandled failure.
    Errored,
}

impl JobStatus {
    /// Returns true once the job can make no further progress.
    pub fn is_finished(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Errored)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobStatus::Queued => "Queued",
            JobStatus::Running => "Running",
            JobStatus::Completed => "Completed",
            JobStatus::Errored => "Errored",
        })
    }
}

/// Progress snapshot of a bulk job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Job id.
    pub job_id: String,
    /// Configuration name.
    pub configuration: String,
    /// Collection synced from.
    pub source_collection: String,
    /// Direction.
    pub direction: Direction,
    /// Records selected.
    pub total: usize,
    /// Records attempted so far.
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
    /// Lifecycle state.
    pub status: JobStatus,
    /// Failure message, for errored jobs.
    #[serde(default)]
    pub message: Option<String>,
    /// When processing began.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the job finished.
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobProgress {
    /// Creates a queued snapshot.
    pub fn queued(
        job_id: impl Into<String>,
        configuration: impl Into<String>,
        source_collection: impl Into<String>,
        direction: Direction,
        total: usize,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            configuration: configuration.into(),
            source_collection: source_collection.into(),
            direction,
            total,
            processed: 0,
            succeeded: 0,
            failed: 0,
            created: 0,
            updated: 0,
            skipped: 0,
            status: JobStatus::Queued,
            message: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Completion percentage.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.processed as f64 * 100.0 / self.total as f64
    }
}

/// What a progress event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressKind {
    /// Intermediate update.
    Progress,
    /// Job completed.
    Completed,
    /// Job errored.
    Error,
}

/// A published progress update.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    /// Position in the feed.
    pub sequence: u64,
    /// Event kind.
    pub kind: ProgressKind,
    /// Snapshot at the time of the event.
    pub progress: JobProgress,
}

/// Distributes job progress events to subscribers.
///
/// Events are kept in a bounded history so late readers can catch up with
/// [`ProgressFeed::poll`].
pub struct ProgressFeed {
    subscribers: RwLock<Vec<Sender<ProgressEvent>>>,
    history: RwLock<Vec<ProgressEvent>>,
    max_history: usize,
}

impl ProgressFeed {
    /// Creates a feed.
    pub fn new() -> Self {
        Self::with_max_history(1000)
    }

    /// Creates a feed with a specific history limit.
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            max_history,
        }
    }

    /// Returns a receiver for every future event.
    pub fn subscribe(&self) -> Receiver<ProgressEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Publishes a snapshot.
    pub fn emit(&self, kind: ProgressKind, progress: JobProgress) {
        let event = {
            let mut history = self.history.write();
            let sequence = history.last().map_or(1, |e| e.sequence + 1);
            let event = ProgressEvent {
                sequence,
                kind,
                progress,
            };
            history.push(event.clone());
            if history.len() > self.max_history {
                let excess = history.len() - self.max_history;
                history.drain(0..excess);
            }
            event
        };

        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Returns events after `cursor`, up to `limit`.
    pub fn poll(&self, cursor: u64, limit: usize) -> Vec<ProgressEvent> {
        self.history
            .read()
            .iter()
            .filter(|e| e.sequence > cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns the events of one job still in history.
    pub fn history_for(&self, job_id: &str) -> Vec<ProgressEvent> {
        self.history
            .read()
            .iter()
            .filter(|e| e.progress.job_id == job_id)
            .cloned()
            .collect()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for ProgressFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProgressFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressFeed")
            .field("subscribers", &self.subscriber_count())
            .field("history", &self.history.read().len())
            .field("max_history", &self.max_history)
            .finish()
    }
}

/// Scheduling parameters of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    /// Job id.
    pub job_id: String,
    /// Queue name.
    pub queue: String,
    /// Wall-clock limit.
    pub timeout: Duration,
}

/// Work item run by a queue.
pub type JobFn = Box<dyn FnOnce() + Send + 'static>;

/// Runs background jobs.
pub trait JobQueue: Send + Sync {
    /// Schedules `job`. Must not wait for it to finish, except where the
    /// queue documents inline execution.
    fn enqueue(&self, spec: JobSpec, job: JobFn) -> SyncResult<()>;
}

/// Runs each job on the calling thread, before `enqueue` returns.
///
/// Suited to tests and one-shot tools; a bulk request using it waits for
/// the whole run.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineJobQueue;

impl JobQueue for InlineJobQueue {
    fn enqueue(&self, spec: JobSpec, job: JobFn) -> SyncResult<()> {
        debug!(job_id = %spec.job_id, queue = %spec.queue, "running job inline");
        job();
        Ok(())
    }
}

/// Collects jobs until [`DeferredJobQueue::run_pending`] is called.
#[derive(Default)]
pub struct DeferredJobQueue {
    pending: Mutex<Vec<(JobSpec, JobFn)>>,
}

impl DeferredJobQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs waiting.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Ids of the jobs waiting, in enqueue order.
    pub fn pending_ids(&self) -> Vec<String> {
        self.pending
            .lock()
            .iter()
            .map(|(spec, _)| spec.job_id.clone())
            .collect()
    }

    /// Runs every waiting job in enqueue order; returns how many ran.
    pub fn run_pending(&self) -> usize {
        let jobs = std::mem::take(&mut *self.pending.lock());
        let count = jobs.len();
        for (spec, job) in jobs {
            debug!(job_id = %spec.job_id, "running deferred job");
            job();
        }
        count
    }
}

impl fmt::Debug for DeferredJobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredJobQueue")
            .field("pending", &self.pending())
            .finish()
    }
}

impl JobQueue for DeferredJobQueue {
    fn enqueue(&self, spec: JobSpec, job: JobFn) -> SyncResult<()> {
        self.pending.lock().push((spec, job));
        Ok(())
    }
}

/// Runs jobs one at a time on a dedicated worker thread.
///
/// The worker exits once the queue is dropped and the jobs already sent
/// have run. Jobs cannot be abandoned, so an overrun is only logged.
#[derive(Debug)]
pub struct ThreadJobQueue {
    sender: Sender<(JobSpec, JobFn)>,
}

impl ThreadJobQueue {
    /// Starts the worker thread.
    pub fn spawn(name: &str) -> SyncResult<Self> {
        let (sender, receiver) = mpsc::channel::<(JobSpec, JobFn)>();
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for (spec, job) in receiver {
                    debug!(job_id = %spec.job_id, queue = %spec.queue, "job started");
                    let started = Instant::now();
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!(job_id = %spec.job_id, "job panicked");
                        continue;
                    }
                    let elapsed = started.elapsed();
                    if elapsed > spec.timeout {
                        warn!(
                            job_id = %spec.job_id,
                            elapsed_secs = elapsed.as_secs(),
                            timeout_secs = spec.timeout.as_secs(),
                            "job overran its timeout"
                        );
                    } else {
                        debug!(job_id = %spec.job_id, "job finished");
                    }
                }
            })
            .map_err(|e| SyncError::Queue(e.to_string()))?;
        Ok(Self { sender })
    }
}

impl JobQueue for ThreadJobQueue {
    fn enqueue(&self, spec: JobSpec, job: JobFn) -> SyncResult<()> {
        self.sender
            .send((spec, job))
            .map_err(|_| SyncError::Queue("job worker has stopped".into()))
    }
}

/// Runs jobs on a tokio runtime's blocking pool.
///
/// A job still running after its timeout is abandoned: the engine stops
/// waiting for it and its progress entry is left at the last update.
#[derive(Debug, Clone)]
pub struct TokioJobQueue {
    handle: Handle,
}

impl TokioJobQueue {
    /// Creates a queue on the given runtime.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Creates a queue on the runtime of the calling context.
    pub fn current() -> SyncResult<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| SyncError::Queue(e.to_string()))
    }
}

impl JobQueue for TokioJobQueue {
    fn enqueue(&self, spec: JobSpec, job: JobFn) -> SyncResult<()> {
        let JobSpec {
            job_id,
            queue,
            timeout,
        } = spec;
        self.handle.spawn(async move {
            debug!(job_id = %job_id, queue = %queue, "job started");
            let task = tokio::task::spawn_blocking(job);
            match tokio::time::timeout(timeout, task).await {
                Ok(Ok(())) => debug!(job_id = %job_id, "job finished"),
                Ok(Err(err)) => error!(job_id = %job_id, error = %err, "job failed"),
                Err(_) => warn!(
                    job_id = %job_id,
                    timeout_secs = timeout.as_secs(),
                    "job timed out and was abandoned"
                ),
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn spec(id: &str) -> JobSpec {
        JobSpec {
            job_id: id.into(),
            queue: "long".into(),
            timeout: Duration::from_secs(5),
        }
    }

    fn progress(id: &str) -> JobProgress {
        JobProgress::queued(id, "c", "Employee", Direction::Forward, 4)
    }

    #[test]
    fn feed_delivers_and_keeps_history() {
        let feed = ProgressFeed::with_max_history(2);
        let rx = feed.subscribe();
        feed.emit(ProgressKind::Progress, progress("a"));
        feed.emit(ProgressKind::Progress, progress("b"));
        feed.emit(ProgressKind::Completed, progress("a"));

        assert_eq!(rx.try_iter().count(), 3);
        let history = feed.poll(0, 10);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].sequence, 2);
        assert_eq!(feed.history_for("a").len(), 1);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let feed = ProgressFeed::new();
        drop(feed.subscribe());
        feed.emit(ProgressKind::Progress, progress("a"));
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[test]
    fn percent() {
        let mut p = progress("a");
        p.processed = 1;
        assert!((p.percent() - 25.0).abs() < f64::EPSILON);
        p.total = 0;
        assert!((p.percent() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn deferred_queue_waits() {
        let queue = DeferredJobQueue::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        queue
            .enqueue(
                spec("j1"),
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(queue.pending_ids(), vec!["j1".to_string()]);
        assert_eq!(queue.run_pending(), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn thread_queue_runs_jobs_off_the_caller() {
        let queue = ThreadJobQueue::spawn("jobs-test").unwrap();
        let (done_tx, done_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        queue
            .enqueue(
                spec("j1"),
                Box::new(move || {
                    release_rx.recv().unwrap();
                    done_tx.send(thread::current().name().map(str::to_string)).unwrap();
                }),
            )
            .unwrap();

        // enqueue returned while the job is still blocked
        assert!(done_rx.try_recv().is_err());
        release_tx.send(()).unwrap();
        let worker = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(worker.as_deref(), Some("jobs-test"));
    }

    #[test]
    fn thread_queue_survives_panicking_jobs() {
        let queue = ThreadJobQueue::spawn("jobs-panic").unwrap();
        queue.enqueue(spec("bad"), Box::new(|| panic!("boom"))).unwrap();
        let (tx, rx) = mpsc::channel();
        queue
            .enqueue(spec("good"), Box::new(move || tx.send(()).unwrap()))
            .unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn tokio_queue_runs_jobs() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let queue = TokioJobQueue::new(runtime.handle().clone());
        let (tx, rx) = mpsc::channel();
        queue
            .enqueue(
                spec("j1"),
                Box::new(move || {
                    tx.send(42).unwrap();
                }),
            )
            .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
    }

    #[test]
    fn tokio_queue_requires_runtime() {
        assert!(matches!(TokioJobQueue::current(), Err(SyncError::Queue(_))));
    }
}
