//! Bulk sync, background jobs and job status tests.

use livesync_engine::{
    parse_job_id, BulkOptions, EngineConfig, JobStatus, ProgressKind, SyncEngine, SyncStatus,
    TokioJobQueue,
};
use livesync_store::{FieldCondition, Value};
use livesync_testkit::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn hire(harness: &TestHarness, count: usize) {
    for i in 0..count {
        harness.create(employee(
            &format!("EMP-{i:03}"),
            &format!("Employee {i}"),
            &format!("user{i}"),
        ));
    }
}

#[test]
fn small_runs_execute_inline() {
    let harness = TestHarness::new();
    hire(&harness, 3);
    harness.save(employee_user_config());

    let response = harness.engine.trigger_bulk_sync(EMPLOYEE_USER, BulkOptions::new());
    assert!(response.success, "{}", response.message);
    assert!(!response.is_queued());
    assert_eq!(response.total, 3);
    let summary = response.results.unwrap();
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.created, 3);
    assert_eq!(summary.details.len(), 3);
    assert_eq!(summary.details[0].source, "EMP-000");
    assert_eq!(summary.details[0].target.as_deref(), Some("user0"));
    assert_eq!(harness.store.count(USER), 3);
    assert_eq!(harness.queue.pending(), 0);
}

#[test]
fn watermark_limits_later_runs_to_changes() {
    let harness = TestHarness::new();
    hire(&harness, 3);
    harness.save(employee_user_config());

    let first = harness.engine.trigger_bulk_sync(EMPLOYEE_USER, BulkOptions::new());
    assert_eq!(first.total, 3);
    let config = harness.engine.configurations().get(EMPLOYEE_USER).unwrap();
    assert!(config.last_synced_forward.is_some());
    assert!(config.last_synced_backward.is_none());

    let second = harness.engine.trigger_bulk_sync(EMPLOYEE_USER, BulkOptions::new());
    assert!(second.success);
    assert_eq!(second.total, 0);

    thread::sleep(Duration::from_millis(5));
    let mut changed = harness.find(EMPLOYEE, "EMP-001").unwrap();
    changed.set("employee_name", Value::from("Renamed"));
    harness.update(&mut changed);

    let third = harness.engine.trigger_bulk_sync(EMPLOYEE_USER, BulkOptions::new());
    assert_eq!(third.total, 1);
    assert_eq!(third.results.unwrap().details[0].source, "EMP-001");
}

#[test]
fn runs_without_successes_keep_the_watermark() {
    let harness = TestHarness::new();
    hire(&harness, 2);
    harness.save(employee_user_config().only_if(FieldCondition::eq("status", "Left")));

    let response = harness.engine.trigger_bulk_sync(EMPLOYEE_USER, BulkOptions::new());
    assert_eq!(response.results.unwrap().skipped, 2);
    let config = harness.engine.configurations().get(EMPLOYEE_USER).unwrap();
    assert!(config.last_synced_forward.is_none());
}

#[test]
fn filters_and_limits_narrow_the_selection() {
    let harness = TestHarness::new();
    hire(&harness, 4);
    let mut left = harness.find(EMPLOYEE, "EMP-002").unwrap();
    left.set("status", Value::from("Left"));
    harness.update(&mut left);
    harness.save(employee_user_config());

    let options = BulkOptions::new().filter(FieldCondition::eq("status", "Active")).limit(2);
    let response = harness.engine.trigger_bulk_sync(EMPLOYEE_USER, options);
    assert_eq!(response.total, 2);
    let sources: Vec<String> = response
        .results
        .unwrap()
        .details
        .into_iter()
        .map(|d| d.source)
        .collect();
    assert_eq!(sources, vec!["EMP-000", "EMP-001"]);
}

#[test]
fn backward_bulk_runs_from_the_target_collection() {
    let harness = TestHarness::hr();
    hire(&harness, 2);

    let response = harness
        .engine
        .trigger_bulk_sync(EMPLOYEE_USER, BulkOptions::new().collection(USER));
    assert!(response.success, "{}", response.message);
    assert_eq!(response.total, 2);
    assert_eq!(response.results.unwrap().updated, 2);
    let config = harness.engine.configurations().get(EMPLOYEE_USER).unwrap();
    assert!(config.last_synced_backward.is_some());
    assert!(config.last_synced_forward.is_none());
}

#[test]
fn one_bad_record_does_not_stop_the_run() {
    let harness = TestHarness::new();
    hire(&harness, 3);
    harness.store.add_validator(USER, |user| {
        if user.get("full_name") == Value::from("Employee 1") {
            Err("rejected".into())
        } else {
            Ok(())
        }
    });
    harness.save(employee_user_config());

    let summary = harness
        .engine
        .trigger_bulk_sync(EMPLOYEE_USER, BulkOptions::new().fast(false))
        .results
        .unwrap();
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.details[1].status, SyncStatus::Error);
    assert!(summary.details[1].message.contains("rejected"));
}

#[test]
fn large_runs_become_jobs() {
    let harness = TestHarness::new();
    hire(&harness, 12);
    harness.save(employee_user_config());
    let events = harness.engine.subscribe_progress();
    let commits_before = harness.store.commit_count();

    let response = harness.engine.trigger_bulk_sync(EMPLOYEE_USER, BulkOptions::new());
    assert!(response.is_queued());
    assert_eq!(response.total, 12);
    assert!(response.results.is_none());
    let job_id = response.job_id.unwrap();
    assert_eq!(parse_job_id(&job_id).unwrap().collection, EMPLOYEE);
    assert_eq!(harness.queue.pending_ids(), vec![job_id.clone()]);

    let queued = harness.engine.get_job_status(&job_id);
    assert!(queued.success);
    assert!(!queued.reconstructed);
    assert_eq!(queued.progress.unwrap().status, JobStatus::Queued);

    assert_eq!(harness.queue.run_pending(), 1);

    let done = harness.engine.get_job_status(&job_id).progress.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.processed, 12);
    assert_eq!(done.created, 12);
    assert!(done.finished_at.is_some());
    assert!((done.percent() - 100.0).abs() < f64::EPSILON);

    // Batches of five: 5 + 5 + 2
    assert_eq!(harness.store.commit_count() - commits_before, 3);

    let received: Vec<_> = events.try_iter().collect();
    assert_eq!(received.len(), 13);
    assert!(received[..12].iter().all(|e| e.kind == ProgressKind::Progress));
    assert_eq!(received[0].progress.processed, 1);
    assert_eq!(received[12].kind, ProgressKind::Completed);
    assert_eq!(harness.engine.progress_feed().history_for(&job_id).len(), 13);

    // Every attempt is tagged with the job
    let tagged = harness
        .sync_logs()
        .into_iter()
        .filter(|log| log.job_id.as_deref() == Some(job_id.as_str()))
        .count();
    assert_eq!(tagged, 12);
}

#[test]
fn jobs_whose_configuration_was_disabled_error() {
    let harness = TestHarness::new();
    hire(&harness, 11);
    harness.save(employee_user_config());

    let job_id = harness
        .engine
        .trigger_bulk_sync(EMPLOYEE_USER, BulkOptions::new())
        .job_id
        .unwrap();
    harness.save(livesync_engine::SyncConfiguration {
        enabled: false,
        ..employee_user_config()
    });
    harness.queue.run_pending();

    let progress = harness.engine.get_job_status(&job_id).progress.unwrap();
    assert_eq!(progress.status, JobStatus::Errored);
    assert!(progress.message.unwrap().contains("disabled"));
    let history = harness.engine.progress_feed().history_for(&job_id);
    assert_eq!(history.last().unwrap().kind, ProgressKind::Error);
}

#[test]
fn expired_jobs_are_rebuilt_from_the_sync_log() {
    let harness = TestHarness::with_config(EngineConfig::default().with_job_progress_ttl(Duration::ZERO));
    hire(&harness, 11);
    harness.save(employee_user_config());

    let job_id = harness
        .engine
        .trigger_bulk_sync(EMPLOYEE_USER, BulkOptions::new())
        .job_id
        .unwrap();
    harness.queue.run_pending();

    let status = harness.engine.get_job_status(&job_id);
    assert!(status.success, "{}", status.message);
    assert!(status.reconstructed);
    let progress = status.progress.unwrap();
    assert_eq!(progress.status, JobStatus::Completed);
    assert_eq!(progress.total, 11);
    assert_eq!(progress.succeeded, 11);
    assert_eq!(progress.created, 11);
    assert!(progress.started_at <= progress.finished_at);
}

#[test]
fn unknown_jobs_are_reported() {
    let harness = TestHarness::hr();
    let status = harness.engine.get_job_status("no-such-job");
    assert!(!status.success);
    assert!(status.progress.is_none());

    let status = harness
        .engine
        .get_job_status("Employee-User::Employee::20200101::deadbeef");
    assert!(!status.success);
}

#[test]
fn tokio_queue_runs_jobs_in_the_background() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let store = Arc::new(hr_store());
    let engine = SyncEngine::builder(Arc::clone(&store))
        .job_queue(Arc::new(TokioJobQueue::new(runtime.handle().clone())))
        .build();
    engine.save_configuration(employee_user_config()).unwrap();
    for i in 0..15 {
        let mut record = employee(&format!("EMP-{i}"), "Someone", &format!("user{i}"));
        livesync_store::RecordStore::create(store.as_ref(), &mut record).unwrap();
    }
    let events = engine.subscribe_progress();

    let job_id = engine
        .trigger_bulk_sync(EMPLOYEE_USER, BulkOptions::new().fast(true))
        .job_id
        .unwrap();

    let finished = loop {
        let event = events.recv_timeout(Duration::from_secs(10)).unwrap();
        if event.kind != ProgressKind::Progress {
            break event;
        }
    };
    assert_eq!(finished.kind, ProgressKind::Completed);
    assert_eq!(finished.progress.job_id, job_id);
    assert_eq!(finished.progress.created, 15);
    assert_eq!(store.count(USER), 15);
}

#[test]
fn default_engine_returns_before_the_job_finishes() {
    let store = Arc::new(hr_store());
    let engine = SyncEngine::new(Arc::clone(&store));
    let released = Arc::new(AtomicBool::new(false));
    let gate = Arc::clone(&released);
    engine.registry().register_hook("gate", move |_, _| {
        while !gate.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    });
    let mut config = employee_user_config();
    config.hooks.before_sync = Some("gate".into());
    engine.save_configuration(config).unwrap();
    for i in 0..11 {
        let mut record = employee(&format!("EMP-{i}"), "Someone", &format!("user{i}"));
        livesync_store::RecordStore::create(store.as_ref(), &mut record).unwrap();
    }
    let events = engine.subscribe_progress();

    let response = engine.trigger_bulk_sync(EMPLOYEE_USER, BulkOptions::new());
    let job_id = response.job_id.unwrap();
    let status = engine.get_job_status(&job_id).progress.unwrap().status;
    assert!(matches!(status, JobStatus::Queued | JobStatus::Running), "{status}");
    assert_eq!(store.count(USER), 0);

    released.store(true, Ordering::SeqCst);
    let finished = loop {
        let event = events.recv_timeout(Duration::from_secs(10)).unwrap();
        if event.kind != ProgressKind::Progress {
            break event;
        }
    };
    assert_eq!(finished.kind, ProgressKind::Completed);
    assert_eq!(finished.progress.job_id, job_id);
    assert_eq!(store.count(USER), 11);
}
