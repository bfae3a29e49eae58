//! Delete policies, dry-run previews and hook tests.

use livesync_engine::{HookError, OnDeleteAction, SyncConfiguration, SyncStatus};
use livesync_store::{FieldCondition, RecordStore, Value};
use livesync_testkit::prelude::*;

fn with_delete(action: OnDeleteAction) -> TestHarness {
    let harness = TestHarness::new();
    let mut config = employee_user_config().on_delete(action);
    if action == OnDeleteAction::SetField {
        config.on_delete_field = Some("deleted_in_source".into());
    }
    harness.save(config);
    harness.create(employee("EMP-1", "Ada", "ada"));
    assert!(harness.find(USER, "ada").is_some());
    harness
}

#[test]
fn delete_policy_removes_target() {
    let harness = with_delete(OnDeleteAction::Delete);
    harness.store.delete(EMPLOYEE, "EMP-1").unwrap();

    assert!(harness.find(USER, "ada").is_none());
    let stats = harness.engine.stats();
    assert_eq!(stats.deleted, 1);
    // The user's own delete event finds nothing to delete back
    assert_eq!(stats.attempts_backward, 1);
    assert_eq!(harness.store.count(EMPLOYEE), 0);
}

#[test]
fn archive_policy_flags_target() {
    let harness = with_delete(OnDeleteAction::Archive);
    harness.store.delete(EMPLOYEE, "EMP-1").unwrap();

    let user = harness.find(USER, "ada").unwrap();
    assert_eq!(user.get("status"), Value::from("Archived"));
    assert_eq!(harness.engine.stats().archived, 1);
}

#[test]
fn set_field_policy_marks_target() {
    let harness = with_delete(OnDeleteAction::SetField);
    harness.store.delete(EMPLOYEE, "EMP-1").unwrap();

    let user = harness.find(USER, "ada").unwrap();
    assert_eq!(user.get("deleted_in_source"), Value::Integer(1));
    let last = harness.sync_logs().pop().unwrap();
    assert_eq!(last.status, SyncStatus::Success);
    assert_eq!(last.event, "Archive");
}

#[test]
fn default_policy_leaves_target() {
    let harness = with_delete(OnDeleteAction::None);
    harness.store.delete(EMPLOYEE, "EMP-1").unwrap();

    assert!(harness.find(USER, "ada").is_some());
    assert_eq!(harness.engine.stats().deleted, 0);
}

#[test]
fn set_field_requires_a_field() {
    let harness = TestHarness::new();
    let err = harness
        .engine
        .save_configuration(employee_user_config().on_delete(OnDeleteAction::SetField))
        .unwrap_err();
    assert!(err.to_string().contains("on_delete_field"));
}

#[test]
fn preview_writes_nothing() {
    let harness = TestHarness::new();
    harness.create(
        employee("EMP-1", "Ada", "ada")
            .with_field("personal_email", "ada@example.com")
            .with_row("education", education("MIT", "BSc", 1990)),
    );
    harness.save(employee_user_config());
    let commits = harness.store.commit_count();

    let response = harness
        .engine
        .test_sync(EMPLOYEE_USER, None, Some("EMP-1"));
    assert!(response.success, "{}", response.message);
    let preview = response.preview.unwrap();
    assert_eq!(preview.action, "Insert");
    assert!(preview.conditions_met);
    assert!(preview.target_name.is_none());

    let email = preview
        .field_mappings
        .iter()
        .find(|f| f.target_field == "email")
        .unwrap();
    assert_eq!(email.original_value, Value::from("ada@example.com"));
    assert_eq!(preview.child_mappings.len(), 1);
    let child = &preview.child_mappings[0];
    assert_eq!(child.source_count, 1);
    assert_eq!(child.target_count, 0);
    assert_eq!(
        child.sample.as_ref().unwrap().get("institution"),
        Some(&Value::from("MIT"))
    );

    assert_eq!(harness.store.count(USER), 0);
    assert_eq!(harness.store.commit_count(), commits);
    assert!(harness.sync_logs().is_empty());
}

#[test]
fn preview_shows_transforms_and_matches() {
    let harness = TestHarness::hr();
    harness.registry.register_transform("shout", |value, _source| {
        Ok(Value::from(value.to_string().to_uppercase()))
    });
    harness.create(employee("EMP-1", "Ada", "ada"));
    harness.save(
        SyncConfiguration {
            bidirectional: false,
            ..employee_user_config()
        }
        .transform("employee_name", "shout")
        .skip_if(FieldCondition::eq("status", "Left")),
    );

    // Latest record of the source collection
    let preview = harness
        .engine
        .test_sync(EMPLOYEE_USER, None, None)
        .preview
        .unwrap();
    assert_eq!(preview.source_name, "EMP-1");
    assert_eq!(preview.action, "Update");
    assert_eq!(preview.target_name.as_deref(), Some("ada"));
    let name = preview
        .field_mappings
        .iter()
        .find(|f| f.source_field == "employee_name")
        .unwrap();
    assert_eq!(name.original_value, Value::from("Ada"));
    assert_eq!(name.mapped_value, Value::from("ADA"));
    // Previews never write
    assert_eq!(
        harness.find(USER, "ada").unwrap().get("full_name"),
        Value::from("Ada")
    );
}

#[test]
fn preview_reports_condition_skips() {
    let harness = TestHarness::new();
    harness.create(employee("EMP-1", "Ada", "ada").with_field("status", "Left"));
    harness.save(employee_user_config().skip_if(FieldCondition::eq("status", "Left")));

    let preview = harness
        .engine
        .test_sync(EMPLOYEE_USER, Some(EMPLOYEE), Some("EMP-1"))
        .preview
        .unwrap();
    assert_eq!(preview.action, "Skip");
    assert!(!preview.conditions_met);
    assert!(preview.condition_reason.is_some());
}

#[test]
fn preview_failures_are_reported() {
    let harness = TestHarness::hr();
    let missing = harness.engine.test_sync(EMPLOYEE_USER, None, Some("EMP-404"));
    assert!(!missing.success);
    assert!(missing.preview.is_none());

    let empty = harness.engine.test_sync(EMPLOYEE_USER, None, None);
    assert!(!empty.success);
    assert!(empty.message.contains("no records"));

    let unknown = harness.engine.test_sync("nope", None, None);
    assert!(!unknown.success);
}

#[test]
fn hooks_share_context_and_choose_targets() {
    let harness = TestHarness::new();
    harness.registry.register_hook("stamp", |input, ctx| {
        ctx.insert("source", input.source.name_or_empty());
        Ok(())
    });
    harness.registry.register_name_hook("by_email", |input, _ctx| {
        Ok(input
            .source
            .get("personal_email")
            .as_text()
            .map(|email| email.split('@').next().unwrap_or_default().to_string()))
    });
    harness.registry.register_hook("check", |input, ctx| {
        let seen: Option<String> = ctx.get("source");
        if seen.as_deref() == Some(input.source.name_or_empty()) && input.target.is_some() {
            Ok(())
        } else {
            Err(HookError::new("context was not carried over"))
        }
    });

    let mut config = SyncConfiguration {
        bidirectional: false,
        ..employee_user_config()
    };
    config.hooks.before_sync = Some("stamp".into());
    config.hooks.sync_name = Some("by_email".into());
    config.hooks.after_sync = Some("check".into());
    harness.save(config);

    // Existing account whose name differs from user_id
    harness.create(
        livesync_store::Record::new(USER)
            .with_name("ada.l")
            .with_field("full_name", "Old Name"),
    );
    harness.create(
        employee("EMP-1", "Ada", "ada").with_field("personal_email", "ada.l@example.com"),
    );

    assert!(harness.find(USER, "ada").is_none());
    let user = harness.find(USER, "ada.l").unwrap();
    assert_eq!(user.get("full_name"), Value::from("Ada"));
    let log = harness.sync_logs().pop().unwrap();
    assert_eq!(log.status, SyncStatus::Success);
    assert!(log.details.is_none(), "{:?}", log.details);
}
