//! Save-time configuration validation.

use crate::config::{OnDeleteAction, SyncConfiguration};
use crate::error::{HookKind, SyncError, SyncResult};
use crate::guard::find_reverse_pair;
use crate::path::FieldPath;
use crate::registry::HookRegistry;
use livesync_store::{RecordStore, Schema};

/// Validates a configuration before it is saved.
///
/// Every problem is collected; the returned [`SyncError::Configuration`]
/// lists them all.
pub fn validate_configuration<S: RecordStore + ?Sized>(
    config: &SyncConfiguration,
    store: &S,
    registry: &HookRegistry,
    existing: &[SyncConfiguration],
) -> SyncResult<()> {
    let mut issues = Vec::new();

    if config.name.trim().is_empty() {
        issues.push("configuration name is empty".to_string());
    }
    if config.bidirectional && config.source_collection == config.target_collection {
        issues.push(format!(
            "bidirectional sync from {} to itself would loop",
            config.source_collection
        ));
    }
    if let Some(other) = find_reverse_pair(config, existing) {
        issues.push(format!(
            "circular sync: {} already syncs {} and {} bidirectionally",
            other.name, other.source_collection, other.target_collection
        ));
    }
    if config.direct_fields.is_empty() {
        issues.push("at least one direct field mapping is required".to_string());
    }

    let source = schema_or_issue(store, &config.source_collection, &mut issues);
    let target = schema_or_issue(store, &config.target_collection, &mut issues);

    if let (Some(source), Some(target)) = (&source, &target) {
        for (kind, pairs) in [
            ("identifier", &config.identifier_mapping),
            ("direct field", &config.direct_fields),
        ] {
            for pair in pairs {
                check_path(store, source, &pair.source, kind, &mut issues);
                check_path(store, target, &pair.target, kind, &mut issues);
            }
        }
        for child in &config.child_mappings {
            let source_child = child_schema(store, source, &child.source_table, &mut issues);
            let target_child = child_schema(store, target, &child.target_table, &mut issues);
            if let (Some(sc), Some(tc)) = (source_child, target_child) {
                for (s, t) in &child.fields {
                    require_field(&sc, s, &child.source_table, &mut issues);
                    require_field(&tc, t, &child.target_table, &mut issues);
                }
                if let Some(key) = &child.key_field {
                    require_field(&sc, key, &child.source_table, &mut issues);
                }
            }
        }
        for condition in config.conditions.iter() {
            require_field(source, &condition.field, &source.collection, &mut issues);
        }
        for computed in &config.computed_fields {
            check_path(store, target, &computed.target_field, "computed field", &mut issues);
        }
        if config.on_delete_action == OnDeleteAction::SetField {
            match &config.on_delete_field {
                Some(field) => require_field(target, field, &target.collection, &mut issues),
                None => issues.push("on_delete_field is required for Set Field".to_string()),
            }
        }
    }

    let hooks = [&config.hooks.before_sync, &config.hooks.after_sync];
    for name in hooks.into_iter().flatten() {
        require_registered(registry, HookKind::Hook, name, &mut issues);
    }
    if let Some(name) = &config.hooks.sync_name {
        require_registered(registry, HookKind::NameHook, name, &mut issues);
    }
    for name in config.transforms.values() {
        require_registered(registry, HookKind::Transform, name, &mut issues);
    }
    for computed in &config.computed_fields {
        require_registered(registry, HookKind::Compute, &computed.compute, &mut issues);
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(SyncError::configuration(&config.name, issues))
    }
}

fn schema_or_issue<S: RecordStore + ?Sized>(
    store: &S,
    collection: &str,
    issues: &mut Vec<String>,
) -> Option<Schema> {
    match store.schema(collection) {
        Ok(schema) => Some(schema),
        Err(err) => {
            issues.push(format!("collection {collection}: {err}"));
            None
        }
    }
}

fn child_schema<S: RecordStore + ?Sized>(
    store: &S,
    parent: &Schema,
    table: &str,
    issues: &mut Vec<String>,
) -> Option<Schema> {
    match parent.child_collection(table) {
        Some(child) => schema_or_issue(store, child, issues),
        None => {
            issues.push(format!("{table} is not a child table of {}", parent.collection));
            None
        }
    }
}

fn check_path<S: RecordStore + ?Sized>(
    store: &S,
    schema: &Schema,
    path: &str,
    kind: &str,
    issues: &mut Vec<String>,
) {
    let parsed = match FieldPath::parse(path) {
        Ok(parsed) => parsed,
        Err(err) => {
            issues.push(format!("{kind}: {err}"));
            return;
        }
    };
    match &parsed.table {
        None => require_field(schema, &parsed.field, &schema.collection, issues),
        Some(table) => {
            if let Some(child) = child_schema(store, schema, table, issues) {
                require_field(&child, &parsed.field, table, issues);
            }
        }
    }
}

fn require_field(schema: &Schema, field: &str, owner: &str, issues: &mut Vec<String>) {
    if !schema.has_field(field) {
        issues.push(format!("field {field} does not exist in {owner}"));
    }
}

fn require_registered(
    registry: &HookRegistry,
    kind: HookKind,
    name: &str,
    issues: &mut Vec<String>,
) {
    if !registry.contains(kind, name) {
        issues.push(format!("unknown {kind}: {name}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChildMapping;
    use livesync_store::{FieldCondition, FieldKind, MemoryStore};

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
                .field("full_name", FieldKind::Data)
                .table("qualifications", "User Qualification"),
        );
        store.register_schema(
            Schema::new("User Qualification")
                .field("institution", FieldKind::Data)
                .field("year", FieldKind::Int),
        );
        store
    }

    fn issues(result: SyncResult<()>) -> Vec<String> {
        match result {
            Err(SyncError::Configuration { issues, .. }) => issues,
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn valid_configuration_passes() {
        let config = SyncConfiguration::new("emp-user", "Employee", "User")
            .identify_by("user_id", "name")
            .map("employee_name", "full_name")
            .map("education[1].school", "qualifications.institution")
            .child(
                ChildMapping::new("education", "qualifications")
                    .field("school", "institution")
                    .field("year", "year")
                    .keyed_by("school"),
            )
            .skip_if(FieldCondition::eq("status", "Left"));
        validate_configuration(&config, &store(), &HookRegistry::new(), &[]).unwrap();
    }

    #[test]
    fn every_problem_is_reported() {
        let config = SyncConfiguration::new("bad", "Employee", "User")
            .map("missing", "full_name")
            .map("education.grade", "qualifications.institution")
            .map("a.b.c", "full_name")
            .child(ChildMapping::new("education", "nope").field("school", "institution"))
            .transform("employee_name", "shout");
        let found = issues(validate_configuration(&config, &store(), &HookRegistry::new(), &[]));

        assert!(found.iter().any(|i| i.contains("field missing does not exist")));
        assert!(found.iter().any(|i| i.contains("field grade does not exist in education")));
        assert!(found.iter().any(|i| i.contains("at most one '.'")));
        assert!(found.iter().any(|i| i.contains("nope is not a child table")));
        assert!(found.iter().any(|i| i.contains("unknown transform: shout")));
    }

    #[test]
    fn self_loop_and_empty_mapping_rejected() {
        let config = SyncConfiguration::new("loop", "User", "User").bidirectional();
        let found = issues(validate_configuration(&config, &store(), &HookRegistry::new(), &[]));
        assert!(found.iter().any(|i| i.contains("to itself")));
        assert!(found.iter().any(|i| i.contains("at least one direct field")));
    }

    #[test]
    fn reverse_bidirectional_rejected() {
        let forward = SyncConfiguration::new("emp-user", "Employee", "User")
            .bidirectional()
            .map("employee_name", "full_name");
        let reverse = SyncConfiguration::new("user-emp", "User", "Employee")
            .bidirectional()
            .map("full_name", "employee_name");
        let found = issues(validate_configuration(
            &reverse,
            &store(),
            &HookRegistry::new(),
            &[forward],
        ));
        assert!(found.iter().any(|i| i.contains("circular sync: emp-user")));
    }

    #[test]
    fn unknown_collection_reported() {
        let config = SyncConfiguration::new("x", "Ghost", "User").map("a", "full_name");
        let found = issues(validate_configuration(&config, &store(), &HookRegistry::new(), &[]));
        assert!(found.iter().any(|i| i.contains("unknown collection: Ghost")));
    }
}
