//! Field mapping onto an in-memory target.

use super::children::reconcile;
use crate::config::{DirectedMapping, ResolvedPair};
use crate::context::SyncContext;
use crate::error::SyncResult;
use crate::path::FieldPath;
use crate::registry::HookRegistry;
use livesync_store::{Record, Value};
use tracing::warn;

/// Applies the transform registered for `source_path`, if any.
///
/// A failing or unknown transform is noted on the context and the
/// untransformed value is returned.
pub(crate) fn transformed(
    registry: &HookRegistry,
    mapping: &DirectedMapping<'_>,
    source_path: &str,
    value: &Value,
    source: &Record,
    ctx: Option<&mut SyncContext>,
) -> Value {
    let Some(name) = mapping.transform_for(source_path) else {
        return value.clone();
    };
    match registry.apply_transform(name, source_path, value, source) {
        Ok(out) => out,
        Err(err) => {
            warn!(
                configuration = %mapping.configuration.name,
                field = %source_path,
                error = %err,
                "transform failed, using original value"
            );
            if let Some(ctx) = ctx {
                ctx.note_list("transform_errors", err.to_string());
            }
            value.clone()
        }
    }
}

/// Writes computed target fields.
pub(crate) fn apply_computed(
    registry: &HookRegistry,
    mapping: &DirectedMapping<'_>,
    source: &Record,
    target: &mut Record,
    ctx: &mut SyncContext,
) -> SyncResult<()> {
    for computed in &mapping.configuration.computed_fields {
        let path = FieldPath::parse(&computed.target_field)?;
        match registry.evaluate(&computed.compute, source) {
            Ok(value) if value.is_null() => {}
            Ok(value) => {
                path.set(target, value);
            }
            Err(err) => {
                warn!(
                    configuration = %mapping.configuration.name,
                    field = %computed.target_field,
                    error = %err,
                    "computed field failed"
                );
                ctx.note_list("hook_errors", err.to_string());
            }
        }
    }
    Ok(())
}

/// Applies identifier and direct field mappings.
///
/// Parent targets are written first, child-table targets second, so tables
/// exist before they are indexed into. Null source values are skipped.
pub(crate) fn apply_fields(
    registry: &HookRegistry,
    mapping: &DirectedMapping<'_>,
    source: &Record,
    target: &mut Record,
    ctx: &mut SyncContext,
) -> SyncResult<()> {
    let pairs = mapping
        .all_pairs()
        .map(ResolvedPair::parse)
        .collect::<SyncResult<Vec<_>>>()?;

    let (parent, nested): (Vec<_>, Vec<_>) =
        pairs.iter().partition(|p| !p.target.is_hierarchical());
    for pair in parent.into_iter().chain(nested) {
        let value = pair.source.get(source);
        if value.is_null() {
            continue;
        }
        let key = pair.source.to_string();
        let value = transformed(registry, mapping, &key, &value, source, Some(&mut *ctx));
        pair.target.set(target, value);
    }
    Ok(())
}

/// Reconciles every child mapping onto `target`.
pub(crate) fn apply_children(
    registry: &HookRegistry,
    mapping: &DirectedMapping<'_>,
    source: &Record,
    target: &mut Record,
    ctx: &mut SyncContext,
) {
    for child in &mapping.children {
        let rows = reconcile(
            child,
            source.table(&child.source_table),
            target.table(&child.target_table),
            |field, value| {
                let key = child.transform_key(field);
                transformed(registry, mapping, &key, value, source, Some(&mut *ctx))
            },
        );
        *target.table_mut(&child.target_table) = rows;
    }
}
