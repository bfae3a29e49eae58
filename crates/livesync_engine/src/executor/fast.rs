//! Persistence through direct store writes.
//!
//! Validation and lifecycle events are bypassed, so system fields are
//! stamped here and child tables are written as explicit delete, update and
//! insert batches.

use super::children::diff_rows;
use super::SyncAction;
use crate::error::SyncResult;
use chrono::Utc;
use livesync_store::{DirectStore, DocStatus, Record, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

fn new_name() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn name_new_rows(record: &mut Record) {
    for rows in record.children.values_mut() {
        for (idx, row) in rows.iter_mut().enumerate() {
            row.idx = idx;
            if row.name.is_none() {
                row.name = Some(new_name());
            }
        }
    }
}

/// Writes `target` directly.
///
/// `before` is the persisted state the target was loaded from; for existing
/// targets only the difference is written.
pub(crate) fn persist<S: DirectStore + ?Sized>(
    store: &S,
    actor: &str,
    before: &Record,
    target: &mut Record,
    is_new: bool,
) -> SyncResult<SyncAction> {
    let now = Utc::now();

    if is_new {
        if target.name.is_none() {
            target.name = Some(new_name());
        }
        target.meta.stamp_new(now, actor);
        target.meta.docstatus = DocStatus::Draft;
        name_new_rows(target);
        store.raw_insert(target)?;
        return Ok(SyncAction::Insert);
    }

    let collection = target.collection.clone();
    let name = target.name_or_empty().to_string();

    let changed: BTreeMap<String, Value> = target
        .fields
        .iter()
        .filter(|(k, v)| before.fields.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if !changed.is_empty() {
        store.raw_set_values(&collection, &name, &changed)?;
    }

    let tables: BTreeSet<String> = before
        .children
        .keys()
        .chain(target.children.keys())
        .cloned()
        .collect();
    for table in tables {
        target.reindex(&table);
        let mut plan = diff_rows(before.table(&table), target.table(&table));
        if plan.is_empty() {
            continue;
        }
        for row in &mut plan.insert {
            row.name = Some(new_name());
        }
        debug!(
            table = %table,
            delete = plan.delete.len(),
            update = plan.update.len(),
            insert = plan.insert.len(),
            "applying child row plan"
        );
        if !plan.delete.is_empty() {
            store.raw_delete_rows(&collection, &name, &table, &plan.delete)?;
        }
        if !plan.update.is_empty() {
            store.raw_update_rows(&collection, &name, &table, &plan.update)?;
        }
        if !plan.insert.is_empty() {
            store.raw_insert_rows(&collection, &name, &table, &plan.insert)?;
        }

        let mut inserted = plan.insert.into_iter();
        for row in target.table_mut(&table).iter_mut().filter(|r| r.name.is_none()) {
            row.name = inserted.next().and_then(|r| r.name);
        }
    }

    store.raw_touch(&collection, &name, now, actor)?;
    target.meta.stamp_modified(now, actor);
    Ok(SyncAction::Update)
}
