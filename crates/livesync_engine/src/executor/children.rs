//! Child-row reconciliation.
//!
//! [`reconcile`] computes the target table a sync should leave behind;
//! [`diff_rows`] turns a before/after pair of tables into the three direct
//! operations (delete, update, insert) the fast path applies.

use crate::config::DirectedChild;
use livesync_store::{ChildRow, RowUpdate, Value};
use std::collections::{BTreeMap, HashMap};

/// Builds the reconciled target table for one child mapping.
///
/// Rows are paired by key when the mapping has one (falling back to position
/// for source rows with a blank key), otherwise by position. Paired target
/// rows keep their identity and receive the mapped values; unpaired source
/// rows become new rows; unpaired target rows are dropped. The result follows
/// source row order. Null source values never overwrite a paired row's value.
pub fn reconcile(
    child: &DirectedChild,
    source_rows: &[ChildRow],
    target_rows: &[ChildRow],
    mut map_value: impl FnMut(&str, &Value) -> Value,
) -> Vec<ChildRow> {
    let pairing = pair_rows(child, source_rows, target_rows);
    source_rows
        .iter()
        .zip(pairing)
        .enumerate()
        .map(|(idx, (source, paired))| {
            let mut row = paired
                .map(|t| target_rows[t].clone())
                .unwrap_or_default();
            row.idx = idx;
            for pair in &child.fields {
                let value = source.get(&pair.source);
                if value.is_null() {
                    continue;
                }
                row.set(pair.target.clone(), map_value(&pair.source, &value));
            }
            row
        })
        .collect()
}

/// For each source row, the index of the paired target row.
fn pair_rows(
    child: &DirectedChild,
    source_rows: &[ChildRow],
    target_rows: &[ChildRow],
) -> Vec<Option<usize>> {
    let mut claimed = vec![false; target_rows.len()];
    let mut pairing = vec![None; source_rows.len()];

    if let (Some(source_key), Some(target_key)) = (&child.source_key, &child.target_key) {
        let mut by_key: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, row) in target_rows.iter().enumerate() {
            let key = row.get(target_key);
            if !key.is_blank() {
                by_key.entry(key.key_repr()).or_default().push(i);
            }
        }
        for (i, row) in source_rows.iter().enumerate() {
            let key = row.get(source_key);
            if key.is_blank() {
                continue;
            }
            if let Some(candidates) = by_key.get(&key.key_repr()) {
                if let Some(&t) = candidates.iter().find(|&&t| !claimed[t]) {
                    claimed[t] = true;
                    pairing[i] = Some(t);
                }
            }
        }
        for (i, row) in source_rows.iter().enumerate() {
            if row.get(source_key).is_blank() && i < target_rows.len() && !claimed[i] {
                claimed[i] = true;
                pairing[i] = Some(i);
            }
        }
    } else {
        for (i, slot) in pairing.iter_mut().enumerate() {
            if i < target_rows.len() {
                *slot = Some(i);
            }
        }
    }
    pairing
}

/// Direct operations turning one child table into another.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowPlan {
    /// Identities of rows to delete.
    pub delete: Vec<String>,
    /// Changed fields (and positions) of kept rows.
    pub update: Vec<RowUpdate>,
    /// New rows.
    pub insert: Vec<ChildRow>,
}

impl RowPlan {
    /// Returns true if nothing needs to change.
    pub fn is_empty(&self) -> bool {
        self.delete.is_empty() && self.update.is_empty() && self.insert.is_empty()
    }
}

/// Diffs a persisted table against its desired state.
///
/// Rows of `after` without an identity are inserts; rows of `before` whose
/// identity is absent from `after` are deletes; the rest are updates when a
/// field or the position changed.
pub fn diff_rows(before: &[ChildRow], after: &[ChildRow]) -> RowPlan {
    let existing: HashMap<&str, &ChildRow> = before
        .iter()
        .filter_map(|row| row.name.as_deref().map(|n| (n, row)))
        .collect();
    let mut plan = RowPlan::default();

    for row in after {
        match row.name.as_deref().and_then(|n| existing.get(n).map(|old| (n, *old))) {
            Some((name, old)) => {
                let changed: BTreeMap<String, Value> = row
                    .fields
                    .iter()
                    .filter(|(k, v)| old.fields.get(*k) != Some(*v))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                if !changed.is_empty() || old.idx != row.idx {
                    plan.update.push(RowUpdate {
                        name: name.to_string(),
                        idx: row.idx,
                        fields: changed,
                    });
                }
            }
            None => plan.insert.push(row.clone()),
        }
    }

    let kept: Vec<&str> = after.iter().filter_map(|r| r.name.as_deref()).collect();
    plan.delete = before
        .iter()
        .filter_map(|row| row.name.as_deref())
        .filter(|name| !kept.contains(name))
        .map(str::to_string)
        .collect();
    plan
}
