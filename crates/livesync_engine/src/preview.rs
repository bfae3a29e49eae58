//! Dry-run previews.

use crate::config::{DirectedMapping, Direction, ResolvedPair};
use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};
use crate::executor::mapping::transformed;
use crate::matcher::find_target;
use livesync_store::{DirectStore, Filter, Order, Query, Record, StoreError, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One field mapping as it would be applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldPreview {
    /// Source path.
    pub source_field: String,
    /// Target path.
    pub target_field: String,
    /// Value read from the source.
    pub original_value: Value,
    /// Value after the transform, if any.
    pub mapped_value: Value,
}

/// One computed field as it would be applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedPreview {
    /// Target path.
    pub target_field: String,
    /// Computed value, if evaluation succeeded.
    pub value: Option<Value>,
    /// Evaluation error.
    pub error: Option<String>,
}

/// One child table mapping as it would be applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildPreview {
    /// Table read from.
    pub source_table: String,
    /// Table written to.
    pub target_table: String,
    /// Rows on the source.
    pub source_count: usize,
    /// Rows on the matched target, if any.
    pub target_count: usize,
    /// First source row, mapped to target fields.
    pub sample: Option<BTreeMap<String, Value>>,
}

/// Dry-run result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPreview {
    /// Configuration name.
    pub configuration: String,
    /// Direction.
    pub direction: Direction,
    /// Source collection.
    pub source_collection: String,
    /// Previewed record.
    pub source_name: String,
    /// Target collection.
    pub target_collection: String,
    /// Whether skip / only-if conditions let the record through.
    pub conditions_met: bool,
    /// Why the conditions rejected the record.
    pub condition_reason: Option<String>,
    /// Identifier and direct field mappings.
    pub field_mappings: Vec<FieldPreview>,
    /// Computed fields.
    pub computed_fields: Vec<ComputedPreview>,
    /// Child table mappings.
    pub child_mappings: Vec<ChildPreview>,
    /// Matched target, if any.
    pub target_name: Option<String>,
    /// `Insert`, `Update` or `Skip`.
    pub action: String,
}

/// Result of [`SyncEngine::test_sync`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewResponse {
    /// False if the preview could not be built.
    pub success: bool,
    /// Summary.
    pub message: String,
    /// The preview.
    pub preview: Option<SyncPreview>,
}

impl<S: DirectStore + 'static> SyncEngine<S> {
    /// Shows what syncing a record would do, without writing anything.
    ///
    /// Without a `record_id` the most recently modified record of the
    /// collection is used. Lifecycle hooks are not run.
    pub fn test_sync(
        &self,
        configuration: &str,
        collection: Option<&str>,
        record_id: Option<&str>,
    ) -> PreviewResponse {
        match self.preview(configuration, collection, record_id) {
            Ok(preview) => PreviewResponse {
                success: true,
                message: format!(
                    "{} {} -> {} ({})",
                    preview.source_collection,
                    preview.source_name,
                    preview.target_collection,
                    preview.action
                ),
                preview: Some(preview),
            },
            Err(err) => PreviewResponse {
                success: false,
                message: err.to_string(),
                preview: None,
            },
        }
    }

    fn preview(
        &self,
        name: &str,
        collection: Option<&str>,
        record_id: Option<&str>,
    ) -> SyncResult<SyncPreview> {
        let inner = &self.inner;
        let config = inner.configs.get(name)?;
        let collection = collection.unwrap_or(&config.source_collection);
        let direction = config.direction_for(collection)?;
        let mapping = config.directed(direction)?;
        let store = inner.store.as_ref();

        let record = match record_id {
            Some(id) => store.get(collection, id)?,
            None => {
                let latest = Query::new(Filter::everything())
                    .order(Order::ModifiedDesc)
                    .limit(1);
                let id = store
                    .find(collection, &latest)?
                    .into_iter()
                    .next()
                    .ok_or_else(|| {
                        SyncError::Store(StoreError::InvalidOperation(format!(
                            "{collection} has no records to preview"
                        )))
                    })?;
                store.get(collection, &id)?
            }
        };

        let condition_reason = config.conditions.rejection(&record);
        let target = find_target(store, &mapping, &record)?;
        let target_record = match &target.target {
            Some(name) => Some(store.get(mapping.target_collection, name)?),
            None => None,
        };
        let action = match (&condition_reason, &target.target) {
            (Some(_), _) => "Skip",
            (None, Some(_)) => "Update",
            (None, None) => "Insert",
        };

        Ok(SyncPreview {
            configuration: config.name.clone(),
            direction,
            source_collection: collection.to_string(),
            source_name: record.name_or_empty().to_string(),
            target_collection: mapping.target_collection.to_string(),
            conditions_met: condition_reason.is_none(),
            condition_reason,
            field_mappings: self.preview_fields(&mapping, &record)?,
            computed_fields: self.preview_computed(&mapping, &record),
            child_mappings: self.preview_children(&mapping, &record, target_record.as_ref()),
            target_name: target.target,
            action: action.to_string(),
        })
    }

    fn preview_fields(
        &self,
        mapping: &DirectedMapping<'_>,
        record: &Record,
    ) -> SyncResult<Vec<FieldPreview>> {
        mapping
            .all_pairs()
            .map(|pair| {
                let resolved = ResolvedPair::parse(pair)?;
                let original = resolved.source.get(record);
                let mapped = if original.is_null() {
                    Value::Null
                } else {
                    let key = resolved.source.to_string();
                    transformed(&self.inner.registry, mapping, &key, &original, record, None)
                };
                Ok(FieldPreview {
                    source_field: pair.source.clone(),
                    target_field: pair.target.clone(),
                    original_value: original,
                    mapped_value: mapped,
                })
            })
            .collect()
    }

    fn preview_computed(&self, mapping: &DirectedMapping<'_>, record: &Record) -> Vec<ComputedPreview> {
        mapping
            .configuration
            .computed_fields
            .iter()
            .map(|computed| match self.inner.registry.evaluate(&computed.compute, record) {
                Ok(value) => ComputedPreview {
                    target_field: computed.target_field.clone(),
                    value: Some(value),
                    error: None,
                },
                Err(err) => ComputedPreview {
                    target_field: computed.target_field.clone(),
                    value: None,
                    error: Some(err.to_string()),
                },
            })
            .collect()
    }

    fn preview_children(
        &self,
        mapping: &DirectedMapping<'_>,
        record: &Record,
        target: Option<&Record>,
    ) -> Vec<ChildPreview> {
        mapping
            .children
            .iter()
            .map(|child| {
                let rows = record.table(&child.source_table);
                let sample = rows.first().map(|row| {
                    child
                        .fields
                        .iter()
                        .map(|pair| {
                            let value = row.get(&pair.source);
                            let key = child.transform_key(&pair.source);
                            let mapped = if value.is_null() {
                                value
                            } else {
                                transformed(&self.inner.registry, mapping, &key, &value, record, None)
                            };
                            (pair.target.clone(), mapped)
                        })
                        .collect()
                });
                ChildPreview {
                    source_table: child.source_table.clone(),
                    target_table: child.target_table.clone(),
                    source_count: rows.len(),
                    target_count: target.map_or(0, |t| t.table(&child.target_table).len()),
                    sample,
                }
            })
            .collect()
    }
}
