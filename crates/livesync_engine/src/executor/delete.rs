//! Delete policy execution.

use super::{Executor, SkipReason, SyncAction, SyncOutcome, SyncRequest};
use crate::config::OnDeleteAction;
use crate::error::SyncResult;
use crate::guard::InProgress;
use crate::matcher::find_target;
use livesync_store::{DirectStore, Record, Schema, Value};
use tracing::info;

const ARCHIVE_FLAGS: [&str; 2] = ["archived", "is_archived"];

/// Field and value that flag a target as archived, if the schema has one.
fn archive_marker(schema: &Schema) -> Option<(String, Value)> {
    ARCHIVE_FLAGS
        .iter()
        .find(|f| schema.get(f).is_some())
        .map(|f| (f.to_string(), Value::Integer(1)))
        .or_else(|| {
            schema
                .get("status")
                .map(|_| ("status".to_string(), Value::from("Archived")))
        })
}

impl<S: DirectStore + ?Sized> Executor<'_, S> {
    /// Applies the configuration's delete policy to the counterpart of a
    /// deleted `source`.
    pub fn run_delete(&self, source: &Record, request: &SyncRequest<'_>) -> SyncOutcome {
        let outcome = SyncOutcome::base(request, source);
        let config = request.configuration;

        if let Some(reason) = Self::guard(source, request) {
            return outcome.skipped(reason);
        }
        if config.on_delete_action == OnDeleteAction::None {
            return outcome.skipped(SkipReason::NoDeleteAction);
        }
        let mapping = match config.directed(request.direction) {
            Ok(mapping) => mapping,
            Err(_) => return outcome.skipped(SkipReason::NotBidirectional),
        };

        let found = match find_target(self.store, &mapping, source) {
            Ok(found) => found,
            Err(err) => return self.report_error(outcome, &err),
        };
        let Some(target_name) = found.target else {
            return outcome.skipped(SkipReason::NoTarget);
        };

        let applied = self.apply_delete(
            config.on_delete_action,
            config.on_delete_field.as_deref(),
            mapping.target_collection,
            &target_name,
        );
        match applied {
            Ok(Ok(action)) => {
                info!(
                    configuration = %config.name,
                    record = %source.name_or_empty(),
                    target = %target_name,
                    action = %action,
                    "delete policy applied"
                );
                outcome.succeeded(action, Some(target_name))
            }
            Ok(Err(reason)) => {
                let mut outcome = outcome.skipped(reason);
                outcome.target_name = Some(target_name);
                outcome
            }
            Err(err) => {
                let mut outcome = outcome;
                outcome.target_name = Some(target_name);
                self.report_error(outcome, &err)
            }
        }
    }

    fn apply_delete(
        &self,
        action: OnDeleteAction,
        field: Option<&str>,
        collection: &str,
        name: &str,
    ) -> SyncResult<Result<SyncAction, SkipReason>> {
        let marker = match action {
            OnDeleteAction::None => return Ok(Err(SkipReason::NoDeleteAction)),
            OnDeleteAction::Delete => {
                self.store.delete(collection, name)?;
                return Ok(Ok(SyncAction::Delete));
            }
            OnDeleteAction::Archive => {
                let schema = self.store.schema(collection)?;
                match archive_marker(&schema) {
                    Some(marker) => marker,
                    None => {
                        return Ok(Err(SkipReason::NoDeleteField(
                            "archived, is_archived or status".into(),
                        )))
                    }
                }
            }
            OnDeleteAction::SetField => {
                let field = field.unwrap_or_default();
                if self.store.schema(collection)?.get(field).is_none() {
                    return Ok(Err(SkipReason::NoDeleteField(field.to_string())));
                }
                (field.to_string(), Value::Integer(1))
            }
        };

        let mut target = self.store.get(collection, name)?;
        let mut guard = InProgress::new(&mut target);
        let (field, value) = marker;
        guard.set(&field, value);
        self.store.update(&mut guard)?;
        Ok(Ok(SyncAction::Archive))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livesync_store::FieldKind;

    #[test]
    fn archive_marker_prefers_flags() {
        let flagged = Schema::new("User")
            .field("status", FieldKind::Select)
            .field("is_archived", FieldKind::Check);
        assert_eq!(
            archive_marker(&flagged),
            Some(("is_archived".to_string(), Value::Integer(1)))
        );

        let status_only = Schema::new("User").field("status", FieldKind::Select);
        assert_eq!(
            archive_marker(&status_only),
            Some(("status".to_string(), Value::from("Archived")))
        );

        assert_eq!(archive_marker(&Schema::new("User")), None);
    }
}
