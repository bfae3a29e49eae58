//! Target record resolution.

use crate::config::DirectedMapping;
use crate::error::SyncResult;
use crate::path::FieldPath;
use livesync_store::{FieldCondition, Filter, Query, Record, RecordStore};
use tracing::{debug, warn};

/// How a target was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchVia {
    /// An identifier (or first direct field) query.
    Identifier,
    /// Same identity as the source record.
    Identity,
}

/// Result of a target lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchOutcome {
    /// Chosen target identity.
    pub target: Option<String>,
    /// How it was found.
    pub via: Option<MatchVia>,
    /// Every distinct candidate when the identifier query was ambiguous.
    pub ambiguous: Vec<String>,
}

impl MatchOutcome {
    /// Returns true if more than one target matched.
    pub fn is_ambiguous(&self) -> bool {
        self.ambiguous.len() > 1
    }
}

/// Finds the record in the target collection that corresponds to `source`.
///
/// Non-hierarchical identifier pairs with a non-blank source value are
/// OR-combined into one equality query; the first hit in store order wins.
/// If that yields nothing, a target with the source's own identity is used.
pub fn find_target<S: RecordStore + ?Sized>(
    store: &S,
    mapping: &DirectedMapping<'_>,
    source: &Record,
) -> SyncResult<MatchOutcome> {
    let mut filter = Filter::everything();
    for pair in mapping.match_candidates() {
        let (Ok(source_path), Ok(target_path)) =
            (FieldPath::parse(&pair.source), FieldPath::parse(&pair.target))
        else {
            continue;
        };
        if source_path.is_hierarchical() || target_path.is_hierarchical() {
            continue;
        }
        let value = source_path.get(source);
        if value.is_blank() {
            continue;
        }
        filter = filter.or(FieldCondition::eq(target_path.field, value));
    }

    if !filter.is_empty() {
        let hits = store.find(mapping.target_collection, &Query::new(filter))?;
        if let Some(first) = hits.first() {
            let ambiguous = if hits.len() > 1 {
                warn!(
                    configuration = %mapping.configuration.name,
                    source = %source.name_or_empty(),
                    candidates = ?hits,
                    chosen = %first,
                    "ambiguous match, using first target"
                );
                hits.clone()
            } else {
                Vec::new()
            };
            return Ok(MatchOutcome {
                target: Some(first.clone()),
                via: Some(MatchVia::Identifier),
                ambiguous,
            });
        }
    }

    if let Some(name) = &source.name {
        match store.get(mapping.target_collection, name) {
            Ok(_) => {
                debug!(target = %name, "matched target by identity");
                return Ok(MatchOutcome {
                    target: Some(name.clone()),
                    via: Some(MatchVia::Identity),
                    ambiguous: Vec::new(),
                });
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }
    }

    Ok(MatchOutcome::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Direction, SyncConfiguration};
    use livesync_store::{FieldKind, MemoryStore, Schema};

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.register_schema(
            Schema::new("Employee")
                .field("email", FieldKind::Data)
                .field("phone", FieldKind::Data),
        );
        store.register_schema(
            Schema::new("User")
                .field("email", FieldKind::Data)
                .field("mobile", FieldKind::Data),
        );
        store
    }

    fn user(store: &MemoryStore, name: &str, email: &str, mobile: &str) {
        let mut record = Record::new("User")
            .with_name(name)
            .with_field("email", email)
            .with_field("mobile", mobile);
        store.create(&mut record).unwrap();
    }

    #[test]
    fn matches_by_identifier() {
        let store = store();
        user(&store, "U-1", "a@example.com", "111");
        let config = SyncConfiguration::new("c", "Employee", "User")
            .identify_by("email", "email")
            .map("phone", "mobile");
        let mapping = config.directed(Direction::Forward).unwrap();

        let source = Record::new("Employee")
            .with_name("EMP-1")
            .with_field("email", "a@example.com");
        let outcome = find_target(&store, &mapping, &source).unwrap();
        assert_eq!(outcome.target.as_deref(), Some("U-1"));
        assert_eq!(outcome.via, Some(MatchVia::Identifier));
    }

    #[test]
    fn falls_back_to_first_direct_field_then_identity() {
        let store = store();
        user(&store, "U-1", "x@example.com", "222");
        user(&store, "EMP-9", "y@example.com", "333");
        let config = SyncConfiguration::new("c", "Employee", "User").map("phone", "mobile");
        let mapping = config.directed(Direction::Forward).unwrap();

        let by_field = Record::new("Employee").with_name("EMP-1").with_field("phone", "222");
        assert_eq!(
            find_target(&store, &mapping, &by_field).unwrap().target.as_deref(),
            Some("U-1")
        );

        let by_identity = Record::new("Employee").with_name("EMP-9");
        let outcome = find_target(&store, &mapping, &by_identity).unwrap();
        assert_eq!(outcome.target.as_deref(), Some("EMP-9"));
        assert_eq!(outcome.via, Some(MatchVia::Identity));

        let nothing = Record::new("Employee").with_name("EMP-2").with_field("phone", "999");
        assert_eq!(find_target(&store, &mapping, &nothing).unwrap(), MatchOutcome::default());
    }

    #[test]
    fn ambiguous_matches_take_first() {
        let store = store();
        user(&store, "U-1", "a@example.com", "111");
        user(&store, "U-2", "b@example.com", "222");
        let config = SyncConfiguration::new("c", "Employee", "User")
            .identify_by("email", "email")
            .identify_by("phone", "mobile")
            .map("email", "email");
        let mapping = config.directed(Direction::Forward).unwrap();

        let source = Record::new("Employee")
            .with_field("email", "a@example.com")
            .with_field("phone", "222");
        let outcome = find_target(&store, &mapping, &source).unwrap();
        assert!(outcome.is_ambiguous());
        assert_eq!(outcome.target.as_deref(), Some("U-1"));
    }

    #[test]
    fn blank_identifiers_never_match() {
        let store = store();
        user(&store, "U-OTHER", "", "111");
        let config = SyncConfiguration::new("c", "Employee", "User")
            .identify_by("email", "email")
            .map("phone", "mobile");
        let mapping = config.directed(Direction::Forward).unwrap();

        let source = Record::new("Employee")
            .with_name("EMP-9")
            .with_field("email", "")
            .with_field("phone", "999");
        assert_eq!(find_target(&store, &mapping, &source).unwrap(), MatchOutcome::default());
    }

    #[test]
    fn hierarchical_identifiers_are_ignored() {
        let store = store();
        user(&store, "U-1", "a@example.com", "111");
        let config = SyncConfiguration::new("c", "Employee", "User")
            .identify_by("contacts.email", "email")
            .map("email", "email");
        let mapping = config.directed(Direction::Forward).unwrap();
        let source = Record::new("Employee")
            .with_row("contacts", livesync_store::ChildRow::new().with("email", "a@example.com"));
        assert_eq!(find_target(&store, &mapping, &source).unwrap().target, None);
    }
}
