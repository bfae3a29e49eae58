//! Loop prevention.
//!
//! Two mechanisms keep bidirectional syncs from ping-ponging:
//!
//! - [`InProgress`] marks the target instance while it is written, so the
//!   lifecycle event raised by that very write is ignored
//! - [`find_reverse_pair`] rejects, at save time, a second enabled
//!   bidirectional configuration running the same pair of collections the
//!   other way round
//!
//! Cycles through three or more configurations are not detected.

use crate::config::SyncConfiguration;
use livesync_store::Record;
use std::ops::{Deref, DerefMut};

/// Marks a record as being synced for as long as the guard lives.
///
/// The marker is cleared on drop, including on early return and unwinding.
#[derive(Debug)]
pub struct InProgress<'a> {
    record: &'a mut Record,
}

impl<'a> InProgress<'a> {
    /// Marks `record`.
    pub fn new(record: &'a mut Record) -> Self {
        record.mark_syncing();
        Self { record }
    }
}

impl Deref for InProgress<'_> {
    type Target = Record;

    fn deref(&self) -> &Record {
        self.record
    }
}

impl DerefMut for InProgress<'_> {
    fn deref_mut(&mut self) -> &mut Record {
        self.record
    }
}

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.record.clear_syncing();
    }
}

/// Finds an enabled bidirectional configuration that would close a 2-cycle
/// with `candidate`.
///
/// Returns `None` unless `candidate` itself is enabled and bidirectional.
pub fn find_reverse_pair<'a>(
    candidate: &SyncConfiguration,
    existing: &'a [SyncConfiguration],
) -> Option<&'a SyncConfiguration> {
    if !(candidate.enabled && candidate.bidirectional) {
        return None;
    }
    existing.iter().find(|other| {
        other.name != candidate.name
            && other.enabled
            && other.bidirectional
            && other.source_collection == candidate.target_collection
            && other.target_collection == candidate.source_collection
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_cleared_on_drop() {
        let mut record = Record::new("User");
        {
            let mut guard = InProgress::new(&mut record);
            assert!(guard.is_syncing());
            guard.set("email", "a@example.com".into());
        }
        assert!(!record.is_syncing());
        assert_eq!(record.get("email"), livesync_store::Value::from("a@example.com"));
    }

    #[test]
    fn marker_cleared_on_early_return() {
        fn fails(record: &mut Record) -> Result<(), ()> {
            let _guard = InProgress::new(record);
            Err(())
        }
        let mut record = Record::new("User");
        assert!(fails(&mut record).is_err());
        assert!(!record.is_syncing());
    }

    #[test]
    fn reverse_pair_detection() {
        let ab = SyncConfiguration::new("ab", "A", "B").bidirectional();
        let ba = SyncConfiguration::new("ba", "B", "A").bidirectional();
        let existing = vec![ab.clone()];

        assert_eq!(find_reverse_pair(&ba, &existing).map(|c| c.name.as_str()), Some("ab"));

        // re-saving the same configuration is not a cycle
        assert!(find_reverse_pair(&ab, &existing).is_none());

        let mut one_way = ba.clone();
        one_way.bidirectional = false;
        assert!(find_reverse_pair(&one_way, &existing).is_none());

        let mut disabled = ab.clone();
        disabled.enabled = false;
        assert!(find_reverse_pair(&ba, &[disabled]).is_none());
    }

    #[test]
    fn longer_cycles_are_not_detected() {
        let existing = vec![
            SyncConfiguration::new("ab", "A", "B").bidirectional(),
            SyncConfiguration::new("bc", "B", "C").bidirectional(),
        ];
        let ca = SyncConfiguration::new("ca", "C", "A").bidirectional();
        assert!(find_reverse_pair(&ca, &existing).is_none());
    }
}
