//! Persistence through the validated store API.

use super::SyncAction;
use crate::error::SyncResult;
use livesync_store::{Record, RecordStore};

/// Inserts or saves `target`, letting the store run its business rules and
/// stamp system fields.
pub(crate) fn persist<S: RecordStore + ?Sized>(
    store: &S,
    target: &mut Record,
    is_new: bool,
) -> SyncResult<SyncAction> {
    if is_new {
        store.create(target)?;
        Ok(SyncAction::Insert)
    } else {
        store.update(target)?;
        Ok(SyncAction::Update)
    }
}
