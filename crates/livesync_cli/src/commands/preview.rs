//! Preview command implementation.

use crate::workspace::Workspace;
use std::path::Path;

/// Runs the preview command.
///
/// Records are loaded without syncing, so the preview shows what the
/// first sync of the record would do.
pub fn run(
    path: &Path,
    configuration: &str,
    collection: Option<&str>,
    record: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let workspace = Workspace::load(path, false)?;
    let response = workspace.engine.test_sync(configuration, collection, record);
    super::print_json(&response)?;
    if response.success {
        Ok(())
    } else {
        Err(response.message.into())
    }
}
