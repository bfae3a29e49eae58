//! Replay command implementation.

use crate::workspace::Workspace;
use livesync_engine::{EngineStats, SyncLog};
use serde::Serialize;
use std::path::Path;

/// Result of a replay.
#[derive(Debug, Serialize)]
pub struct ReplayReport {
    /// Engine counters.
    pub stats: EngineStats,
    /// Sync log entries written.
    pub logs: Vec<SyncLog>,
}

/// Runs the replay command: loads the records through the live sync path,
/// as if they had been created one by one.
pub fn run(path: &Path, output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let workspace = Workspace::load(path, true)?;
    super::print_json(&ReplayReport {
        stats: workspace.engine.stats(),
        logs: workspace.sync_logs(),
    })?;
    if let Some(output) = output {
        workspace.snapshot()?.write(output)?;
    }
    Ok(())
}
