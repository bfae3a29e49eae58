//! Validate command implementation.

use crate::workspace::WorkspaceFile;
use livesync_engine::{validate_configuration, HookRegistry, SyncError};
use livesync_store::MemoryStore;
use serde::Serialize;
use std::path::Path;

/// Validation result for one configuration.
#[derive(Debug, Serialize)]
pub struct ConfigurationReport {
    /// Configuration name.
    pub name: String,
    /// Whether the configuration would be accepted.
    pub valid: bool,
    /// Problems found.
    pub issues: Vec<String>,
}

/// Checks every configuration of a workspace file against its schemas and
/// against the configurations listed before it.
///
/// Only built-in behavior is available from the command line, so any hook,
/// transform or compute reference is reported as unregistered.
pub fn check(file: &WorkspaceFile) -> Vec<ConfigurationReport> {
    let store = MemoryStore::new();
    for schema in &file.schemas {
        store.register_schema(schema.clone());
    }
    let registry = HookRegistry::new();

    let mut accepted = Vec::new();
    file.configurations
        .iter()
        .map(|config| {
            let issues = match validate_configuration(config, &store, &registry, &accepted) {
                Ok(()) => {
                    accepted.push(config.clone());
                    Vec::new()
                }
                Err(SyncError::Configuration { issues, .. }) => issues,
                Err(other) => vec![other.to_string()],
            };
            ConfigurationReport {
                name: config.name.clone(),
                valid: issues.is_empty(),
                issues,
            }
        })
        .collect()
}

/// Runs the validate command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let file = WorkspaceFile::read(path)?;
    let reports = check(&file);

    if format == "json" {
        super::print_json(&reports)?;
    } else {
        for report in &reports {
            if report.valid {
                println!("✓ {}", report.name);
            } else {
                println!("✗ {}", report.name);
                for issue in &report.issues {
                    println!("    {issue}");
                }
            }
        }
    }

    let invalid = reports.iter().filter(|r| !r.valid).count();
    if invalid == 0 {
        Ok(())
    } else {
        Err(format!("{invalid} of {} configurations are invalid", reports.len()).into())
    }
}
