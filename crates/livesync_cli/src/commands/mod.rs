//! CLI command implementations.

pub mod preview;
pub mod replay;
pub mod sync;
pub mod validate;

use serde::Serialize;

/// Prints a value as pretty JSON.
pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
