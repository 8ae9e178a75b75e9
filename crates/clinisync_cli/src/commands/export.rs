//! Export command implementation.

use super::load_entries;
use std::fs;
use std::path::Path;
use tracing::info;

/// Runs the export command.
///
/// Entries are written exactly as stored, so an operation that was in
/// flight at shutdown still shows `in_flight`.
pub fn run(path: &Path, output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let entries = load_entries(path)?;
    let json = serde_json::to_string_pretty(&entries)?;

    match output {
        Some(output) => {
            fs::write(output, json)?;
            info!(entries = entries.len(), output = %output.display(), "Queue exported");
        }
        None => println!("{}", json),
    }
    Ok(())
}
