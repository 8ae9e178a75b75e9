//! Discard command implementation.

use super::{open_queue, parse_id};
use std::path::Path;

/// Runs the discard command.
pub fn run(path: &Path, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let id = parse_id(id)?;
    let queue = open_queue(path)?;
    let removed = queue.discard(id)?;

    println!("Discarded {} ({})", removed.id, removed.kind);
    if let Some(error) = &removed.last_error {
        println!("  last error: [{}] {}", error.class.name(), error.message);
    }
    println!("{} operation(s) left in the queue", queue.len());
    Ok(())
}
