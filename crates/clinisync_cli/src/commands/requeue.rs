//! Requeue command implementation.

use super::{open_queue, parse_id};
use std::path::Path;

/// Runs the requeue command.
pub fn run(path: &Path, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let id = parse_id(id)?;
    let queue = open_queue(path)?;
    let count = queue.requeue(id)?;

    println!("Requeued {} operation(s) starting at {}", count, id);
    Ok(())
}
