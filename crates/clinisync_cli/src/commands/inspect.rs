//! Inspect command implementation.

use super::load_entries;
use clinisync_protocol::{OperationStatus, PendingOperation};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Queue inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Queue file path.
    pub path: String,
    /// Image size in bytes.
    pub image_size: u64,
    /// Number of entries.
    pub total: usize,
    /// Entries per status.
    pub by_status: BTreeMap<String, usize>,
    /// Entries per operation kind.
    pub by_kind: BTreeMap<String, usize>,
    /// Creation time of the oldest entry, in Unix milliseconds.
    pub oldest_created_at_ms: Option<u64>,
    /// Highest attempt count.
    pub max_attempt: u32,
    /// Per-entry details (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<EntrySummary>>,
}

/// One line of the entry listing.
#[derive(Debug, Serialize)]
pub struct EntrySummary {
    /// Operation id.
    pub id: String,
    /// Operation kind.
    pub kind: String,
    /// Replay status.
    pub status: String,
    /// Attempts made.
    pub attempt: u32,
    /// Enqueue time in Unix milliseconds.
    pub created_at_ms: u64,
    /// Causal predecessor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<String>,
    /// Last failure, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl From<&PendingOperation> for EntrySummary {
    fn from(op: &PendingOperation) -> Self {
        Self {
            id: op.id.to_string(),
            kind: op.kind.to_string(),
            status: op.status.to_string(),
            attempt: op.attempt,
            created_at_ms: op.created_at_ms,
            depends_on: op.depends_on.map(|id| id.to_string()),
            last_error: op
                .last_error
                .as_ref()
                .map(|e| format!("[{}] {}", e.class.name(), e.message)),
        }
    }
}

/// Runs the inspect command.
pub fn run(path: &Path, show_entries: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let entries = load_entries(path)?;
    let image_size = std::fs::metadata(path)?.len();
    let result = summarize(path, image_size, &entries, show_entries);

    // Output
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Builds the inspection result for a list of entries.
pub fn summarize(
    path: &Path,
    image_size: u64,
    entries: &[PendingOperation],
    show_entries: bool,
) -> InspectResult {
    let mut by_status = BTreeMap::new();
    let mut by_kind = BTreeMap::new();
    for op in entries {
        *by_status.entry(op.status.to_string()).or_insert(0) += 1;
        *by_kind.entry(op.kind.to_string()).or_insert(0) += 1;
    }

    InspectResult {
        path: path.display().to_string(),
        image_size,
        total: entries.len(),
        by_status,
        by_kind,
        oldest_created_at_ms: entries.iter().map(|op| op.created_at_ms).min(),
        max_attempt: entries.iter().map(|op| op.attempt).max().unwrap_or(0),
        entries: show_entries.then(|| entries.iter().map(EntrySummary::from).collect()),
    }
}

fn print_text_output(result: &InspectResult) {
    println!("ClinicSync Queue Inspection");
    println!("===========================");
    println!();
    println!("Path: {}", result.path);
    println!("Image size: {} bytes", format_size(result.image_size));
    println!();
    println!("Entries: {}", result.total);
    for status in [
        OperationStatus::Queued,
        OperationStatus::InFlight,
        OperationStatus::FailedTransient,
        OperationStatus::FailedPermanent,
    ] {
        let count = result.by_status.get(status.name()).copied().unwrap_or(0);
        println!("  {:<17} {}", status.name(), count);
    }
    println!("  max attempt       {}", result.max_attempt);

    if !result.by_kind.is_empty() {
        println!();
        println!("Kinds:");
        for (kind, count) in &result.by_kind {
            println!("  {:<17} {}", kind, count);
        }
    }

    if let Some(entries) = &result.entries {
        println!();
        println!("Operations (replay order):");
        for entry in entries {
            println!(
                "  {} {:<17} {:<16} attempt {}",
                entry.id, entry.kind, entry.status, entry.attempt
            );
            if let Some(dep) = &entry.depends_on {
                println!("      depends on {}", dep);
            }
            if let Some(error) = &entry.last_error {
                println!("      last error: {}", error);
            }
        }
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
