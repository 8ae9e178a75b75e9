//! Verify command implementation.

use super::{open_backend, CommandError};
use clinisync_protocol::{decode_image, FailureClass, OperationStatus, PendingOperation};
use clinisync_storage::StorageBackend;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of entries checked.
    pub entries_checked: usize,
    /// Invariant violations.
    pub errors: Vec<String>,
    /// Conditions that recover on the next load.
    pub warnings: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying queue file at {:?}", path);
    println!();

    let backend = open_backend(path)?;
    let Some(image) = backend.read_all()? else {
        println!("Queue file is empty (this is normal for a fresh install)");
        return Ok(());
    };

    println!("Checking image ({} bytes)...", image.len());
    let entries = match decode_image(&image) {
        Ok(entries) => entries,
        Err(e) => {
            println!("    ERROR: {}", e);
            println!();
            println!("✗ Queue verification failed");
            return Err(CommandError::VerificationFailed(1).into());
        }
    };

    println!("Checking entries...");
    let result = check_entries(&entries);
    print_result(&result);

    println!();
    if result.is_ok() {
        println!("✓ Queue verification passed");
        Ok(())
    } else {
        println!("✗ Queue verification failed");
        Err(CommandError::VerificationFailed(result.errors.len()).into())
    }
}

/// Checks the invariants a saved queue must hold.
pub fn check_entries(entries: &[PendingOperation]) -> VerifyResult {
    let mut result = VerifyResult {
        entries_checked: entries.len(),
        ..VerifyResult::default()
    };

    let mut ids = HashSet::new();
    let mut sequences = HashSet::new();
    for op in entries {
        if !ids.insert(op.id) {
            result.errors.push(format!("Duplicate operation id {}", op.id));
        }
        if !sequences.insert(op.sequence) {
            result
                .errors
                .push(format!("Duplicate sequence {} at {}", op.sequence, op.id));
        }
        if op.status == OperationStatus::Synced {
            result
                .errors
                .push(format!("Synced operation {} was persisted", op.id));
        }
    }

    if entries
        .windows(2)
        .any(|pair| pair[0].order_key() > pair[1].order_key())
    {
        result
            .errors
            .push("Entries are not stored in replay order".to_string());
    }

    let in_flight: Vec<_> = entries
        .iter()
        .filter(|op| op.status == OperationStatus::InFlight)
        .collect();
    if in_flight.len() > 1 {
        result.errors.push(format!(
            "{} operations are in flight, at most one is allowed",
            in_flight.len()
        ));
    }
    for op in in_flight {
        result.warnings.push(format!(
            "Operation {} was in flight at shutdown and will be replayed",
            op.id
        ));
    }

    let by_id: HashMap<_, _> = entries.iter().map(|op| (op.id, op)).collect();
    for op in entries {
        let Some(dep) = op.depends_on else {
            continue;
        };
        match by_id.get(&dep) {
            Some(pred) if pred.order_key() >= op.order_key() => {
                result
                    .errors
                    .push(format!("Operation {} depends on later operation {}", op.id, dep));
            }
            Some(_) => {}
            None => {
                let held = op
                    .last_error
                    .as_ref()
                    .is_some_and(|e| e.class == FailureClass::DependencyFailed);
                if held {
                    result.warnings.push(format!(
                        "Operation {} is held on discarded operation {}",
                        op.id, dep
                    ));
                }
            }
        }
    }

    result
}

fn print_result(result: &VerifyResult) {
    println!(
        "  entries checked: {}, errors: {}, warnings: {}",
        result.entries_checked,
        result.errors.len(),
        result.warnings.len()
    );
    for error in &result.errors {
        println!("    ERROR: {}", error);
    }
    for warning in &result.warnings {
        println!("    WARNING: {}", warning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::sample_queue;
    use clinisync_protocol::{LastError, OperationId, OperationKind};
    use serde_json::json;

    fn op(sequence: u64) -> PendingOperation {
        PendingOperation::new(
            OperationId::new(),
            OperationKind::SaleCreate,
            json!({"items": [{"sku": "A-1", "qty": 1}]}),
            1_700_000_000_000 + sequence,
            sequence,
        )
    }

    #[test]
    fn saved_queue_passes() {
        let sample = sample_queue();
        run(&sample.path).unwrap();
    }

    #[test]
    fn corrupt_image_fails() {
        let sample = sample_queue();
        let mut bytes = std::fs::read(&sample.path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&sample.path, bytes).unwrap();

        assert!(run(&sample.path).is_err());
    }

    #[test]
    fn detects_duplicates_and_order() {
        let first = op(1);
        let mut second = op(0);
        second.id = first.id;

        let result = check_entries(&[first, second]);
        assert!(!result.is_ok());
        assert!(result.errors.iter().any(|e| e.contains("Duplicate operation id")));
        assert!(result.errors.iter().any(|e| e.contains("replay order")));
    }

    #[test]
    fn single_in_flight_is_only_a_warning() {
        let mut first = op(0);
        first.status = OperationStatus::InFlight;
        let result = check_entries(&[first.clone(), op(1)]);
        assert!(result.is_ok());
        assert_eq!(result.warnings.len(), 1);

        let mut second = op(2);
        second.status = OperationStatus::InFlight;
        let result = check_entries(&[first, op(1), second]);
        assert!(!result.is_ok());
    }

    #[test]
    fn dependency_must_point_backwards() {
        let first = op(0);
        let second = op(1);
        let first = first.with_depends_on(second.id);
        let result = check_entries(&[first, second]);
        assert!(result.errors.iter().any(|e| e.contains("depends on later")));
    }

    #[test]
    fn held_on_discarded_is_a_warning() {
        let mut held = op(3).with_depends_on(OperationId::new());
        held.status = OperationStatus::FailedPermanent;
        held.last_error = Some(LastError::new(FailureClass::DependencyFailed, "held", 1));

        let result = check_entries(&[held]);
        assert!(result.is_ok());
        assert_eq!(result.warnings.len(), 1);
    }
}
