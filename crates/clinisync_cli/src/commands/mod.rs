//! CLI command implementations.

pub mod discard;
pub mod export;
pub mod inspect;
pub mod requeue;
pub mod verify;

use clinisync_engine::{BackendQueueStore, OperationQueue, QueueStore};
use clinisync_protocol::{OperationId, PendingOperation};
use clinisync_storage::FileBackend;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised by the commands themselves.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The queue file does not exist.
    #[error("no queue file found at {0:?}")]
    MissingQueue(PathBuf),

    /// The id argument is not a valid operation id.
    #[error("invalid operation id: {0}")]
    InvalidId(String),

    /// Verification found problems.
    #[error("verification failed with {0} problem(s)")]
    VerificationFailed(usize),
}

fn open_backend(path: &Path) -> Result<FileBackend, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(CommandError::MissingQueue(path.to_path_buf()).into());
    }
    Ok(FileBackend::open(path)?)
}

/// Loads the raw entries of a queue file, without load-time recovery.
pub(crate) fn load_entries(path: &Path) -> Result<Vec<PendingOperation>, Box<dyn std::error::Error>> {
    let store = BackendQueueStore::new(open_backend(path)?);
    Ok(store.load()?)
}

/// Opens a queue file for mutation.
pub(crate) fn open_queue(path: &Path) -> Result<OperationQueue, Box<dyn std::error::Error>> {
    let store = BackendQueueStore::new(open_backend(path)?);
    Ok(OperationQueue::open(Box::new(store))?)
}

pub(crate) fn parse_id(id: &str) -> Result<OperationId, CommandError> {
    id.trim()
        .parse()
        .map_err(|_| CommandError::InvalidId(id.to_string()))
}
