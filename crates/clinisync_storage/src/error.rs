//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Another process holds the store open.
    #[error("storage is locked by another process: {0}")]
    Locked(PathBuf),

    /// A write was rejected (used by the in-memory backend for fault injection).
    #[error("write rejected: {0}")]
    WriteRejected(String),

    /// The storage is closed.
    #[error("storage is closed")]
    Closed,
}
