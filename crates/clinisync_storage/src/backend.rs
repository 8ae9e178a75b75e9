//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level blob store for the offline queue.
///
/// Backends hold a single opaque image. The queue serializes its whole
/// state into that image after every mutation, so the backend only has to
/// offer whole-image reads and atomic whole-image replacement.
///
/// # Invariants
///
/// - `read_all` returns `None` until the first successful `replace`
/// - `read_all` returns exactly the bytes of the last successful `replace`
/// - `replace` is durable when it returns `Ok`
/// - a failed or interrupted `replace` leaves the previous image intact
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait StorageBackend: Send + Sync {
    /// Reads the current image.
    ///
    /// Returns `None` if nothing has been stored yet.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn read_all(&self) -> StorageResult<Option<Vec<u8>>>;

    /// Atomically replaces the stored image with `data`.
    ///
    /// After this returns successfully, the new image is guaranteed to
    /// survive process termination.
    ///
    /// # Errors
    ///
    /// Returns an error if the write cannot be completed. The previous
    /// image is still the one returned by `read_all`.
    fn replace(&mut self, data: &[u8]) -> StorageResult<()>;

    /// Returns the size of the current image in bytes (0 when empty).
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Removes the stored image entirely.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal fails.
    fn clear(&mut self) -> StorageResult<()>;
}
