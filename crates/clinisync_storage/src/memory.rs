//! In-memory storage backend for testing.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// An in-memory storage backend.
///
/// Clones share the same image, which lets tests drop a queue and "restart"
/// it from a clone of the backend, the way a process restart reopens the
/// same file.
///
/// Write failures can be injected with [`InMemoryBackend::fail_next_writes`]
/// to exercise the persistence-failure paths of the queue.
///
/// # Example
///
/// ```rust
/// use clinisync_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let reopened = backend.clone();
/// backend.replace(b"test data").unwrap();
/// assert_eq!(reopened.size().unwrap(), 9);
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    image: Arc<RwLock<Option<Vec<u8>>>>,
    failing_writes: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory backend with a pre-existing image.
    ///
    /// Useful for testing recovery scenarios.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        let backend = Self::default();
        *backend.image.write() = Some(data);
        backend
    }

    /// Returns a copy of the current image.
    #[must_use]
    pub fn data(&self) -> Option<Vec<u8>> {
        self.image.read().clone()
    }

    /// Makes the next `count` calls to `replace` fail without touching the image.
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Returns the number of successful `replace` calls so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_all(&self) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.image.read().clone())
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StorageError::WriteRejected("injected write failure".into()));
        }

        *self.image.write() = Some(data.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.image.read().as_ref().map_or(0, |d| d.len() as u64))
    }

    fn clear(&mut self) -> StorageResult<()> {
        *self.image.write() = None;
        Ok(())
    }
}
