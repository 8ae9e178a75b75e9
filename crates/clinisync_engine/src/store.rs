//! Persistence interface of the operation queue.

use crate::error::SyncResult;
use clinisync_protocol::{decode_image, encode_image, PendingOperation};
use clinisync_storage::StorageBackend;
use tracing::debug;

/// Durable home of the queue's ordered entries.
///
/// `save` must be crash-safe: either the new sequence lands fully or the
/// previously saved one is retained.
pub trait QueueStore: Send {
    /// Loads the previously saved sequence. An absent store yields an
    /// empty sequence; an unreadable one is an error.
    fn load(&self) -> SyncResult<Vec<PendingOperation>>;

    /// Replaces the saved sequence.
    fn save(&mut self, operations: &[PendingOperation]) -> SyncResult<()>;
}

/// Queue store writing queue images through a [`StorageBackend`].
#[derive(Debug)]
pub struct BackendQueueStore<B: StorageBackend> {
    backend: B,
}

impl<B: StorageBackend> BackendQueueStore<B> {
    /// Wraps a storage backend.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Returns the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Consumes the store, returning the backend.
    pub fn into_inner(self) -> B {
        self.backend
    }
}

impl<B: StorageBackend> QueueStore for BackendQueueStore<B> {
    fn load(&self) -> SyncResult<Vec<PendingOperation>> {
        match self.backend.read_all()? {
            Some(image) => {
                let operations = decode_image(&image)?;
                debug!(entries = operations.len(), bytes = image.len(), "Loaded queue image");
                Ok(operations)
            }
            None => Ok(Vec::new()),
        }
    }

    fn save(&mut self, operations: &[PendingOperation]) -> SyncResult<()> {
        let image = encode_image(operations)?;
        self.backend.replace(&image)?;
        Ok(())
    }
}
