//! Crash simulation for queue persistence tests.
//!
//! ## Test Strategy
//!
//! 1. **Crash during replace** - the temp file is torn, the image is intact
//! 2. **Crash after N writes** - later writes fail, earlier ones survive
//! 3. **Damaged image** - truncation or bit rot must fail loading loudly
//!
//! ## Usage
//!
//! ```rust,ignore
//! use clinisync_testkit::crash::{write_torn_temp, CrashableBackend};
//!
//! write_torn_temp(queue_path, b"CSQ1\x01")?;
//! let backend = CrashableBackend::new(FileBackend::open(queue_path)?);
//! backend.crash_after_writes(2);
//! ```

use clinisync_storage::{StorageBackend, StorageError, StorageResult};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// A storage backend wrapper that stops accepting writes at a set point.
///
/// Clones share the crash state.
#[derive(Debug, Clone)]
pub struct CrashableBackend<B: StorageBackend> {
    inner: B,
    writes_left: Arc<AtomicUsize>,
    crashed: Arc<AtomicBool>,
}

impl<B: StorageBackend> CrashableBackend<B> {
    /// Wraps a backend that never crashes until told to.
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            writes_left: Arc::new(AtomicUsize::new(usize::MAX)),
            crashed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Lets `writes` more replaces land, then crashes.
    pub fn crash_after_writes(&self, writes: usize) {
        self.writes_left.store(writes, Ordering::SeqCst);
    }

    /// Clears the crash state.
    pub fn reset(&self) {
        self.writes_left.store(usize::MAX, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Returns the wrapped backend.
    pub fn into_inner(self) -> B {
        self.inner
    }
}

impl<B: StorageBackend> StorageBackend for CrashableBackend<B> {
    fn read_all(&self) -> StorageResult<Option<Vec<u8>>> {
        self.inner.read_all()
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        let allowed = self
            .writes_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !allowed {
            self.crashed.store(true, Ordering::SeqCst);
            return Err(StorageError::Io(std::io::Error::other(
                "simulated crash during replace",
            )));
        }
        self.inner.replace(data)
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn clear(&mut self) -> StorageResult<()> {
        self.inner.clear()
    }
}

/// Returns the temp path a file backend writes through.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Leaves a partially written temp file, as a crash mid-replace would.
pub fn write_torn_temp(path: &Path, partial: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(temp_path(path))?;
    file.write_all(partial)?;
    file.sync_all()
}

/// Cuts the image down to `len` bytes.
pub fn truncate_image(path: &Path, len: u64) -> std::io::Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(len)
}

/// Flips one bit of the image at `offset`.
pub fn flip_bit(path: &Path, offset: usize) -> std::io::Result<()> {
    let mut bytes = fs::read(path)?;
    if let Some(byte) = bytes.get_mut(offset) {
        *byte ^= 0x01;
    }
    fs::write(path, bytes)
}
