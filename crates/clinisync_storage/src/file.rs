//! File-based storage backend for persistent storage.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A file-based storage backend.
///
/// The image lives in a single file. Replacement uses the
/// write-then-rename pattern:
///
/// 1. Write the new image to `<file>.tmp`
/// 2. `sync_all` the temporary file
/// 3. Rename it over the image file
/// 4. Fsync the parent directory so the rename itself is durable
///
/// A crash at any point leaves either the old or the new image in place.
/// A leftover temporary file from an interrupted write is removed on open.
///
/// Once the rename succeeded the new image is the one a reader sees, so a
/// failure of step 4 is logged and the replacement still reports success.
///
/// # Locking
///
/// An exclusive advisory lock on `<file>.lock` is held for the lifetime of
/// the backend, so two processes can not write the same queue.
///
/// # Example
///
/// ```no_run
/// use clinisync_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("queue.bin")).unwrap();
/// backend.replace(b"persistent image").unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    temp_path: PathBuf,
    // Held only for its lock; released when the backend is dropped.
    _lock: File,
    size: Mutex<u64>,
    #[cfg(test)]
    fail_directory_sync: bool,
}

impl FileBackend {
    /// Opens the image file at the given path, taking the process lock.
    ///
    /// The image file itself is not created until the first `replace`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another process holds the store,
    /// or an I/O error if the lock file can not be created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let lock_path = sibling(path, "lock");
        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        if lock.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked(path.to_path_buf()));
        }

        let temp_path = sibling(path, "tmp");
        match fs::remove_file(&temp_path) {
            Ok(()) => warn!(path = %temp_path.display(), "Removed leftover temporary image"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let size = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), size, "Opened file backend");

        Ok(Self {
            path: path.to_path_buf(),
            temp_path,
            _lock: lock,
            size: Mutex::new(size),
            #[cfg(test)]
            fail_directory_sync: false,
        })
    }

    /// Opens the backend, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the lock can
    /// not be taken.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path to the image file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_temp(&self, data: &[u8]) -> StorageResult<()> {
        let mut file = File::create(&self.temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        Ok(())
    }

    /// Syncs the parent directory so renames and removals are durable.
    #[cfg(unix)]
    fn sync_directory(&self) -> StorageResult<()> {
        #[cfg(test)]
        if self.fail_directory_sync {
            return Err(std::io::Error::other("injected directory sync failure").into());
        }
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        File::open(parent)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> StorageResult<()> {
        #[cfg(test)]
        if self.fail_directory_sync {
            return Err(std::io::Error::other("injected directory sync failure").into());
        }
        // NTFS journals metadata updates; directory handles can not be fsynced
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn read_all(&self) -> StorageResult<Option<Vec<u8>>> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;
        Ok(Some(buffer))
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        let mut size = self.size.lock();

        if let Err(e) = self.write_temp(data) {
            let _ = fs::remove_file(&self.temp_path);
            return Err(e);
        }

        if let Err(e) = fs::rename(&self.temp_path, &self.path) {
            let _ = fs::remove_file(&self.temp_path);
            return Err(e.into());
        }

        *size = data.len() as u64;
        if let Err(e) = self.sync_directory() {
            warn!(path = %self.path.display(), error = %e, "Image replaced but directory sync failed");
        }
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.lock())
    }

    fn clear(&mut self) -> StorageResult<()> {
        let mut size = self.size.lock();
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.sync_directory()?;
        *size = 0;
        Ok(())
    }
}

fn sibling(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}
