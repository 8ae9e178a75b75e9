//! # ClinicSync Storage
//!
//! Storage backend trait and implementations for the ClinicSync offline
//! operation queue.
//!
//! Storage backends are **opaque blob stores** - they hold exactly one
//! byte image and do not interpret it. The queue owns the image format.
//!
//! ## Design Principles
//!
//! - A backend holds a single image that is replaced as a whole
//! - `replace` is atomic: after a crash either the new image or the
//!   previous one is visible, never a mix
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing, with write-failure injection
//! - [`FileBackend`] - For persistent storage (write-temp, fsync, rename)
//!
//! ## Example
//!
//! ```rust
//! use clinisync_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! assert!(backend.read_all().unwrap().is_none());
//! backend.replace(b"queue image").unwrap();
//! assert_eq!(backend.read_all().unwrap().as_deref(), Some(&b"queue image"[..]));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
