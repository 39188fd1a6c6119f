//! # txlog storage
//!
//! Byte-store backends underneath the txlog transaction log.
//!
//! Backends are **opaque byte stores**: they read, write, append, flush and
//! truncate bytes. They know nothing about log entries, segment headers or the
//! active-segment marker; `txlog_core` owns every file format.
//!
//! Unlike a purely append-only store, a backend also supports positioned
//! writes. The log needs them to zero-fill a crash-damaged tail and to keep
//! writing from the last valid entry boundary, which may sit below the
//! physical end of the file.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests and scratch buffers
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use txlog_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! backend.write_at(6, b"there").unwrap();
//! assert_eq!(backend.read_at(offset, 11).unwrap(), b"hello there");
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
