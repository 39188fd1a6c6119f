//! # txlog testkit
//!
//! Test utilities for the txlog transaction log.
//!
//! This crate provides:
//! - A [`TestLog`] fixture: a log in a temporary directory wired to an
//!   in-memory engine, which can be crashed and reopened
//! - Property-based generators for entries and transaction scripts
//! - Crash helpers that damage segment files the way torn writes do
//!
//! The integration tests under `tests/` exercise recovery, rotation,
//! extraction and backup replay end to end.
//!
//! ## Usage
//!
//! ```rust
//! use txlog_testkit::prelude::*;
//!
//! let mut test_log = TestLog::new();
//! let id = test_log.start(&xid(1)).unwrap();
//! test_log.write_command(id, b"a").unwrap();
//! test_log.crash();
//!
//! test_log.reopen().unwrap();
//! assert_eq!(test_log.active_transactions().len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
