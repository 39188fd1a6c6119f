//! # txlog core
//!
//! The write-ahead transaction log of an embedded transactional storage
//! engine.
//!
//! This crate provides:
//! - A binary entry format for the six log-entry kinds ([`LogEntry`])
//! - Two ping-pong segment files plus a persistent active-segment marker
//! - Crash recovery that rebuilds in-flight transactions on open
//! - Size-triggered rotation that carries forward still-open transactions
//! - Extraction of a single transaction's entry stream, cached per transaction
//! - Backup-slave replay of foreign segments and single transactions
//!
//! The [`LogicalLog`] ties these together behind one write lock. The storage
//! engine plugs in through the collaborator traits in [`collab`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod collab;
mod config;
mod dir;
mod engine;
pub mod entry;
mod error;
mod log;
pub mod segment;
mod types;

pub use collab::{
    CommitIdAllocator, LogOwner, ResourceCoordinator, RetentionPolicy,
};
pub use config::Config;
pub use dir::LogFiles;
pub use engine::{InMemoryEngine, RecoveredState};
pub use entry::{
    CommandCodec, Decoded, EntryReader, LengthPrefixedCodec, LogEntry, Opcode, PositionedEntry,
    StopReason,
};
pub use error::{LogError, LogResult};
pub use log::{Collaborators, LogicalLog};
pub use segment::{MarkerState, SegmentHeader};
pub use types::{CommitKind, DistributedTxId, Identifier, MAX_XID_PART_LEN};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
