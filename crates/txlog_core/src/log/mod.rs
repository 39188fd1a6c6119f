//! The logical log: write protocol, recovery, rotation, extraction and
//! backup replay over the two rotating segments.
//!
//! ## Lifecycle of one transaction
//!
//! ```text
//! Absent -> Started -> (Prepared) -> Committed(1PC | 2PC) -> Done
//! ```
//!
//! `Start` creates a row in the active transaction table and `Done` removes
//! it. Everything between accumulates in the current segment; rotation copies
//! the entries of rows still present into the next segment.
//!
//! ## Concurrency
//!
//! One mutex serializes every mutation and the file I/O it performs. Reads of
//! archived segments open their own handles and take no lock.

mod apply;
mod extract;
mod logical;
mod recovery;
mod rotation;
mod table;

pub use logical::LogicalLog;

use crate::collab::{CommitIdAllocator, LogOwner, ResourceCoordinator, RetentionPolicy};
use crate::config::Config;
use crate::engine::InMemoryEngine;
use crate::entry::{CommandCodec, LengthPrefixedCodec};
use std::fmt;
use std::sync::Arc;

/// The collaborators a [`LogicalLog`] is wired to.
#[derive(Clone)]
pub struct Collaborators {
    /// Frames command payloads.
    pub codec: Arc<dyn CommandCodec>,
    /// Rebuilds and settles replayed transactions.
    pub coordinator: Arc<dyn ResourceCoordinator>,
    /// Reports the last committed transaction id.
    pub commit_ids: Arc<dyn CommitIdAllocator>,
    /// Checkpoints the engine and owns the version counter.
    pub owner: Arc<dyn LogOwner>,
    /// Archiving and rotation policy.
    pub retention: Arc<dyn RetentionPolicy>,
}

impl Collaborators {
    /// Wires every collaborator role to one [`InMemoryEngine`], with the
    /// length-prefixed codec and `config` as retention policy.
    #[must_use]
    pub fn in_memory(engine: Arc<InMemoryEngine>, config: &Config) -> Self {
        Self {
            codec: Arc::new(LengthPrefixedCodec),
            coordinator: engine.clone(),
            commit_ids: engine.clone(),
            owner: engine,
            retention: Arc::new(config.clone()),
        }
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("keep_logs", &self.retention.keep_logs())
            .field("auto_rotate", &self.retention.auto_rotate())
            .field("rotate_at_size", &self.retention.rotate_at_size())
            .finish_non_exhaustive()
    }
}
