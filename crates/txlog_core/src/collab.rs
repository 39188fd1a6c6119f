//! Collaborator interfaces the log consumes.
//!
//! The log does not own transactions, commit ids or the version counter. The
//! storage engine that embeds it supplies those through these traits:
//!
//! - [`ResourceCoordinator`] rebuilds and settles transactions found in the log
//! - [`CommitIdAllocator`] reports the last committed transaction id
//! - [`LogOwner`] checkpoints the engine and owns the segment version counter
//! - [`RetentionPolicy`] decides archiving and rotation size
//!
//! The opaque command payload codec lives in [`crate::entry::CommandCodec`].

use crate::error::LogResult;
use crate::types::{CommitKind, DistributedTxId, Identifier};

/// Reconciles transactions replayed from the log with the engine.
///
/// During recovery every entry of a segment is fed through these hooks in log
/// order. Transactions that reach `Done` are pruned; the rest stay with the
/// coordinator until its owning two-phase-commit manager resolves them.
pub trait ResourceCoordinator: Send + Sync {
    /// A `Start` entry was replayed; the coordinator should create the
    /// in-memory transaction.
    fn inject_start(&self, xid: &DistributedTxId, identifier: Identifier) -> LogResult<()>;

    /// A `Command` entry was replayed for a recreated transaction.
    fn inject_command(
        &self,
        xid: &DistributedTxId,
        identifier: Identifier,
        payload: Vec<u8>,
    ) -> LogResult<()>;

    /// A `Prepare` entry was replayed.
    ///
    /// Returns `true` if the transaction turned out to be read-only, in which
    /// case the log forgets it immediately.
    fn inject_prepare(&self, xid: &DistributedTxId) -> LogResult<bool>;

    /// A commit entry was replayed.
    fn inject_commit(
        &self,
        xid: &DistributedTxId,
        kind: CommitKind,
        committed_tx_id: i64,
    ) -> LogResult<()>;

    /// A `Done` entry was replayed; the transaction is finished.
    fn prune_xid(&self, xid: &DistributedTxId) -> LogResult<()>;

    /// Called once after a recovery scan completes.
    fn check_xids(&self) -> LogResult<()>;

    /// A backup-slave replay reached a commit; apply it to the engine now.
    fn commit_applied(&self, xid: &DistributedTxId, committed_tx_id: i64) -> LogResult<()>;

    /// Drops all recovered state after a whole-segment backup apply.
    fn reset(&self) -> LogResult<()>;
}

/// Source of committed transaction ids.
pub trait CommitIdAllocator: Send + Sync {
    /// Returns the id of the last transaction the engine committed.
    fn last_committed_tx(&self) -> i64;
}

/// The engine that owns the log.
pub trait LogOwner: Send + Sync {
    /// Flushes everything the engine holds in memory so older log entries are
    /// no longer needed for recovery.
    fn checkpoint(&self) -> LogResult<()>;

    /// Returns the version number the current segment carries.
    fn current_log_version(&self) -> i64;

    /// Increments the version and returns the value it had before.
    fn advance_log_version(&self) -> i64;
}

/// Decides what happens to old segments and when rotation triggers.
pub trait RetentionPolicy: Send + Sync {
    /// Archive old segments as `<base>.v<version>` instead of deleting them.
    fn keep_logs(&self) -> bool;

    /// Whether command writes may trigger rotation.
    fn auto_rotate(&self) -> bool {
        true
    }

    /// Segment size in bytes at which rotation is considered.
    fn rotate_at_size(&self) -> u64;
}
