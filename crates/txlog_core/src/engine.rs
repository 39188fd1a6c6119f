//! In-memory reference engine.
//!
//! [`InMemoryEngine`] implements every collaborator trait the log needs except
//! the command codec. It records what recovery and replay told it, which makes
//! it the engine of choice for tests and for experimenting with the log
//! without a real storage engine behind it.

use crate::collab::{CommitIdAllocator, LogOwner, ResourceCoordinator};
use crate::error::{LogError, LogResult};
use crate::types::{CommitKind, DistributedTxId, Identifier};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// How far a recreated transaction got before the log ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveredState {
    /// `Start` seen, no prepare or commit.
    Started,
    /// `Prepare` seen; waiting for the coordinator's decision.
    Prepared,
    /// A commit entry was seen but not `Done`.
    Committed {
        /// Which commit protocol was used.
        kind: CommitKind,
        /// The committed transaction id.
        committed_tx_id: i64,
    },
}

#[derive(Debug)]
struct TrackedTx {
    identifier: Identifier,
    state: RecoveredState,
    commands: Vec<Vec<u8>>,
}

/// A collaborator engine that keeps everything in memory.
#[derive(Debug, Default)]
pub struct InMemoryEngine {
    last_committed: AtomicI64,
    version: AtomicI64,
    checkpoints: AtomicU64,
    check_xids_calls: AtomicU64,
    transactions: Mutex<HashMap<DistributedTxId, TrackedTx>>,
    read_only: Mutex<HashSet<DistributedTxId>>,
    pruned: Mutex<Vec<DistributedTxId>>,
    applied: Mutex<Vec<(DistributedTxId, i64)>>,
}

impl InMemoryEngine {
    /// Creates an engine at version 0 with no committed transactions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an engine with a preset version and last committed tx.
    #[must_use]
    pub fn with_state(version: i64, last_committed_tx: i64) -> Self {
        let engine = Self::default();
        engine.version.store(version, Ordering::SeqCst);
        engine.last_committed.store(last_committed_tx, Ordering::SeqCst);
        engine
    }

    /// Records that the engine has committed `tx_id`.
    pub fn set_last_committed_tx(&self, tx_id: i64) {
        self.last_committed.store(tx_id, Ordering::SeqCst);
    }

    /// Makes a later `inject_prepare` for `xid` report a read-only transaction.
    pub fn mark_read_only(&self, xid: DistributedTxId) {
        self.read_only.lock().insert(xid);
    }

    /// Returns the recovered state of `xid`, if the engine still tracks it.
    #[must_use]
    pub fn state_of(&self, xid: &DistributedTxId) -> Option<RecoveredState> {
        self.transactions.lock().get(xid).map(|tx| tx.state)
    }

    /// Returns the command payloads replayed for `xid`.
    #[must_use]
    pub fn commands_of(&self, xid: &DistributedTxId) -> Vec<Vec<u8>> {
        self.transactions
            .lock()
            .get(xid)
            .map(|tx| tx.commands.clone())
            .unwrap_or_default()
    }

    /// Returns every tracked transaction, sorted by identifier.
    #[must_use]
    pub fn tracked(&self) -> Vec<(Identifier, DistributedTxId, RecoveredState)> {
        let mut all: Vec<_> = self
            .transactions
            .lock()
            .iter()
            .map(|(xid, tx)| (tx.identifier, xid.clone(), tx.state))
            .collect();
        all.sort_by_key(|(identifier, _, _)| *identifier);
        all
    }

    /// Returns the xids pruned by `Done` entries, in replay order.
    #[must_use]
    pub fn pruned(&self) -> Vec<DistributedTxId> {
        self.pruned.lock().clone()
    }

    /// Returns the commits applied through backup replay, in order.
    #[must_use]
    pub fn applied_commits(&self) -> Vec<(DistributedTxId, i64)> {
        self.applied.lock().clone()
    }

    /// Number of checkpoints requested by the log.
    #[must_use]
    pub fn checkpoint_count(&self) -> u64 {
        self.checkpoints.load(Ordering::SeqCst)
    }

    /// Number of completed recovery scans.
    #[must_use]
    pub fn check_xids_count(&self) -> u64 {
        self.check_xids_calls.load(Ordering::SeqCst)
    }

    fn with_tx<T>(
        &self,
        xid: &DistributedTxId,
        f: impl FnOnce(&mut TrackedTx) -> T,
    ) -> LogResult<T> {
        let mut transactions = self.transactions.lock();
        let tx = transactions
            .get_mut(xid)
            .ok_or_else(|| LogError::inconsistent(format!("{xid} was never started")))?;
        Ok(f(tx))
    }
}

impl ResourceCoordinator for InMemoryEngine {
    fn inject_start(&self, xid: &DistributedTxId, identifier: Identifier) -> LogResult<()> {
        self.transactions.lock().insert(
            xid.clone(),
            TrackedTx {
                identifier,
                state: RecoveredState::Started,
                commands: Vec::new(),
            },
        );
        Ok(())
    }

    fn inject_command(
        &self,
        xid: &DistributedTxId,
        _identifier: Identifier,
        payload: Vec<u8>,
    ) -> LogResult<()> {
        self.with_tx(xid, |tx| tx.commands.push(payload))
    }

    fn inject_prepare(&self, xid: &DistributedTxId) -> LogResult<bool> {
        if self.read_only.lock().contains(xid) {
            self.transactions.lock().remove(xid);
            return Ok(true);
        }
        self.with_tx(xid, |tx| tx.state = RecoveredState::Prepared)?;
        Ok(false)
    }

    fn inject_commit(
        &self,
        xid: &DistributedTxId,
        kind: CommitKind,
        committed_tx_id: i64,
    ) -> LogResult<()> {
        self.with_tx(xid, |tx| {
            tx.state = RecoveredState::Committed {
                kind,
                committed_tx_id,
            }
        })
    }

    fn prune_xid(&self, xid: &DistributedTxId) -> LogResult<()> {
        self.transactions.lock().remove(xid);
        self.pruned.lock().push(xid.clone());
        Ok(())
    }

    fn check_xids(&self) -> LogResult<()> {
        self.check_xids_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn commit_applied(&self, xid: &DistributedTxId, committed_tx_id: i64) -> LogResult<()> {
        self.with_tx(xid, |tx| {
            tx.state = RecoveredState::Committed {
                kind: CommitKind::OnePhase,
                committed_tx_id,
            }
        })?;
        self.last_committed.store(committed_tx_id, Ordering::SeqCst);
        self.applied.lock().push((xid.clone(), committed_tx_id));
        Ok(())
    }

    fn reset(&self) -> LogResult<()> {
        self.transactions.lock().clear();
        Ok(())
    }
}

impl CommitIdAllocator for InMemoryEngine {
    fn last_committed_tx(&self) -> i64 {
        self.last_committed.load(Ordering::SeqCst)
    }
}

impl LogOwner for InMemoryEngine {
    fn checkpoint(&self) -> LogResult<()> {
        self.checkpoints.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn current_log_version(&self) -> i64 {
        self.version.load(Ordering::SeqCst)
    }

    fn advance_log_version(&self) -> i64 {
        self.version.fetch_add(1, Ordering::SeqCst)
    }
}
