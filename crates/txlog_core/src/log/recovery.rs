//! Crash recovery and entry replay.
//!
//! On open, a non-empty active segment is scanned from just after its header.
//! Each entry is fed to the [`ResourceCoordinator`], which rebuilds the
//! in-memory transactions. The scan ends at the first incomplete entry or
//! `Empty` opcode; everything from there to the old end of file is zeroed and
//! the write cursor placed at the last valid entry boundary.
//!
//! Transactions left in the table afterwards reached `Start` but not `Done`.
//! Resolving them is the coordinator's business; recovery only rebuilds them.

use crate::collab::ResourceCoordinator;
use crate::entry::{EntryReader, LogEntry};
use crate::error::{LogError, LogResult};
use crate::log::logical::LogicalLog;
use crate::log::table::ActiveTransactionTable;
use crate::segment::{SegmentHeader, SegmentWriter};
use crate::types::Identifier;
use std::collections::HashSet;
use tracing::{debug, info};

/// What a replayed commit does to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ReplayMode {
    /// Local crash recovery: commits are reported with `inject_commit` and
    /// left for the transaction manager to finish.
    Recover,
    /// Backup replay: commits are applied to the engine immediately.
    Apply,
}

/// Feeds replayed entries to the coordinator and keeps the table in step.
pub(super) struct Replayer<'a> {
    coordinator: &'a dyn ResourceCoordinator,
    mode: ReplayMode,
    /// Transactions the coordinator dropped as read-only at prepare. Their
    /// trailing `Done` is expected and not an error.
    read_only: HashSet<Identifier>,
}

impl<'a> Replayer<'a> {
    pub fn new(coordinator: &'a dyn ResourceCoordinator, mode: ReplayMode) -> Self {
        Self {
            coordinator,
            mode,
            read_only: HashSet::new(),
        }
    }

    pub fn dispatch(&mut self, table: &mut ActiveTransactionTable, entry: &LogEntry) -> LogResult<()> {
        let identifier = entry.identifier();

        if let LogEntry::Start {
            xid, start_offset, ..
        } = entry
        {
            if table.contains(identifier) {
                return Err(LogError::inconsistent(format!(
                    "second Start for active {identifier}"
                )));
            }
            table.observe(identifier);
            table.insert(identifier, xid.clone(), *start_offset);
            self.read_only.remove(&identifier);
            return self.coordinator.inject_start(xid, identifier);
        }

        let Some(row) = table.get(identifier) else {
            if matches!(entry, LogEntry::Done { .. }) && self.read_only.remove(&identifier) {
                return Ok(());
            }
            return Err(LogError::inconsistent(format!(
                "{:?} for {identifier}, which has no active Start",
                entry.opcode()
            )));
        };
        let xid = row.xid.clone();

        if let Some((kind, committed_tx_id)) = entry.commit_info() {
            return match self.mode {
                ReplayMode::Recover => self.coordinator.inject_commit(&xid, kind, committed_tx_id),
                ReplayMode::Apply => self.coordinator.commit_applied(&xid, committed_tx_id),
            };
        }

        match entry {
            LogEntry::Prepare { .. } => {
                if self.coordinator.inject_prepare(&xid)? {
                    table.remove(identifier);
                    self.read_only.insert(identifier);
                }
                Ok(())
            }
            LogEntry::Command { payload, .. } => {
                self.coordinator
                    .inject_command(&xid, identifier, payload.clone())
            }
            LogEntry::Done { .. } => {
                self.coordinator.prune_xid(&xid)?;
                table.remove(identifier);
                Ok(())
            }
            LogEntry::Start { .. }
            | LogEntry::OnePhaseCommit { .. }
            | LogEntry::TwoPhaseCommit { .. } => Ok(()),
        }
    }
}

impl LogicalLog {
    /// Replays the segment behind `writer` and positions its cursor.
    pub(super) fn recover_segment(
        &self,
        writer: &mut SegmentWriter,
        table: &mut ActiveTransactionTable,
    ) -> LogResult<()> {
        info!(
            "Non clean shutdown detected on log {:?}, recovery started",
            writer.path()
        );

        let header = SegmentHeader::read_from(writer.backend())?;
        let expected = self.collab.owner.current_log_version();
        if header.version == expected + 1 {
            // The marker was flipped but the owner never advanced.
            info!(
                "Segment {:?} is one version ahead, completing interrupted rotation to {}",
                writer.path(),
                header.version
            );
            self.collab.owner.advance_log_version();
        } else if header.version != expected {
            return Err(LogError::inconsistent(format!(
                "segment {:?} has version {} but the owner is at version {}",
                writer.path(),
                header.version,
                expected
            )));
        }
        debug!(
            "Log version {} with committed tx {}",
            header.version, header.last_committed_tx
        );

        let codec = self.collab.codec.as_ref();
        let mut replayer = Replayer::new(self.collab.coordinator.as_ref(), ReplayMode::Recover);
        let mut reader = EntryReader::new(writer.backend(), codec, SegmentHeader::SIZE as u64)?;
        let mut entries = 0u64;
        while let Some(positioned) = reader.next_entry()? {
            replayer.dispatch(table, &positioned.entry)?;
            entries += 1;
        }
        let valid_end = reader.position();
        let stop = reader.stop_reason();

        let old_end = writer.file_size()?;
        writer.zero_fill(valid_end, old_end)?;
        writer.set_position(valid_end);
        writer.force()?;

        debug!(
            "Internal recovery scanned {} entries, stopped at {} ({:?}), zeroed {} bytes",
            entries,
            valid_end,
            stop,
            old_end - valid_end
        );

        self.collab.coordinator.check_xids()?;
        if table.is_empty() {
            info!("Recovery of {:?} completed", writer.path());
        } else {
            info!(
                "Recovery of {:?} found {} pending transactions",
                writer.path(),
                table.len()
            );
            for (identifier, row) in table.snapshot() {
                debug!("Pending {} {}", identifier, row.xid);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{InMemoryEngine, RecoveredState};
    use crate::types::{CommitKind, DistributedTxId};

    fn xid(n: u8) -> DistributedTxId {
        DistributedTxId::new(vec![n], vec![n], 0).unwrap()
    }

    fn start(n: u8, offset: u64) -> LogEntry {
        LogEntry::Start {
            xid: xid(n),
            identifier: Identifier::new(i32::from(n)),
            start_offset: offset,
        }
    }

    #[test]
    fn dispatch_follows_lifecycle() {
        let engine = InMemoryEngine::new();
        let mut table = ActiveTransactionTable::new();
        let mut replayer = Replayer::new(&engine, ReplayMode::Recover);
        let id = Identifier::new(1);

        replayer.dispatch(&mut table, &start(1, 16)).unwrap();
        replayer
            .dispatch(
                &mut table,
                &LogEntry::Command {
                    identifier: id,
                    payload: b"c".to_vec(),
                },
            )
            .unwrap();
        replayer
            .dispatch(&mut table, &LogEntry::commit(CommitKind::OnePhase, id, 3))
            .unwrap();

        assert_eq!(table.get(id).unwrap().start_offset, 16);
        assert_eq!(
            engine.state_of(&xid(1)),
            Some(RecoveredState::Committed {
                kind: CommitKind::OnePhase,
                committed_tx_id: 3
            })
        );

        replayer
            .dispatch(&mut table, &LogEntry::Done { identifier: id })
            .unwrap();
        assert!(table.is_empty());
        assert_eq!(engine.pruned(), vec![xid(1)]);
    }

    #[test]
    fn read_only_prepare_then_done_is_accepted() {
        let engine = InMemoryEngine::new();
        engine.mark_read_only(xid(2));
        let mut table = ActiveTransactionTable::new();
        let mut replayer = Replayer::new(&engine, ReplayMode::Recover);
        let id = Identifier::new(2);

        replayer.dispatch(&mut table, &start(2, 16)).unwrap();
        replayer
            .dispatch(&mut table, &LogEntry::Prepare { identifier: id })
            .unwrap();
        assert!(table.is_empty());
        replayer
            .dispatch(&mut table, &LogEntry::Done { identifier: id })
            .unwrap();
    }

    #[test]
    fn done_for_unknown_identifier_is_inconsistent() {
        let engine = InMemoryEngine::new();
        let mut table = ActiveTransactionTable::new();
        let mut replayer = Replayer::new(&engine, ReplayMode::Recover);

        let err = replayer
            .dispatch(
                &mut table,
                &LogEntry::Done {
                    identifier: Identifier::new(8),
                },
            )
            .unwrap_err();
        assert!(matches!(err, LogError::InconsistentState { .. }));
    }

    #[test]
    fn apply_mode_commits_immediately() {
        let engine = InMemoryEngine::new();
        let mut table = ActiveTransactionTable::new();
        let mut replayer = Replayer::new(&engine, ReplayMode::Apply);
        let id = Identifier::new(3);

        replayer.dispatch(&mut table, &start(3, 16)).unwrap();
        replayer
            .dispatch(&mut table, &LogEntry::commit(CommitKind::TwoPhase, id, 12))
            .unwrap();
        assert_eq!(engine.applied_commits(), vec![(xid(3), 12)]);
    }

    #[test]
    fn replay_continues_identifier_counter() {
        let engine = InMemoryEngine::new();
        let mut table = ActiveTransactionTable::new();
        let mut replayer = Replayer::new(&engine, ReplayMode::Recover);

        replayer.dispatch(&mut table, &start(40, 16)).unwrap();
        assert_eq!(table.allocate(), Identifier::new(41));
    }
}
