//! Backup-slave replay of foreign log streams.
//!
//! A backup slave does not originate transactions. It catches up in one of
//! three ways:
//!
//! - replaying a whole foreign segment, which must carry exactly the version
//!   the slave is at
//! - applying one extracted transaction under a commit id the caller supplies
//! - copying one extracted transaction together with its own commit entry
//!
//! Every stream is decoded and checked in full before anything reaches the
//! engine or the local segment, so a truncated copy can simply be retried.

use crate::entry::{EntryReader, LogEntry, StopReason};
use crate::error::{LogError, LogResult};
use crate::log::logical::{LogState, LogicalLog};
use crate::log::recovery::{ReplayMode, Replayer};
use crate::log::table::ActiveTransactionTable;
use crate::segment::{SegmentHeader, SegmentWriter};
use crate::types::{CommitKind, DistributedTxId, Identifier};
use std::io::Read;
use tracing::{debug, info, warn};
use txlog_storage::InMemoryBackend;

/// One foreign transaction, decoded but not yet applied.
struct ForeignTransaction {
    xid: DistributedTxId,
    /// `Start`, commands and `Prepare`, in stream order.
    entries: Vec<LogEntry>,
    /// The stream's own commit entry, if it has one.
    commit: Option<(CommitKind, i64)>,
}

impl LogicalLog {
    /// Replays a complete foreign segment (header included) into the engine.
    ///
    /// Nothing is appended to the local segment. Afterwards the engine is
    /// checkpointed, its version advanced past the applied segment, and the
    /// local segment restarted empty under the new version.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The log is not a backup slave or has active transactions (`PolicyViolation`)
    /// - The header is short or an entry is truncated (`InvalidFormat`)
    /// - The segment's version is not the current one (`VersionMismatch`)
    pub fn apply_segment(&self, source: &mut dyn Read) -> LogResult<()> {
        let mut state = self.state.lock();
        state.writer()?;
        if !state.backup_slave {
            return Err(LogError::policy_violation("this log is not a backup slave"));
        }
        if !state.table.is_empty() {
            return Err(LogError::policy_violation(format!(
                "cannot apply a segment with {} active transactions",
                state.table.len()
            )));
        }

        let mut bytes = Vec::new();
        source.read_to_end(&mut bytes)?;
        let header = SegmentHeader::decode(&bytes)?;
        let expected = self.collab.owner.current_log_version();
        if header.version != expected {
            return Err(LogError::VersionMismatch {
                expected,
                actual: header.version,
            });
        }
        debug!(
            "Applying log version {} (previous committed tx {})",
            header.version, header.last_committed_tx
        );

        let entries = self.decode_all(bytes, SegmentHeader::SIZE as u64)?;

        // Transactions still open at the end of the segment are dropped with
        // the scratch table; the live table stays empty throughout.
        let mut scratch = ActiveTransactionTable::new();
        let mut replayer = Replayer::new(self.collab.coordinator.as_ref(), ReplayMode::Apply);
        for entry in &entries {
            if let Err(e) = replayer.dispatch(&mut scratch, entry) {
                if let Err(reset) = self.collab.coordinator.reset() {
                    warn!("Unable to reset the engine after a failed replay: {}", reset);
                }
                return Err(e);
            }
        }

        self.collab.owner.checkpoint()?;
        self.collab.owner.advance_log_version();
        self.collab.coordinator.reset()?;

        // Restart the local segment at the new version so its header agrees
        // with the owner on the next open.
        let fresh = self.fresh_header(0);
        let writer = state.writer_mut()?;
        let end = writer.position();
        writer.zero_fill(SegmentHeader::SIZE as u64, end)?;
        writer.write_header(fresh)?;
        writer.force()?;
        info!(
            "Log {:?} version {} applied successfully ({} entries)",
            self.files.base(),
            header.version,
            entries.len()
        );
        Ok(())
    }

    /// Applies one extracted transaction and commits it as `committed_tx_id`.
    ///
    /// The stream is what [`LogicalLog::extract_by_tx_id`] returns: no header,
    /// starting with `Start`. Its entries are restamped with a fresh local
    /// identifier and appended to the local segment; foreign commit and
    /// `Done` entries are replaced by local ones.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The log is not a backup slave (`PolicyViolation`)
    /// - `committed_tx_id` does not follow the last committed tx (`UnexpectedCommitId`)
    /// - The stream does not begin with `Start` or is truncated (`InvalidFormat`)
    pub fn apply_single_transaction(
        &self,
        source: &mut dyn Read,
        committed_tx_id: i64,
    ) -> LogResult<()> {
        let mut state = self.state.lock();
        state.writer()?;
        if !state.backup_slave {
            return Err(LogError::policy_violation("this log is not a backup slave"));
        }
        self.check_next_commit(committed_tx_id)?;

        let foreign = self.read_transaction(source)?;
        let identifier =
            self.append_foreign(&mut state, foreign, CommitKind::OnePhase, committed_tx_id)?;
        info!("Tx {} applied successfully as {}", committed_tx_id, identifier);
        Ok(())
    }

    /// Copies one extracted transaction, commit entry included.
    ///
    /// Unlike [`LogicalLog::apply_single_transaction`] the committed tx id
    /// and commit kind come from the stream itself. The entries are
    /// restamped with a fresh local identifier; a local `Done` closes them.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The log is not a backup slave (`PolicyViolation`)
    /// - The stream does not begin with `Start`, is truncated or has no
    ///   commit entry (`InvalidFormat`)
    /// - Its committed tx id does not follow the last committed tx
    ///   (`UnexpectedCommitId`)
    pub fn apply_transaction(&self, source: &mut dyn Read) -> LogResult<()> {
        let mut state = self.state.lock();
        state.writer()?;
        if !state.backup_slave {
            return Err(LogError::policy_violation("this log is not a backup slave"));
        }

        let foreign = self.read_transaction(source)?;
        let Some((kind, committed_tx_id)) = foreign.commit else {
            return Err(LogError::invalid_format(format!(
                "transaction stream for {} has no commit entry",
                foreign.xid
            )));
        };
        self.check_next_commit(committed_tx_id)?;

        let identifier = self.append_foreign(&mut state, foreign, kind, committed_tx_id)?;
        info!("Tx {} copied successfully as {}", committed_tx_id, identifier);
        Ok(())
    }

    fn check_next_commit(&self, committed_tx_id: i64) -> LogResult<()> {
        let expected = self.collab.commit_ids.last_committed_tx() + 1;
        if committed_tx_id == expected {
            Ok(())
        } else {
            Err(LogError::UnexpectedCommitId {
                expected,
                actual: committed_tx_id,
            })
        }
    }

    /// Decodes every entry of `bytes` from `from` on, failing on a torn tail.
    fn decode_all(&self, bytes: Vec<u8>, from: u64) -> LogResult<Vec<LogEntry>> {
        let backend = InMemoryBackend::with_data(bytes);
        let mut reader = EntryReader::new(&backend, self.collab.codec.as_ref(), from)?;
        let mut entries = Vec::new();
        while let Some(positioned) = reader.next_entry()? {
            entries.push(positioned.entry);
        }
        if reader.stop_reason() == Some(StopReason::Incomplete) {
            return Err(LogError::invalid_format(format!(
                "stream ends inside an entry at offset {}",
                reader.position()
            )));
        }
        Ok(entries)
    }

    fn read_transaction(&self, source: &mut dyn Read) -> LogResult<ForeignTransaction> {
        let mut bytes = Vec::new();
        source.read_to_end(&mut bytes)?;

        let mut xid: Option<DistributedTxId> = None;
        let mut entries = Vec::new();
        let mut commit = None;
        for entry in self.decode_all(bytes, 0)? {
            if let LogEntry::Start { xid: start_xid, .. } = &entry {
                if xid.is_some() {
                    return Err(LogError::invalid_format(
                        "transaction stream has a second Start",
                    ));
                }
                xid = Some(start_xid.clone());
            } else if xid.is_none() {
                return Err(LogError::invalid_format(format!(
                    "transaction stream begins with {:?} instead of Start",
                    entry.opcode()
                )));
            }

            if let Some(info) = entry.commit_info() {
                commit = Some(info);
            } else if !matches!(entry, LogEntry::Done { .. }) {
                entries.push(entry);
            }
        }

        let Some(xid) = xid else {
            return Err(LogError::invalid_format("transaction stream has no Start"));
        };
        Ok(ForeignTransaction {
            xid,
            entries,
            commit,
        })
    }

    /// Writes `foreign` under a fresh identifier, commits it and closes it
    /// with `Done`. If anything fails before the commit entry is durable the
    /// local segment and the table are put back as they were.
    fn append_foreign(
        &self,
        state: &mut LogState,
        foreign: ForeignTransaction,
        kind: CommitKind,
        committed_tx_id: i64,
    ) -> LogResult<Identifier> {
        let codec = self.collab.codec.as_ref();
        let LogState { writer, table, .. } = state;
        let writer = writer.as_mut().ok_or(LogError::LogClosed)?;
        let rollback_to = writer.position();
        let identifier = table.allocate();

        let ForeignTransaction { xid, entries, .. } = foreign;
        let commit = LogEntry::commit(kind, identifier, committed_tx_id);
        if let Err(e) = self.write_foreign(writer, table, identifier, entries, &commit) {
            self.undo_foreign(writer, table, identifier, &xid, rollback_to);
            return Err(e);
        }

        self.collab.coordinator.commit_applied(&xid, committed_tx_id)?;
        writer.append_entry(&LogEntry::Done { identifier }, codec)?;
        table.remove(identifier);
        self.collab.coordinator.prune_xid(&xid)?;
        Ok(identifier)
    }

    fn write_foreign(
        &self,
        writer: &mut SegmentWriter,
        table: &mut ActiveTransactionTable,
        identifier: Identifier,
        entries: Vec<LogEntry>,
        commit: &LogEntry,
    ) -> LogResult<()> {
        let codec = self.collab.codec.as_ref();
        let mut replayer = Replayer::new(self.collab.coordinator.as_ref(), ReplayMode::Apply);
        for mut entry in entries {
            entry.set_identifier(identifier);
            let offset = writer.append_entry(&entry, codec)?;
            if let LogEntry::Start { start_offset, .. } = &mut entry {
                *start_offset = offset;
            }
            replayer.dispatch(table, &entry)?;
        }
        if !table.contains(identifier) {
            return Err(LogError::inconsistent(format!(
                "{identifier} was dropped as read-only and cannot be committed"
            )));
        }

        writer.append_entry(commit, codec)?;
        writer.force()
    }

    fn undo_foreign(
        &self,
        writer: &mut SegmentWriter,
        table: &mut ActiveTransactionTable,
        identifier: Identifier,
        xid: &DistributedTxId,
        rollback_to: u64,
    ) {
        let end = writer.position();
        if let Err(e) = writer.zero_fill(rollback_to, end) {
            warn!("Unable to clear [{}, {}) after a failed apply: {}", rollback_to, end, e);
        }
        writer.set_position(rollback_to);
        if let Err(e) = writer.force() {
            warn!("Unable to force the segment after a failed apply: {}", e);
        }
        if table.remove(identifier).is_some() {
            if let Err(e) = self.collab.coordinator.prune_xid(xid) {
                warn!("Unable to forget {} after a failed apply: {}", xid, e);
            }
        }
    }
}
