//! Segment rotation.
//!
//! Rotation switches writing to the other segment file:
//!
//! 1. Checkpoint the owning engine
//! 2. Create the other segment with header `{version + 1, last committed tx}`
//! 3. Verify the outgoing segment's header still carries `version`
//! 4. Copy entries of still-active transactions, starting at the earliest
//!    active `Start`, into the new segment
//! 5. Flip the marker to the new segment
//! 6. Archive or delete the outgoing segment and advance the version
//!
//! A crash before step 5 leaves the marker on the old segment and the stale
//! new one is deleted on the next open. A crash after step 5 recovers from
//! the new segment, which already holds every carried-forward entry.
//!
//! An error before step 5 deletes the new segment again and leaves the
//! active table as it was, so the log keeps writing the old segment and a
//! later rotation can be retried. Extraction caches that predate the
//! outgoing segment are pruned once the rotation completes.

use crate::dir::LogFiles;
use crate::entry::{EntryReader, LogEntry, StopReason};
use crate::error::{LogError, LogResult};
use crate::log::logical::{LogState, LogicalLog};
use crate::log::table::ActiveTransactionTable;
use crate::segment::{MarkerState, SegmentHeader, SegmentWriter};
use crate::types::Identifier;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Entries copied into the next segment and where each carried `Start`
/// landed there.
struct CarriedForward {
    entries: u64,
    starts: Vec<(Identifier, u64)>,
}

impl LogicalLog {
    pub(super) fn rotate_locked(&self, state: &mut LogState) -> LogResult<()> {
        self.collab.owner.checkpoint()?;

        let current = state.marker.state().unwrap_or(MarkerState::Clean);
        let next = current.other();
        let next_number = next.segment_number().unwrap_or(1);
        let next_path = self.files.segment_path(next_number);
        let version = self.collab.owner.current_log_version();
        let archive = self.files.archive_path(version);

        if next_path.exists() {
            return Err(LogError::inconsistent(format!(
                "new segment {} already exists",
                next_path.display()
            )));
        }
        if archive.exists() {
            return Err(LogError::inconsistent(format!(
                "archive {} already exists",
                archive.display()
            )));
        }

        let end_position = state.writer()?.position();
        let (next_writer, carried, outgoing_header) =
            match self.prepare_next_segment(state, &next_path, next_number, version) {
                Ok(prepared) => prepared,
                Err(e) => {
                    self.discard_next_segment(&next_path);
                    return Err(e);
                }
            };

        if let Err(e) = state.marker.set(next) {
            drop(next_writer);
            self.discard_next_segment(&next_path);
            return Err(e);
        }
        for (identifier, offset) in &carried.starts {
            state.table.set_start_offset(*identifier, *offset);
        }

        let Some(old_writer) = state.writer.replace(next_writer) else {
            return Err(LogError::LogClosed);
        };
        let old_path = old_writer.path().to_path_buf();
        drop(old_writer);

        if self.keeps_logs(state.backup_slave) {
            self.archive_segment(&old_path, end_position)?;
        } else {
            fs::remove_file(&old_path)?;
            self.collab.owner.advance_log_version();
            self.files.sync_directory()?;
        }

        let now = self.collab.owner.current_log_version();
        if now != version + 1 {
            return Err(LogError::inconsistent(format!(
                "owner version is {now} after rotating from {version}"
            )));
        }

        self.prune_caches(&state.table, outgoing_header.last_committed_tx);
        info!(
            "Rotated log {:?} from version {} to {}, carried forward {} entries of {} active transactions",
            self.files.base(),
            version,
            now,
            carried.entries,
            state.table.len()
        );
        Ok(())
    }

    /// Creates the next segment, checks the outgoing header and copies the
    /// active transactions over. Leaves the log state untouched.
    fn prepare_next_segment(
        &self,
        state: &mut LogState,
        next_path: &Path,
        next_number: u8,
        version: i64,
    ) -> LogResult<(SegmentWriter, CarriedForward, SegmentHeader)> {
        let LogState { writer, table, .. } = state;
        let writer = writer.as_mut().ok_or(LogError::LogClosed)?;
        let end_position = writer.position();
        writer.force()?;

        let mut next_writer =
            SegmentWriter::open(next_path, next_number, self.config.sync_on_force)?;
        next_writer.write_header(self.fresh_header(1))?;

        let header = SegmentHeader::read_from(writer.backend())?;
        if header.version != version {
            return Err(LogError::inconsistent(format!(
                "segment {:?} has version {} but version {} was expected",
                writer.path(),
                header.version,
                version
            )));
        }

        let scan_from = table.earliest_start().unwrap_or(end_position);
        let carried = self.carry_forward(writer, table, &mut next_writer, scan_from, end_position)?;
        next_writer.force()?;
        Ok((next_writer, carried, header))
    }

    fn discard_next_segment(&self, path: &Path) {
        if let Err(e) = LogFiles::remove_if_exists(path) {
            warn!("Unable to delete unfinished segment {:?}: {}", path, e);
        }
    }

    /// Copies entries of active transactions from `[from, to)` of `source`
    /// into `target`.
    fn carry_forward(
        &self,
        source: &SegmentWriter,
        table: &ActiveTransactionTable,
        target: &mut SegmentWriter,
        from: u64,
        to: u64,
    ) -> LogResult<CarriedForward> {
        let codec = self.collab.codec.as_ref();
        let mut reader = EntryReader::bounded(source.backend(), codec, from, to);
        let mut carried = CarriedForward {
            entries: 0,
            starts: Vec::new(),
        };
        while let Some(positioned) = reader.next_entry()? {
            let identifier = positioned.entry.identifier();
            if !table.contains(identifier) {
                continue;
            }

            match &positioned.entry {
                LogEntry::Done { .. } => {
                    return Err(LogError::inconsistent(format!(
                        "Done at offset {} for {identifier}, which is still active",
                        positioned.offset
                    )));
                }
                LogEntry::Start { .. } => {
                    let offset = target.append_entry(&positioned.entry, codec)?;
                    carried.starts.push((identifier, offset));
                }
                _ => {
                    target.append_entry(&positioned.entry, codec)?;
                }
            }
            carried.entries += 1;
        }

        if reader.stop_reason() != Some(StopReason::EndOfData) {
            return Err(LogError::inconsistent(format!(
                "segment ends at {} before its write position {to}",
                reader.position()
            )));
        }
        debug!("Carried forward {} entries from [{}, {})", carried.entries, from, to);
        Ok(carried)
    }

    /// Deletes extraction caches that can no longer be asked for: committed
    /// caches at or below `committed_before`, which predate the outgoing
    /// segment, and prepared caches of identifiers no longer active.
    fn prune_caches(&self, table: &ActiveTransactionTable, committed_before: i64) {
        let stale = self.files.tx_cache_ids().map(|ids| {
            ids.into_iter()
                .filter(|tx| *tx <= committed_before)
                .map(|tx| self.files.tx_cache_path(tx))
                .collect::<Vec<_>>()
        });
        let orphaned = self.files.ptx_cache_identifiers().map(|ids| {
            ids.into_iter()
                .filter(|id| !table.contains(*id))
                .map(|id| self.files.ptx_cache_path(id))
                .collect::<Vec<_>>()
        });

        for listed in [stale, orphaned] {
            let paths = match listed {
                Ok(paths) => paths,
                Err(e) => {
                    warn!("Unable to list extraction caches: {}", e);
                    continue;
                }
            };
            for path in paths {
                match LogFiles::remove_if_exists(&path) {
                    Ok(()) => debug!("Pruned extraction cache {:?}", path),
                    Err(e) => warn!("Unable to delete extraction cache {:?}: {}", path, e),
                }
            }
        }
    }
}
