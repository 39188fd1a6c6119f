//! The logical log and its write protocol.

use crate::config::Config;
use crate::dir::LogFiles;
use crate::entry::LogEntry;
use crate::error::{LogError, LogResult};
use crate::log::table::ActiveTransactionTable;
use crate::log::Collaborators;
use crate::segment::{ActiveSegmentMarker, MarkerState, SegmentHeader, SegmentWriter};
use crate::types::{CommitKind, DistributedTxId, Identifier};
use parking_lot::Mutex;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use txlog_storage::{FileBackend, StorageBackend};

/// Mutable log state, guarded by the log-wide mutex.
pub(super) struct LogState {
    pub marker: ActiveSegmentMarker,
    /// The open segment; `None` once the log is closed.
    pub writer: Option<SegmentWriter>,
    pub table: ActiveTransactionTable,
    pub backup_slave: bool,
    /// Held for as long as the log is open.
    pub lock: Option<File>,
}

impl LogState {
    pub fn writer_mut(&mut self) -> LogResult<&mut SegmentWriter> {
        self.writer.as_mut().ok_or(LogError::LogClosed)
    }

    pub fn writer(&self) -> LogResult<&SegmentWriter> {
        self.writer.as_ref().ok_or(LogError::LogClosed)
    }

    fn require_active(&self, identifier: Identifier) -> LogResult<()> {
        if self.table.contains(identifier) {
            Ok(())
        } else {
            Err(LogError::UnknownIdentifier {
                identifier: identifier.as_i32(),
            })
        }
    }
}

/// The write-ahead transaction log.
///
/// Durably records every transaction's start, commands, prepare and commit
/// decision in one of two rotating segment files. On open it recovers
/// transactions a crash left unfinished; before command writes it rotates the
/// segment once it grows past the configured size.
///
/// All mutating operations serialize on one mutex. Archived segments can be
/// read concurrently through [`LogicalLog::open_logical_log`].
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use txlog_core::{Collaborators, Config, DistributedTxId, InMemoryEngine, LogicalLog};
///
/// let config = Config::default();
/// let engine = Arc::new(InMemoryEngine::new());
/// let log = LogicalLog::open(
///     "data/tx.log",
///     config.clone(),
///     Collaborators::in_memory(engine, &config),
/// )?;
///
/// let xid = DistributedTxId::new(b"global".to_vec(), b"branch".to_vec(), 1)?;
/// let id = log.start(&xid)?;
/// log.write_command(id, b"create node 1")?;
/// log.commit_one_phase(id, 1)?;
/// log.done(id)?;
/// log.close()?;
/// # Ok::<(), txlog_core::LogError>(())
/// ```
pub struct LogicalLog {
    pub(super) files: LogFiles,
    pub(super) config: Config,
    pub(super) collab: Collaborators,
    pub(super) state: Mutex<LogState>,
}

impl LogicalLog {
    /// Opens the log at base path `base`, recovering the active segment if
    /// the previous run did not close cleanly.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another process holds the log (`LogLocked`)
    /// - The marker points at a missing segment (`InconsistentState`)
    /// - The marker or a segment is malformed (`InvalidFormat`)
    /// - I/O errors occur
    pub fn open(
        base: impl Into<PathBuf>,
        config: Config,
        collab: Collaborators,
    ) -> LogResult<Self> {
        let files = LogFiles::new(base);
        let lock = files.lock()?;
        let marker = ActiveSegmentMarker::load(&files.marker_path())?;

        let log = Self {
            state: Mutex::new(LogState {
                marker,
                writer: None,
                table: ActiveTransactionTable::new(),
                backup_slave: config.backup_slave,
                lock: Some(lock),
            }),
            files,
            config,
            collab,
        };

        {
            let mut state = log.state.lock();
            log.open_active_segment(&mut state)?;
        }
        Ok(log)
    }

    fn open_active_segment(&self, state: &mut LogState) -> LogResult<()> {
        match state.marker.state() {
            None => {
                self.open_segment(state, 1)?;
                state.marker.set(MarkerState::Segment1)?;
            }
            Some(MarkerState::Clean) => {
                for number in [1, 2] {
                    let leftover = self.files.segment_path(number);
                    if leftover.exists() {
                        self.settle_leftover(&leftover)?;
                    }
                }
                self.open_segment(state, 1)?;
                state.marker.set(MarkerState::Segment1)?;
            }
            Some(active) => {
                let number = active.segment_number().unwrap_or(1);
                let path = self.files.segment_path(number);
                if !path.exists() {
                    return Err(LogError::inconsistent(format!(
                        "marker names segment {number} but {} does not exist",
                        path.display()
                    )));
                }
                let stale = self.files.segment_path(active.other().segment_number().unwrap_or(2));
                if stale.exists() {
                    if let Err(e) = fs::remove_file(&stale) {
                        warn!("Unable to delete stale segment {:?}: {}", stale, e);
                    }
                }
                self.open_segment(state, number)?;
            }
        }
        Ok(())
    }

    /// A segment left behind although the marker says clean: the process
    /// died between marking clean and removing it.
    fn settle_leftover(&self, path: &Path) -> LogResult<()> {
        let len = fs::metadata(path)?.len();
        if self.keeps_logs(false) && len >= SegmentHeader::SIZE as u64 {
            info!("Archiving segment {:?} left behind by a clean close", path);
            self.archive_segment(path, len)
        } else {
            fs::remove_file(path)?;
            Ok(())
        }
    }

    fn open_segment(&self, state: &mut LogState, number: u8) -> LogResult<()> {
        let path = self.files.segment_path(number);
        let mut writer = SegmentWriter::open(&path, number, self.config.sync_on_force)?;
        let size = writer.file_size()?;

        if size >= SegmentHeader::SIZE as u64 {
            self.recover_segment(&mut writer, &mut state.table)?;
        } else {
            if size > 0 {
                drop(writer);
                let aside = LogFiles::moved_aside_path(&path);
                fs::rename(&path, &aside)?;
                warn!(
                    "Segment {:?} has no readable header ({} bytes), moved aside to {:?}",
                    path, size, aside
                );
                writer = SegmentWriter::open(&path, number, self.config.sync_on_force)?;
            }
            writer.write_header(self.fresh_header(0))?;
            writer.force()?;
        }

        state.writer = Some(writer);
        Ok(())
    }

    /// Header for a new segment `version_offset` versions past the current.
    pub(super) fn fresh_header(&self, version_offset: i64) -> SegmentHeader {
        SegmentHeader::new(
            self.collab.owner.current_log_version() + version_offset,
            self.collab.commit_ids.last_committed_tx(),
        )
    }

    pub(super) fn keeps_logs(&self, backup_slave: bool) -> bool {
        self.collab.retention.keep_logs() && !backup_slave
    }

    /// Renames `path` to the archive of the current version, truncates it to
    /// `end_position` and advances the version.
    pub(super) fn archive_segment(&self, path: &Path, end_position: u64) -> LogResult<()> {
        let version = self.collab.owner.current_log_version();
        let archive = self.files.archive_path(version);
        if archive.exists() {
            return Err(LogError::inconsistent(format!(
                "archive {} already exists",
                archive.display()
            )));
        }

        fs::rename(path, &archive)?;
        let mut backend = FileBackend::open(&archive)?;
        if backend.size()? > end_position {
            backend.truncate(end_position)?;
        }
        drop(backend);

        self.collab.owner.advance_log_version();
        self.files.sync_directory()?;
        debug!("Archived {:?} as version {}", path, version);
        Ok(())
    }

    /// Closes the log.
    ///
    /// With transactions still active the segment is synced and released but
    /// left marked active, so the next open recovers them. Otherwise the
    /// marker is set clean and the segment archived or deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if syncing, the marker update or archiving fails.
    pub fn close(&self) -> LogResult<()> {
        let mut state = self.state.lock();
        let Some(mut writer) = state.writer.take() else {
            debug!("Log {:?} already closed", self.files.base());
            return Ok(());
        };

        if !state.table.is_empty() {
            writer.sync()?;
            drop(writer);
            state.lock = None;
            info!(
                "Closing log {:?} with {} active transactions; they will be recovered on next open",
                self.files.base(),
                state.table.len()
            );
            return Ok(());
        }

        let end_position = writer.position();
        let path = writer.path().to_path_buf();
        writer.sync()?;
        drop(writer);

        state.marker.set(MarkerState::Clean)?;
        if self.keeps_logs(state.backup_slave) {
            self.archive_segment(&path, end_position)?;
        } else {
            fs::remove_file(&path)?;
            self.files.sync_directory()?;
        }

        state.lock = None;
        info!("Closed log {:?}", self.files.base());
        Ok(())
    }

    /// Returns true until [`LogicalLog::close`] has been called.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.lock().writer.is_some()
    }

    /// Starts a transaction and returns its log-local identifier.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::PolicyViolation`] on a backup slave, or an I/O error.
    pub fn start(&self, xid: &DistributedTxId) -> LogResult<Identifier> {
        let mut state = self.state.lock();
        if state.backup_slave {
            return Err(LogError::policy_violation(
                "a backup slave does not start transactions",
            ));
        }
        state.writer()?;

        let identifier = state.table.allocate();
        let entry = LogEntry::Start {
            xid: xid.clone(),
            identifier,
            start_offset: 0,
        };
        let offset = state
            .writer_mut()?
            .append_entry(&entry, self.collab.codec.as_ref())?;
        state.table.insert(identifier, xid.clone(), offset);
        Ok(identifier)
    }

    /// Appends a command, rotating first if the segment has grown too large.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::UnknownIdentifier`] if the transaction is not
    /// active, or an error from rotation or the write.
    pub fn write_command(&self, identifier: Identifier, payload: &[u8]) -> LogResult<()> {
        let mut state = self.state.lock();
        state.writer()?;
        state.require_active(identifier)?;

        self.rotate_if_needed(&mut state)?;

        let entry = LogEntry::Command {
            identifier,
            payload: payload.to_vec(),
        };
        state
            .writer_mut()?
            .append_entry(&entry, self.collab.codec.as_ref())?;
        Ok(())
    }

    /// Appends `Prepare` and forces the segment: the 2PC durability point.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::UnknownIdentifier`] if the transaction is not
    /// active, or an I/O error.
    pub fn prepare(&self, identifier: Identifier) -> LogResult<()> {
        self.append_forced(identifier, LogEntry::Prepare { identifier })
    }

    /// Appends a one-phase commit and forces the segment.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::UnknownIdentifier`] if the transaction is not
    /// active, or an I/O error.
    pub fn commit_one_phase(&self, identifier: Identifier, committed_tx_id: i64) -> LogResult<()> {
        self.append_forced(
            identifier,
            LogEntry::commit(CommitKind::OnePhase, identifier, committed_tx_id),
        )
    }

    /// Appends a two-phase commit and forces the segment.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::UnknownIdentifier`] if the transaction is not
    /// active, or an I/O error.
    pub fn commit_two_phase(&self, identifier: Identifier, committed_tx_id: i64) -> LogResult<()> {
        self.append_forced(
            identifier,
            LogEntry::commit(CommitKind::TwoPhase, identifier, committed_tx_id),
        )
    }

    fn append_forced(&self, identifier: Identifier, entry: LogEntry) -> LogResult<()> {
        let mut state = self.state.lock();
        state.writer()?;
        state.require_active(identifier)?;

        let writer = state.writer_mut()?;
        writer.append_entry(&entry, self.collab.codec.as_ref())?;
        writer.force()
    }

    /// Appends `Done` and forgets the transaction, along with any cached
    /// extraction of it. A no-op on a backup slave.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::UnknownIdentifier`] if the transaction is not
    /// active, or an I/O error.
    pub fn done(&self, identifier: Identifier) -> LogResult<()> {
        let mut state = self.state.lock();
        if state.backup_slave {
            return Ok(());
        }
        state.writer()?;
        state.require_active(identifier)?;

        state
            .writer_mut()?
            .append_entry(&LogEntry::Done { identifier }, self.collab.codec.as_ref())?;
        state.table.remove(identifier);

        let cache = self.files.ptx_cache_path(identifier);
        if let Err(e) = LogFiles::remove_if_exists(&cache) {
            warn!("Unable to delete extraction cache {:?}: {}", cache, e);
        }
        Ok(())
    }

    /// Switches to the other segment, carrying forward active transactions.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InconsistentState`] if the target segment or the
    /// archive name already exists, or the segment's header or the owner's
    /// version disagree with what the log expects.
    pub fn rotate(&self) -> LogResult<()> {
        let mut state = self.state.lock();
        state.writer()?;
        self.rotate_locked(&mut state)
    }

    fn rotate_if_needed(&self, state: &mut LogState) -> LogResult<()> {
        let retention = &self.collab.retention;
        if !retention.auto_rotate() {
            return Ok(());
        }

        let threshold = retention.rotate_at_size();
        let position = state.writer()?.position();
        if position < threshold {
            return Ok(());
        }

        let earliest = state.table.earliest_start().unwrap_or(position);
        // Skip while one oversized transaction would be carried forward whole.
        if position - earliest < threshold / 2 {
            self.rotate_locked(state)?;
        }
        Ok(())
    }

    /// Switches the log to backup-slave mode.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::PolicyViolation`] while transactions are active.
    pub fn make_backup_slave(&self) -> LogResult<()> {
        let mut state = self.state.lock();
        if !state.table.is_empty() {
            return Err(LogError::policy_violation(format!(
                "cannot become a backup slave with {} active transactions",
                state.table.len()
            )));
        }
        state.backup_slave = true;
        Ok(())
    }

    /// Returns true if the log only accepts foreign streams.
    #[must_use]
    pub fn is_backup_slave(&self) -> bool {
        self.state.lock().backup_slave
    }

    /// Returns the active transactions, sorted by identifier.
    #[must_use]
    pub fn active_transactions(&self) -> Vec<(Identifier, DistributedTxId)> {
        self.state
            .lock()
            .table
            .snapshot()
            .into_iter()
            .map(|(identifier, row)| (identifier, row.xid))
            .collect()
    }

    /// Returns the write cursor of the current segment.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::LogClosed`] after close.
    pub fn write_position(&self) -> LogResult<u64> {
        Ok(self.state.lock().writer()?.position())
    }

    /// Returns the path of the current segment.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::LogClosed`] after close.
    pub fn current_segment_path(&self) -> LogResult<PathBuf> {
        Ok(self.state.lock().writer()?.path().to_path_buf())
    }

    /// Returns the persisted marker state.
    #[must_use]
    pub fn marker_state(&self) -> Option<MarkerState> {
        self.state.lock().marker.state()
    }

    /// Returns the owner's current segment version.
    #[must_use]
    pub fn current_version(&self) -> i64 {
        self.collab.owner.current_log_version()
    }

    /// Returns the file naming scheme.
    #[must_use]
    pub fn files(&self) -> &LogFiles {
        &self.files
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Path the archive of `version` has or would have.
    #[must_use]
    pub fn archive_path(&self, version: i64) -> PathBuf {
        self.files.archive_path(version)
    }

    /// Returns true if the archive of `version` exists.
    #[must_use]
    pub fn has_logical_log(&self, version: i64) -> bool {
        self.files.archive_path(version).exists()
    }

    /// Returns the length of the archive of `version`, if it exists.
    #[must_use]
    pub fn logical_log_length(&self, version: i64) -> Option<u64> {
        fs::metadata(self.files.archive_path(version))
            .ok()
            .map(|meta| meta.len())
    }

    /// Deletes the archive of `version`. Returns true if a file was removed.
    pub fn delete_logical_log(&self, version: i64) -> bool {
        let path = self.files.archive_path(version);
        if !path.exists() {
            return false;
        }
        match fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) => {
                warn!("Unable to delete archive {:?}: {}", path, e);
                false
            }
        }
    }

    /// Opens the archive of `version` for reading.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::NoSuchLogVersion`] if no archive exists.
    pub fn open_logical_log(&self, version: i64) -> LogResult<File> {
        let path = self.files.archive_path(version);
        if !path.exists() {
            return Err(LogError::NoSuchLogVersion { version });
        }
        Ok(File::open(path)?)
    }
}

impl std::fmt::Debug for LogicalLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogicalLog")
            .field("base", &self.files.base())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
