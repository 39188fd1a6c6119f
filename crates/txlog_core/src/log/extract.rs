//! Single-transaction extraction.
//!
//! Extraction returns the self-contained entry stream of one transaction:
//! its `Start`, any `Prepare` and `Command` entries, and (for committed
//! transactions) the commit. Results are cached next to the log as
//! `<base>.tx_<id>` and `<base>.ptx_<identifier>` and served from there on
//! later requests. Rotation prunes caches nobody can ask for any more.

use crate::dir::LogFiles;
use crate::entry::{CommandCodec, Decoded, EntryReader, LogEntry};
use crate::error::{LogError, LogResult};
use crate::log::logical::{LogState, LogicalLog};
use crate::segment::SegmentHeader;
use crate::types::Identifier;
use std::collections::HashMap;
use std::fs;
use tracing::debug;
use txlog_storage::{FileBackend, StorageBackend};

/// A segment opened for scanning: the live one or an archive.
enum ScanSource<'a> {
    Current(&'a FileBackend, u64),
    Archive(FileBackend),
}

impl ScanSource<'_> {
    fn backend(&self) -> &dyn StorageBackend {
        match self {
            Self::Current(backend, _) => *backend,
            Self::Archive(backend) => backend,
        }
    }

    fn end(&self) -> LogResult<u64> {
        match self {
            Self::Current(_, position) => Ok(*position),
            Self::Archive(backend) => Ok(backend.size()?),
        }
    }
}

impl LogicalLog {
    /// Returns the encoded entries of the transaction committed as
    /// `committed_tx_id`.
    ///
    /// Segments are searched newest first. The search starts at the newest
    /// segment whose header was written at or before `committed_tx_id`, and
    /// ends at the first segment that began before the transaction committed.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::TransactionNotFound`] if no kept segment holds the
    /// transaction, or [`LogError::InconsistentState`] if a segment header
    /// carries the wrong version.
    pub fn extract_by_tx_id(&self, committed_tx_id: i64) -> LogResult<Vec<u8>> {
        let state = self.state.lock();
        let cache = self.files.tx_cache_path(committed_tx_id);
        if cache.exists() {
            debug!("Serving tx {} from cache {:?}", committed_tx_id, cache);
            return Ok(fs::read(cache)?);
        }

        let current = self.collab.owner.current_log_version();
        let mut version = current;
        let mut header = self.checked_header(&state, current, version, committed_tx_id)?;
        while header.last_committed_tx > committed_tx_id {
            if version == 0 {
                return Err(LogError::transaction_not_found(format!(
                    "no segment header precedes tx {committed_tx_id}"
                )));
            }
            version -= 1;
            header = self.checked_header(&state, current, version, committed_tx_id)?;
        }

        let codec = self.collab.codec.as_ref();
        loop {
            let source = self.scan_source(&state, current, version, committed_tx_id)?;
            if let Some(entries) = find_committed(&source, codec, committed_tx_id)? {
                let bytes = encode_all(&entries, codec)?;
                self.files.write_atomically(&cache, &bytes)?;
                debug!(
                    "Extracted tx {} ({} entries) from version {}",
                    committed_tx_id,
                    entries.len(),
                    version
                );
                return Ok(bytes);
            }
            // Committed after this segment began, so no older one holds it.
            if header.last_committed_tx < committed_tx_id || version == 0 {
                break;
            }
            version -= 1;
            header = self.checked_header(&state, current, version, committed_tx_id)?;
        }

        Err(LogError::transaction_not_found(format!(
            "tx {committed_tx_id} is in no kept segment"
        )))
    }

    /// Returns the encoded `Start` and `Command` entries of the active
    /// transaction with `identifier`, for re-sending a prepared transaction.
    ///
    /// A cached stream is only served while it still starts with the xid the
    /// identifier is bound to; identifiers are reused once a transaction is
    /// done.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::TransactionNotFound`] if no active transaction has
    /// `identifier`.
    pub fn extract_by_identifier(&self, identifier: Identifier) -> LogResult<Vec<u8>> {
        let state = self.state.lock();
        let cache = self.files.ptx_cache_path(identifier);
        let Some(row) = state.table.get(identifier) else {
            LogFiles::remove_if_exists(&cache)?;
            return Err(LogError::transaction_not_found(format!(
                "{identifier} is not active"
            )));
        };

        let codec = self.collab.codec.as_ref();
        if cache.exists() {
            let bytes = fs::read(&cache)?;
            let current = matches!(
                LogEntry::decode(&bytes, 0, codec),
                Ok(Decoded::Entry { entry: LogEntry::Start { ref xid, .. }, .. }) if *xid == row.xid
            );
            if current {
                debug!("Serving {} from cache {:?}", identifier, cache);
                return Ok(bytes);
            }
            debug!("Discarding stale cache {:?} of {}", cache, identifier);
        }

        let writer = state.writer()?;
        let mut reader =
            EntryReader::bounded(writer.backend(), codec, row.start_offset, writer.position());
        let mut entries = Vec::new();
        while let Some(positioned) = reader.next_entry()? {
            if positioned.entry.identifier() != identifier {
                continue;
            }
            if matches!(
                positioned.entry,
                LogEntry::Start { .. } | LogEntry::Command { .. }
            ) {
                entries.push(positioned.entry);
            }
        }

        if !matches!(entries.first(), Some(LogEntry::Start { .. })) {
            return Err(LogError::inconsistent(format!(
                "{identifier} has no Start at offset {}",
                row.start_offset
            )));
        }
        let bytes = encode_all(&entries, codec)?;
        self.files.write_atomically(&cache, &bytes)?;
        Ok(bytes)
    }

    fn checked_header(
        &self,
        state: &LogState,
        current: i64,
        version: i64,
        committed_tx_id: i64,
    ) -> LogResult<SegmentHeader> {
        let source = self.scan_source(state, current, version, committed_tx_id)?;
        let header = SegmentHeader::read_from(source.backend())?;
        if header.version != version {
            return Err(LogError::inconsistent(format!(
                "segment of version {version} carries version {} in its header",
                header.version
            )));
        }
        Ok(header)
    }

    fn scan_source<'s>(
        &self,
        state: &'s LogState,
        current: i64,
        version: i64,
        committed_tx_id: i64,
    ) -> LogResult<ScanSource<'s>> {
        if version == current {
            let writer = state.writer()?;
            return Ok(ScanSource::Current(writer.backend(), writer.position()));
        }
        let path = self.files.archive_path(version);
        if !path.exists() {
            return Err(LogError::transaction_not_found(format!(
                "tx {committed_tx_id} may be in version {version}, which is not archived"
            )));
        }
        Ok(ScanSource::Archive(FileBackend::open_read_only(&path)?))
    }
}

/// Scans one segment for the transaction committed as `committed_tx_id`.
///
/// Entries are buffered per identifier from their `Start`; a buffer is
/// dropped when its transaction finishes with another commit id.
fn find_committed(
    source: &ScanSource<'_>,
    codec: &dyn CommandCodec,
    committed_tx_id: i64,
) -> LogResult<Option<Vec<LogEntry>>> {
    let mut reader = EntryReader::bounded(
        source.backend(),
        codec,
        SegmentHeader::SIZE as u64,
        source.end()?,
    );
    let mut pending: HashMap<Identifier, Vec<LogEntry>> = HashMap::new();

    while let Some(positioned) = reader.next_entry()? {
        let identifier = positioned.entry.identifier();
        let entry = positioned.entry;
        match entry {
            LogEntry::Start { .. } => {
                pending.insert(identifier, vec![entry]);
            }
            LogEntry::Done { .. } => {
                pending.remove(&identifier);
            }
            LogEntry::OnePhaseCommit { committed_tx_id: tx, .. }
            | LogEntry::TwoPhaseCommit { committed_tx_id: tx, .. } => {
                if let Some(mut buffered) = pending.remove(&identifier) {
                    if tx == committed_tx_id {
                        buffered.push(entry);
                        return Ok(Some(buffered));
                    }
                }
            }
            LogEntry::Prepare { .. } | LogEntry::Command { .. } => {
                if let Some(buffered) = pending.get_mut(&identifier) {
                    buffered.push(entry);
                }
            }
        }
    }
    Ok(None)
}

fn encode_all(entries: &[LogEntry], codec: &dyn CommandCodec) -> LogResult<Vec<u8>> {
    let mut bytes = Vec::new();
    for entry in entries {
        entry.encode_into(codec, &mut bytes)?;
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use crate::engine::InMemoryEngine;
    use crate::entry::{EntryReader, LengthPrefixedCodec, LogEntry};
    use crate::error::LogError;
    use crate::log::{Collaborators, LogicalLog};
    use crate::types::{CommitKind, DistributedTxId, Identifier};
    use crate::Config;
    use std::fs;
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};
    use txlog_storage::InMemoryBackend;

    fn xid(n: u8) -> DistributedTxId {
        DistributedTxId::new(vec![n; 2], vec![n; 2], 9).unwrap()
    }

    fn open(dir: &TempDir, config: Config, engine: &Arc<InMemoryEngine>) -> LogicalLog {
        LogicalLog::open(
            dir.path().join("tx.log"),
            config.clone(),
            Collaborators::in_memory(engine.clone(), &config),
        )
        .unwrap()
    }

    fn decode(bytes: Vec<u8>) -> Vec<LogEntry> {
        let backend = InMemoryBackend::with_data(bytes);
        EntryReader::new(&backend, &LengthPrefixedCodec, 0)
            .unwrap()
            .map(|r| r.unwrap().entry)
            .collect()
    }

    /// Runs one complete transaction with a single command.
    fn commit(log: &LogicalLog, engine: &InMemoryEngine, n: u8, tx: i64) -> Identifier {
        let id = log.start(&xid(n)).unwrap();
        log.write_command(id, &[n; 3]).unwrap();
        log.commit_one_phase(id, tx).unwrap();
        log.done(id).unwrap();
        engine.set_last_committed_tx(tx);
        id
    }

    #[test]
    fn extracts_only_the_requested_transaction() {
        let dir = tempdir().unwrap();
        let engine = Arc::new(InMemoryEngine::with_state(0, 40));
        let log = open(&dir, Config::default(), &engine);

        commit(&log, &engine, 1, 41);
        let a = log.start(&xid(2)).unwrap();
        let b = log.start(&xid(3)).unwrap();
        log.write_command(a, b"a1").unwrap();
        log.write_command(b, b"b1").unwrap();
        log.write_command(a, b"a2").unwrap();
        log.commit_one_phase(b, 42).unwrap();
        log.commit_one_phase(a, 43).unwrap();
        log.done(b).unwrap();
        log.done(a).unwrap();

        let entries = decode(log.extract_by_tx_id(42).unwrap());
        assert_eq!(entries.len(), 3);
        assert!(matches!(&entries[0], LogEntry::Start { xid: x, .. } if *x == xid(3)));
        assert_eq!(
            entries[1],
            LogEntry::Command {
                identifier: b,
                payload: b"b1".to_vec()
            }
        );
        assert_eq!(entries[2], LogEntry::commit(CommitKind::OnePhase, b, 42));
    }

    #[test]
    fn second_extraction_is_served_from_cache() {
        let dir = tempdir().unwrap();
        let engine = Arc::new(InMemoryEngine::new());
        let log = open(&dir, Config::default(), &engine);
        commit(&log, &engine, 1, 1);

        let first = log.extract_by_tx_id(1).unwrap();
        let cache = log.files().tx_cache_path(1);
        assert_eq!(fs::read(&cache).unwrap(), first);
        assert_eq!(log.extract_by_tx_id(1).unwrap(), first);

        fs::write(&cache, b"cached").unwrap();
        assert_eq!(log.extract_by_tx_id(1).unwrap(), b"cached");
    }

    #[test]
    fn falls_back_to_archived_segment() {
        let dir = tempdir().unwrap();
        let engine = Arc::new(InMemoryEngine::new());
        let log = open(&dir, Config::default().keep_logs(true), &engine);
        commit(&log, &engine, 1, 1);
        log.rotate().unwrap();
        commit(&log, &engine, 2, 2);

        let old = decode(log.extract_by_tx_id(1).unwrap());
        assert!(matches!(&old[0], LogEntry::Start { xid: x, .. } if *x == xid(1)));
        let new = decode(log.extract_by_tx_id(2).unwrap());
        assert!(matches!(&new[0], LogEntry::Start { xid: x, .. } if *x == xid(2)));
    }

    #[test]
    fn missing_archive_is_not_found() {
        let dir = tempdir().unwrap();
        let engine = Arc::new(InMemoryEngine::new());
        let log = open(&dir, Config::default(), &engine);
        commit(&log, &engine, 1, 1);
        log.rotate().unwrap();

        let err = log.extract_by_tx_id(1).unwrap_err();
        assert!(matches!(err, LogError::TransactionNotFound { .. }));
        assert!(!log.files().tx_cache_path(1).exists());
    }

    #[test]
    fn unknown_tx_is_not_found() {
        let dir = tempdir().unwrap();
        let engine = Arc::new(InMemoryEngine::new());
        let log = open(&dir, Config::default(), &engine);
        commit(&log, &engine, 1, 1);

        assert!(matches!(
            log.extract_by_tx_id(7),
            Err(LogError::TransactionNotFound { .. })
        ));
    }

    #[test]
    fn prepared_transaction_by_identifier() {
        let dir = tempdir().unwrap();
        let engine = Arc::new(InMemoryEngine::new());
        let log = open(&dir, Config::default(), &engine);

        let other = log.start(&xid(1)).unwrap();
        let id = log.start(&xid(2)).unwrap();
        log.write_command(other, b"x").unwrap();
        log.write_command(id, b"p1").unwrap();
        log.write_command(id, b"p2").unwrap();
        log.prepare(id).unwrap();

        let entries = decode(log.extract_by_identifier(id).unwrap());
        assert_eq!(entries.len(), 3);
        assert!(matches!(entries[0], LogEntry::Start { .. }));
        assert!(entries[1..]
            .iter()
            .all(|e| matches!(e, LogEntry::Command { identifier, .. } if *identifier == id)));
        assert!(log.files().ptx_cache_path(id).exists());
    }

    #[test]
    fn reused_identifier_is_not_served_a_stale_cache() {
        let dir = tempdir().unwrap();
        let engine = Arc::new(InMemoryEngine::new());
        let log = open(&dir, Config::default(), &engine);
        let first = log.start(&xid(1)).unwrap();
        log.write_command(first, b"first").unwrap();
        log.prepare(first).unwrap();
        let stale = log.extract_by_identifier(first).unwrap();
        log.commit_two_phase(first, 1).unwrap();
        log.done(first).unwrap();
        assert!(!log.files().ptx_cache_path(first).exists());
        log.close().unwrap();

        let log = open(&dir, Config::default(), &engine);
        let second = log.start(&xid(2)).unwrap();
        assert_eq!(second, first);
        log.write_command(second, b"second").unwrap();
        log.prepare(second).unwrap();
        // As if the process died between Done and removing the cache.
        fs::write(log.files().ptx_cache_path(second), &stale).unwrap();

        let entries = decode(log.extract_by_identifier(second).unwrap());
        assert_eq!(entries.len(), 2);
        assert!(matches!(&entries[0], LogEntry::Start { xid: x, .. } if *x == xid(2)));
        assert_eq!(
            entries[1],
            LogEntry::Command {
                identifier: second,
                payload: b"second".to_vec()
            }
        );
        assert_eq!(
            fs::read(log.files().ptx_cache_path(second)).unwrap(),
            log.extract_by_identifier(second).unwrap()
        );
    }

    #[test]
    fn finished_identifier_is_not_found() {
        let dir = tempdir().unwrap();
        let engine = Arc::new(InMemoryEngine::new());
        let log = open(&dir, Config::default(), &engine);
        let id = commit(&log, &engine, 1, 1);
        fs::write(log.files().ptx_cache_path(id), b"left over").unwrap();

        assert!(matches!(
            log.extract_by_identifier(id),
            Err(LogError::TransactionNotFound { .. })
        ));
        assert!(!log.files().ptx_cache_path(id).exists());
    }

    #[test]
    fn future_tx_id_does_not_read_older_archives() {
        let dir = tempdir().unwrap();
        let engine = Arc::new(InMemoryEngine::new());
        let log = open(&dir, Config::default().keep_logs(true), &engine);
        commit(&log, &engine, 1, 1);
        log.rotate().unwrap();
        commit(&log, &engine, 2, 2);
        log.rotate().unwrap();
        commit(&log, &engine, 3, 3);

        // Reading the oldest archive would now fail with an I/O error.
        let oldest = log.archive_path(0);
        fs::remove_file(&oldest).unwrap();
        fs::create_dir(&oldest).unwrap();

        assert!(matches!(
            log.extract_by_tx_id(99),
            Err(LogError::TransactionNotFound { .. })
        ));
        let entries = decode(log.extract_by_tx_id(2).unwrap());
        assert!(matches!(&entries[0], LogEntry::Start { xid: x, .. } if *x == xid(2)));
        assert!(log.extract_by_tx_id(3).is_ok());
    }

    #[test]
    fn unknown_identifier_is_not_found() {
        let dir = tempdir().unwrap();
        let engine = Arc::new(InMemoryEngine::new());
        let log = open(&dir, Config::default(), &engine);

        assert!(matches!(
            log.extract_by_identifier(Identifier::new(3)),
            Err(LogError::TransactionNotFound { .. })
        ));
    }
}
