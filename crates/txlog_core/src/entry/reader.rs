//! Streaming entry reader.
//!
//! Reads entries one by one from a storage backend through a bounded buffer,
//! so scanning a large segment does not load it whole. The buffer only grows
//! past its chunk size when a single entry is larger than that.

use crate::entry::command::CommandCodec;
use crate::entry::record::{Decoded, LogEntry};
use crate::error::LogResult;
use txlog_storage::StorageBackend;

/// Read buffer size for streaming iteration.
const READ_CHUNK_SIZE: usize = 64 * 1024; // 64 KB

/// An entry together with where it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionedEntry {
    /// Offset of the entry's opcode byte.
    pub offset: u64,
    /// Encoded length in bytes.
    pub len: usize,
    /// The decoded entry.
    pub entry: LogEntry,
}

impl PositionedEntry {
    /// Offset just past the entry.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + self.len as u64
    }
}

/// Why a reader stopped producing entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// An `Empty` opcode was found.
    Empty,
    /// The data ends inside an entry.
    Incomplete,
    /// All bytes up to the end bound were consumed.
    EndOfData,
}

/// Reads entries from `[start, end)` of a backend.
///
/// # Example
///
/// ```rust
/// use txlog_core::{EntryReader, LengthPrefixedCodec, LogEntry, Identifier};
/// use txlog_storage::InMemoryBackend;
///
/// let done = LogEntry::Done { identifier: Identifier::new(1) };
/// let backend = InMemoryBackend::with_data(done.encode(&LengthPrefixedCodec).unwrap());
///
/// let mut reader = EntryReader::new(&backend, &LengthPrefixedCodec, 0).unwrap();
/// assert_eq!(reader.next_entry().unwrap().unwrap().entry, done);
/// assert!(reader.next_entry().unwrap().is_none());
/// ```
pub struct EntryReader<'a> {
    backend: &'a dyn StorageBackend,
    codec: &'a dyn CommandCodec,
    /// Offset of the next entry.
    position: u64,
    /// Exclusive upper bound of the scan.
    end: u64,
    /// Bytes loaded from `buffer_start` onwards.
    buffer: Vec<u8>,
    buffer_start: u64,
    stop: Option<StopReason>,
    failed: bool,
}

impl<'a> EntryReader<'a> {
    /// Creates a reader from `start` to the current end of `backend`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be determined.
    pub fn new(
        backend: &'a dyn StorageBackend,
        codec: &'a dyn CommandCodec,
        start: u64,
    ) -> LogResult<Self> {
        let end = backend.size()?;
        Ok(Self::bounded(backend, codec, start, end))
    }

    /// Creates a reader over `[start, end)`.
    #[must_use]
    pub fn bounded(
        backend: &'a dyn StorageBackend,
        codec: &'a dyn CommandCodec,
        start: u64,
        end: u64,
    ) -> Self {
        Self {
            backend,
            codec,
            position: start,
            end,
            buffer: Vec::new(),
            buffer_start: start,
            stop: None,
            failed: false,
        }
    }

    /// Offset just past the last entry returned: the last valid boundary.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Why the reader stopped, once it has.
    #[must_use]
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop
    }

    /// Returns the next entry, or `None` once the scan has ended.
    ///
    /// After an error the reader is exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error on an unknown opcode or a storage failure. Incomplete
    /// trailing entries are not errors; see [`StopReason::Incomplete`].
    pub fn next_entry(&mut self) -> LogResult<Option<PositionedEntry>> {
        if self.stop.is_some() || self.failed {
            return Ok(None);
        }

        let result = self.decode_next();
        self.failed = result.is_err();
        result
    }

    fn decode_next(&mut self) -> LogResult<Option<PositionedEntry>> {
        loop {
            let skip = (self.position - self.buffer_start) as usize;
            let available = &self.buffer[skip..];

            match LogEntry::decode(available, self.position, self.codec)? {
                Decoded::Entry { entry, len } => {
                    let offset = self.position;
                    self.position += len as u64;
                    return Ok(Some(PositionedEntry { offset, len, entry }));
                }
                Decoded::Empty => {
                    self.stop = Some(StopReason::Empty);
                    return Ok(None);
                }
                Decoded::Incomplete => {
                    let had_bytes = !available.is_empty();
                    if !self.fill()? {
                        self.stop = Some(if had_bytes {
                            StopReason::Incomplete
                        } else {
                            StopReason::EndOfData
                        });
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Loads the next chunk, dropping consumed bytes. Returns false at `end`.
    fn fill(&mut self) -> LogResult<bool> {
        let loaded_end = self.buffer_start + self.buffer.len() as u64;
        if loaded_end >= self.end {
            return Ok(false);
        }

        let consumed = (self.position - self.buffer_start) as usize;
        self.buffer.drain(..consumed);
        self.buffer_start = self.position;

        let len = (self.end - loaded_end).min(READ_CHUNK_SIZE as u64) as usize;
        let bytes = self.backend.read_at(loaded_end, len)?;
        self.buffer.extend_from_slice(&bytes);
        Ok(true)
    }
}

impl Iterator for EntryReader<'_> {
    type Item = LogResult<PositionedEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}
