//! Segment writer.

use crate::entry::{CommandCodec, LogEntry};
use crate::error::LogResult;
use crate::segment::header::SegmentHeader;
use std::path::Path;
use txlog_storage::{FileBackend, StorageBackend};

/// Zero-fill chunk size.
const ZERO_FILL_CHUNK: usize = 64 * 1024; // 64 KB

/// Owns one open segment file and its write cursor.
///
/// Entries are written at the cursor, which may sit below the physical end of
/// the file after recovery has zero-filled a torn tail. Each write goes
/// straight to the backend; [`SegmentWriter::force`] makes it durable.
#[derive(Debug)]
pub struct SegmentWriter {
    backend: FileBackend,
    number: u8,
    position: u64,
    sync_on_force: bool,
}

impl SegmentWriter {
    /// Opens or creates segment file `number` at `path` with the cursor at
    /// the physical end.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(path: &Path, number: u8, sync_on_force: bool) -> LogResult<Self> {
        let backend = FileBackend::open(path)?;
        let position = backend.size()?;
        Ok(Self {
            backend,
            number,
            position,
            sync_on_force,
        })
    }

    /// Returns the segment number (1 or 2).
    #[must_use]
    pub fn number(&self) -> u8 {
        self.number
    }

    /// Returns the segment file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.backend.path()
    }

    /// Returns the backend for reading back what was written.
    #[must_use]
    pub fn backend(&self) -> &FileBackend {
        &self.backend
    }

    /// Returns the write cursor: the end of valid data.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Moves the write cursor.
    pub fn set_position(&mut self, position: u64) {
        self.position = position;
    }

    /// Returns the physical file size.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    pub fn file_size(&self) -> LogResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Writes `header` at offset 0 and puts the cursor after it.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn write_header(&mut self, header: SegmentHeader) -> LogResult<()> {
        self.backend.write_at(0, &header.encode())?;
        self.position = SegmentHeader::SIZE as u64;
        Ok(())
    }

    /// Writes raw bytes at the cursor and returns where they start.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn append(&mut self, bytes: &[u8]) -> LogResult<u64> {
        let offset = self.position;
        self.backend.write_at(offset, bytes)?;
        self.position += bytes.len() as u64;
        Ok(offset)
    }

    /// Encodes `entry` and writes it at the cursor. Returns its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the write fails.
    pub fn append_entry(&mut self, entry: &LogEntry, codec: &dyn CommandCodec) -> LogResult<u64> {
        let bytes = entry.encode(codec)?;
        self.append(&bytes)
    }

    /// Overwrites `[from, to)` with zeros.
    ///
    /// # Errors
    ///
    /// Returns an error if a write fails.
    pub fn zero_fill(&mut self, from: u64, to: u64) -> LogResult<()> {
        let zeros = vec![0u8; ZERO_FILL_CHUNK];
        let mut offset = from;
        while offset < to {
            let len = (to - offset).min(ZERO_FILL_CHUNK as u64) as usize;
            self.backend.write_at(offset, &zeros[..len])?;
            offset += len as u64;
        }
        Ok(())
    }

    /// Makes written entries durable: flushes, and syncs if configured to.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush or sync fails.
    pub fn force(&mut self) -> LogResult<()> {
        self.backend.flush()?;
        if self.sync_on_force {
            self.backend.sync()?;
        }
        Ok(())
    }

    /// Flushes and syncs regardless of configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush or sync fails.
    pub fn sync(&mut self) -> LogResult<()> {
        self.backend.flush()?;
        self.backend.sync()?;
        Ok(())
    }
}
