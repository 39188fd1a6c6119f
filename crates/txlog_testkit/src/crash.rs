//! Crash simulation helpers.
//!
//! A process that dies mid-write leaves a segment whose last entry is cut
//! short, possibly followed by garbage the file system never zeroed. These
//! helpers reproduce such files so recovery can be checked against them.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use txlog_testkit::prelude::*;
//!
//! let boundaries = entry_boundaries(&segment).unwrap();
//! cut_segment(&segment, boundaries[3], 2).unwrap();
//! ```

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use txlog_core::{EntryReader, LengthPrefixedCodec, LogResult, PositionedEntry, SegmentHeader};
use txlog_storage::FileBackend;

/// Decodes every entry of the segment at `path` after its header.
pub fn read_segment(path: &Path) -> LogResult<Vec<PositionedEntry>> {
    read_from(path, SegmentHeader::SIZE as u64)
}

/// Decodes every entry of a headerless stream such as an extraction cache.
pub fn read_stream(path: &Path) -> LogResult<Vec<PositionedEntry>> {
    read_from(path, 0)
}

fn read_from(path: &Path, start: u64) -> LogResult<Vec<PositionedEntry>> {
    let backend = FileBackend::open_read_only(path)?;
    let reader = EntryReader::new(&backend, &LengthPrefixedCodec, start)?;
    let entries = reader.collect::<LogResult<Vec<_>>>()?;
    Ok(entries)
}

/// Returns the offset of every entry in the segment at `path`, followed by
/// the end of the last valid entry.
pub fn entry_boundaries(path: &Path) -> LogResult<Vec<u64>> {
    let entries = read_segment(path)?;
    let end = entries
        .last()
        .map_or(SegmentHeader::SIZE as u64, PositionedEntry::end);
    let mut boundaries: Vec<u64> = entries.iter().map(|positioned| positioned.offset).collect();
    boundaries.push(end);
    Ok(boundaries)
}

/// Truncates the file at `path` to `len` bytes.
pub fn truncate_file(path: &Path, len: u64) -> io::Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(len)?;
    file.sync_all()
}

/// Appends raw bytes to the file at `path`.
pub fn append_bytes(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().append(true).open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Simulates a torn write: keeps everything before `boundary`, then only the
/// first `partial` bytes of the entry that started there.
///
/// `partial` is clamped so the kept bytes never reach the next entry.
pub fn cut_segment(path: &Path, boundary: u64, partial: u64) -> io::Result<()> {
    let len = fs::metadata(path)?.len();
    truncate_file(path, (boundary + partial).min(len))
}

/// Returns true if every byte of `path` from `from` to the end is zero.
pub fn tail_is_zero(path: &Path, from: u64) -> io::Result<bool> {
    let bytes = fs::read(path)?;
    let start = (from as usize).min(bytes.len());
    Ok(bytes[start..].iter().all(|&b| b == 0))
}
