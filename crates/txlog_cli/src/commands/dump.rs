//! Dump command implementation.

use super::EntryInfo;
use std::path::{Path, PathBuf};
use txlog_core::segment::ActiveSegmentMarker;
use txlog_core::{EntryReader, LengthPrefixedCodec, LogFiles, SegmentHeader};
use txlog_storage::FileBackend;

/// What to dump.
#[derive(Debug)]
pub enum Source {
    /// A rotating segment; `None` means the one the marker names.
    Segment(Option<u8>),
    /// An archived version.
    Archive(i64),
    /// A headerless entry stream such as an extraction cache file.
    File(PathBuf),
}

/// Runs the dump command.
pub fn run(
    base: Option<&Path>,
    source: Source,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let (path, start) = resolve(base, source)?;
    if !path.exists() {
        return Err(format!("{:?} not found", path).into());
    }

    let entries = read_entries(&path, start, limit)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => {
            print_text_output(&path, &entries);
        }
    }

    Ok(())
}

/// Returns the file to read and where its entries begin.
fn resolve(
    base: Option<&Path>,
    source: Source,
) -> Result<(PathBuf, u64), Box<dyn std::error::Error>> {
    let header = SegmentHeader::SIZE as u64;
    let files = || base.map(LogFiles::new).ok_or("Log path required for dump");

    match source {
        Source::File(path) => Ok((path, 0)),
        Source::Archive(version) => Ok((files()?.archive_path(version), header)),
        Source::Segment(Some(number)) if number == 1 || number == 2 => {
            Ok((files()?.segment_path(number), header))
        }
        Source::Segment(Some(number)) => Err(format!("No segment {}", number).into()),
        Source::Segment(None) => {
            let files = files()?;
            let number = ActiveSegmentMarker::read(&files.marker_path())?
                .and_then(|state| state.segment_number())
                .ok_or("The log has no active segment")?;
            Ok((files.segment_path(number), header))
        }
    }
}

/// Decodes up to `limit` entries of `path` from offset `start`.
pub fn read_entries(
    path: &Path,
    start: u64,
    limit: Option<usize>,
) -> Result<Vec<EntryInfo>, Box<dyn std::error::Error>> {
    let backend = FileBackend::open_read_only(path)?;
    let reader = EntryReader::new(&backend, &LengthPrefixedCodec, start)?;
    let max_entries = limit.unwrap_or(usize::MAX);

    let mut entries = Vec::new();
    for positioned in reader.take(max_entries) {
        entries.push(EntryInfo::from(&positioned?));
    }
    Ok(entries)
}

fn print_text_output(path: &Path, entries: &[EntryInfo]) {
    println!("Entries of {:?} ({} total)", path, entries.len());
    println!("================");
    println!();

    for entry in entries {
        print!(
            "[{:08}] {:15} id={}",
            entry.offset, entry.kind, entry.identifier
        );
        if let Some(ref xid) = entry.xid {
            print!(" xid={}", xid);
        }
        if let Some(tx) = entry.committed_tx_id {
            print!(" tx={}", tx);
        }
        if let Some(size) = entry.payload_size {
            print!(" payload={} bytes", size);
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;
    use txlog_core::{CommitKind, Identifier, LogEntry};

    #[test]
    fn dumps_segment_entries_after_header() {
        let dir = tempdir().unwrap();
        let files = LogFiles::new(dir.path().join("tx.log"));
        let id = Identifier::new(4);
        let mut bytes = SegmentHeader::new(0, 0).encode().to_vec();
        LogEntry::Command {
            identifier: id,
            payload: vec![1; 10],
        }
        .encode_into(&LengthPrefixedCodec, &mut bytes)
        .unwrap();
        LogEntry::commit(CommitKind::TwoPhase, id, 8)
            .encode_into(&LengthPrefixedCodec, &mut bytes)
            .unwrap();
        fs::write(files.segment_path(1), bytes).unwrap();

        let (path, start) = resolve(Some(files.base()), Source::Segment(Some(1))).unwrap();
        let entries = read_entries(&path, start, None).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].offset, 16);
        assert_eq!(entries[0].payload_size, Some(10));
        assert_eq!(entries[1].committed_tx_id, Some(8));

        assert_eq!(read_entries(&path, start, Some(1)).unwrap().len(), 1);
    }

    #[test]
    fn active_segment_requires_marker() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("tx.log");
        assert!(resolve(Some(&base), Source::Segment(None)).is_err());
        assert!(resolve(Some(&base), Source::Segment(Some(3))).is_err());
        assert!(resolve(None, Source::Archive(0)).is_err());
    }
}
