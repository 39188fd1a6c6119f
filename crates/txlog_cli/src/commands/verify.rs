//! Verify command implementation.

use std::path::{Path, PathBuf};
use txlog_core::{
    EntryReader, LengthPrefixedCodec, LogFiles, SegmentHeader, StopReason,
};
use txlog_storage::{FileBackend, StorageBackend};

/// Verification result for one file.
#[derive(Debug)]
pub struct VerifyResult {
    /// File that was checked.
    pub path: PathBuf,
    /// Number of entries decoded.
    pub entries: usize,
    /// Offset just past the last valid entry.
    pub valid_end: u64,
    /// Bytes after the last entry that are all zero.
    pub zero_padding: u64,
    /// Offset of a trailing entry cut short, if any.
    pub incomplete_tail: Option<u64>,
    /// Fatal format errors.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            entries: 0,
            valid_end: 0,
            zero_padding: 0,
            incomplete_tail: None,
            errors: Vec::new(),
        }
    }

    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying transaction log at {:?}", path);
    println!();

    let files = LogFiles::new(path);
    let mut targets: Vec<PathBuf> = [1, 2]
        .into_iter()
        .map(|number| files.segment_path(number))
        .filter(|p| p.exists())
        .collect();
    for version in files.archived_versions()? {
        targets.push(files.archive_path(version));
    }

    if targets.is_empty() {
        println!("No segments found (this may be normal for a cleanly closed log)");
    }

    let mut ok = true;
    for target in targets {
        let result = verify_segment(&target)?;
        print_result(&result);
        ok &= result.is_ok();
    }

    println!();
    if ok {
        println!("✓ Log verification passed");
        Ok(())
    } else {
        println!("✗ Log verification failed");
        Err("Verification failed".into())
    }
}

/// Scans one segment file and classifies how it ends.
pub fn verify_segment(path: &Path) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let mut result = VerifyResult::new(path.to_path_buf());
    let backend = FileBackend::open_read_only(path)?;

    let size = backend.size()?;
    if let Err(e) = SegmentHeader::read_from(&backend) {
        result.errors.push(e.to_string());
        return Ok(result);
    }

    let mut reader = EntryReader::new(&backend, &LengthPrefixedCodec, SegmentHeader::SIZE as u64)?;
    loop {
        match reader.next_entry() {
            Ok(Some(_)) => result.entries += 1,
            Ok(None) => break,
            Err(e) => {
                result.errors.push(e.to_string());
                break;
            }
        }
    }
    result.valid_end = reader.position();

    match reader.stop_reason() {
        Some(StopReason::Incomplete) => result.incomplete_tail = Some(result.valid_end),
        Some(StopReason::Empty) => {
            let tail = backend.read_at(result.valid_end, (size - result.valid_end) as usize)?;
            match tail.iter().position(|&b| b != 0) {
                None => result.zero_padding = tail.len() as u64,
                Some(at) => result.errors.push(format!(
                    "non-zero byte at offset {} after zero padding at {}",
                    result.valid_end + at as u64,
                    result.valid_end
                )),
            }
        }
        _ => {}
    }

    Ok(result)
}

fn print_result(result: &VerifyResult) {
    println!(
        "  {:?}: {} entries, valid up to {}",
        result.path, result.entries, result.valid_end
    );
    if result.zero_padding > 0 {
        println!("    {} bytes of zero padding", result.zero_padding);
    }
    if let Some(offset) = result.incomplete_tail {
        println!("    incomplete entry at offset {} (recovery will zero it)", offset);
    }
    for error in &result.errors {
        println!("    ERROR: {}", error);
    }
}
