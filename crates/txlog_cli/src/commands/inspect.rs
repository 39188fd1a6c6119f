//! Inspect command implementation.

use super::format_size;
use serde::Serialize;
use std::fs;
use std::path::Path;
use txlog_core::segment::ActiveSegmentMarker;
use txlog_core::{LogFiles, MarkerState, SegmentHeader};
use txlog_storage::FileBackend;

/// Log inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Base path of the log.
    pub path: String,
    /// Marker state: "clean", "segment 1", "segment 2" or "missing".
    pub marker: String,
    /// The segment the marker names, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<SegmentInfo>,
    /// Archived versions with their sizes.
    pub archives: Vec<ArchiveInfo>,
    /// Extraction cache files.
    pub cache_files: Vec<String>,
}

/// The active segment.
#[derive(Debug, Serialize)]
pub struct SegmentInfo {
    /// Segment file path.
    pub path: String,
    /// File size in bytes.
    pub size: u64,
    /// Header version, if the header is readable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    /// Header's last committed tx at segment start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_committed_tx: Option<i64>,
}

/// One archived segment.
#[derive(Debug, Serialize)]
pub struct ArchiveInfo {
    /// Segment version.
    pub version: i64,
    /// File size in bytes.
    pub size: u64,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Collects what `inspect` prints.
pub fn inspect(path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let files = LogFiles::new(path);
    let marker_path = files.marker_path();
    if !marker_path.exists() && !files.segment_path(1).exists() {
        return Err(format!("No transaction log found at {:?}", path).into());
    }

    let state = ActiveSegmentMarker::read(&marker_path)?;
    let current = match state.and_then(MarkerState::segment_number) {
        Some(number) => segment_info(&files.segment_path(number))?,
        None => None,
    };

    let mut archives = Vec::new();
    for version in files.archived_versions()? {
        archives.push(ArchiveInfo {
            version,
            size: fs::metadata(files.archive_path(version))?.len(),
        });
    }

    Ok(InspectResult {
        path: path.display().to_string(),
        marker: describe_marker(state),
        current,
        archives,
        cache_files: files
            .cache_files()?
            .iter()
            .map(|p| p.display().to_string())
            .collect(),
    })
}

fn segment_info(path: &Path) -> Result<Option<SegmentInfo>, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Ok(None);
    }
    let backend = FileBackend::open_read_only(path)?;
    let header = SegmentHeader::read_from(&backend).ok();
    Ok(Some(SegmentInfo {
        path: path.display().to_string(),
        size: fs::metadata(path)?.len(),
        version: header.map(|h| h.version),
        last_committed_tx: header.map(|h| h.last_committed_tx),
    }))
}

fn describe_marker(state: Option<MarkerState>) -> String {
    match state {
        None => "missing".to_string(),
        Some(MarkerState::Clean) => "clean".to_string(),
        Some(active) => format!("segment {}", active.segment_number().unwrap_or(1)),
    }
}

fn print_text_output(result: &InspectResult) {
    println!("Transaction Log Inspection");
    println!("==========================");
    println!();
    println!("Path:   {}", result.path);
    println!("Marker: {}", result.marker);

    if let Some(current) = &result.current {
        println!();
        println!("Current segment:");
        println!("  File:    {}", current.path);
        println!("  Size:    {} bytes", format_size(current.size));
        match (current.version, current.last_committed_tx) {
            (Some(version), Some(tx)) => {
                println!("  Version: {}", version);
                println!("  Last committed tx at start: {}", tx);
            }
            _ => println!("  Header:  unreadable"),
        }
    }

    println!();
    println!("Archives ({}):", result.archives.len());
    for archive in &result.archives {
        println!("  v{}  {} bytes", archive.version, format_size(archive.size));
    }

    if !result.cache_files.is_empty() {
        println!();
        println!("Cache files ({}):", result.cache_files.len());
        for file in &result.cache_files {
            println!("  {}", file);
        }
    }
}
