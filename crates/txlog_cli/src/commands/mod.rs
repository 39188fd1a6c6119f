//! CLI command implementations.

pub mod dump;
pub mod inspect;
pub mod verify;

use serde::Serialize;
use txlog_core::{LogEntry, PositionedEntry};

/// One decoded entry, as printed by `dump`.
#[derive(Debug, Serialize)]
pub struct EntryInfo {
    /// Offset of the entry in its file.
    pub offset: u64,
    /// Encoded length in bytes.
    pub len: usize,
    /// Entry kind.
    pub kind: String,
    /// Log-local transaction identifier.
    pub identifier: i32,
    /// Distributed transaction id (`Start` only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xid: Option<String>,
    /// Committed transaction id (commits only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub committed_tx_id: Option<i64>,
    /// Command payload size in bytes (`Command` only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_size: Option<usize>,
}

impl From<&PositionedEntry> for EntryInfo {
    fn from(positioned: &PositionedEntry) -> Self {
        let entry = &positioned.entry;
        Self {
            offset: positioned.offset,
            len: positioned.len,
            kind: format!("{:?}", entry.opcode()),
            identifier: entry.identifier().as_i32(),
            xid: match entry {
                LogEntry::Start { xid, .. } => Some(xid.to_string()),
                _ => None,
            },
            committed_tx_id: entry.commit_info().map(|(_, tx)| tx),
            payload_size: match entry {
                LogEntry::Command { payload, .. } => Some(payload.len()),
                _ => None,
            },
        }
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
