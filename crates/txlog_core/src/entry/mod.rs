//! Log entries and their binary encoding.
//!
//! ## Entry Format
//!
//! Every entry starts with a one-byte opcode. All integers are big-endian.
//!
//! ```text
//! Start           | 1 | gid len (1) | bid len (1) | gid | bid | ident (4) | format (4) |
//! Prepare         | 2 | ident (4) |
//! Command         | 3 | ident (4) | payload (framed by the CommandCodec) |
//! Done            | 4 | ident (4) |
//! OnePhaseCommit  | 5 | ident (4) | committed tx (8) |
//! TwoPhaseCommit  | 6 | ident (4) | committed tx (8) |
//! ```
//!
//! A zero byte (opcode `Empty`) marks the logical end of data in a pre-sized
//! or zero-filled region.
//!
//! ## Recovery Policy
//!
//! ### Tolerated (treated as the end of valid data)
//!
//! - **Incomplete entry**: fewer bytes available than the entry needs. This is
//!   a write cut short by a crash.
//! - **Empty opcode**: the rest of the segment was never written.
//!
//! ### Fatal
//!
//! - **Unknown opcode**: returns [`crate::LogError::InvalidFormat`].

mod command;
mod reader;
mod record;

pub use command::{CommandCodec, LengthPrefixedCodec};
pub use reader::{EntryReader, PositionedEntry, StopReason};
pub use record::{Decoded, LogEntry, Opcode};
