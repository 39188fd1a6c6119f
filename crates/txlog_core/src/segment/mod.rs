//! Segment files and the active-segment marker.
//!
//! The log alternates between two segment files. A 4-byte marker file names
//! the one currently in use, or records that the log was closed cleanly:
//!
//! ```text
//! marker:   | state char, UTF-16BE (2) | 0x00 0x00 |
//! segment:  | version (8) | last committed tx at start (8) | entries... |
//! ```

mod header;
mod marker;
mod writer;

pub use header::SegmentHeader;
pub use marker::{ActiveSegmentMarker, MarkerState};
pub use writer::SegmentWriter;
