//! Active-segment marker.

use crate::error::{LogError, LogResult};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Which segment is active, or that the log was closed cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerState {
    /// Closed cleanly; no segment holds pending entries.
    Clean,
    /// Segment 1 is active.
    Segment1,
    /// Segment 2 is active.
    Segment2,
}

impl MarkerState {
    /// Encoded size in bytes.
    pub const SIZE: usize = 4;

    /// Returns the state character written to disk.
    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::Clean => 'C',
            Self::Segment1 => '1',
            Self::Segment2 => '2',
        }
    }

    /// Converts a state character back to a state.
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'C' => Some(Self::Clean),
            '1' => Some(Self::Segment1),
            '2' => Some(Self::Segment2),
            _ => None,
        }
    }

    /// Returns the marker for segment `number`.
    pub fn for_segment(number: u8) -> Option<Self> {
        match number {
            1 => Some(Self::Segment1),
            2 => Some(Self::Segment2),
            _ => None,
        }
    }

    /// Returns the segment number this state points at.
    #[must_use]
    pub const fn segment_number(self) -> Option<u8> {
        match self {
            Self::Clean => None,
            Self::Segment1 => Some(1),
            Self::Segment2 => Some(2),
        }
    }

    /// The segment rotation switches to: 2 after 1, otherwise 1.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Segment1 => Self::Segment2,
            Self::Clean | Self::Segment2 => Self::Segment1,
        }
    }

    /// Serializes the state: a UTF-16BE code unit and two zero bytes.
    #[must_use]
    pub fn encode(self) -> [u8; Self::SIZE] {
        let [hi, lo] = (self.as_char() as u16).to_be_bytes();
        [hi, lo, 0, 0]
    }

    /// Deserializes a marker file's contents.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InvalidFormat`] unless `bytes` is exactly 4 bytes
    /// holding a known state character.
    pub fn decode(bytes: &[u8]) -> LogResult<Self> {
        let &[hi, lo, _, _] = bytes else {
            return Err(LogError::invalid_format(format!(
                "marker must be {} bytes, got {}",
                Self::SIZE,
                bytes.len()
            )));
        };
        let unit = u16::from_be_bytes([hi, lo]);
        char::from_u32(u32::from(unit))
            .and_then(Self::from_char)
            .ok_or_else(|| LogError::invalid_format(format!("unknown marker value {unit:#06x}")))
    }
}

/// The persistent marker file and its last known value.
///
/// Every transition overwrites the whole file, syncs it and closes it before
/// returning, so callers may act on the new state immediately.
#[derive(Debug)]
pub struct ActiveSegmentMarker {
    path: PathBuf,
    current: Option<MarkerState>,
}

impl ActiveSegmentMarker {
    /// Reads the marker at `path`; a missing file yields no state.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InvalidFormat`] if the file exists but is malformed.
    pub fn load(path: &Path) -> LogResult<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            current: Self::read(path)?,
        })
    }

    /// Reads the state stored at `path` without tracking it.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InvalidFormat`] if the file exists but is malformed.
    pub fn read(path: &Path) -> LogResult<Option<MarkerState>> {
        if !path.exists() {
            return Ok(None);
        }
        MarkerState::decode(&fs::read(path)?).map(Some)
    }

    /// Returns the current state, `None` if no marker was ever written.
    #[must_use]
    pub fn state(&self) -> Option<MarkerState> {
        self.current
    }

    /// Persists `next` as the new state.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InconsistentState`] if `next` equals the current
    /// state, or an I/O error.
    pub fn set(&mut self, next: MarkerState) -> LogResult<()> {
        if self.current == Some(next) {
            return Err(LogError::inconsistent(format!(
                "marker already set to '{}'",
                next.as_char()
            )));
        }

        let mut file = File::create(&self.path)?;
        file.write_all(&next.encode())?;
        file.sync_all()?;
        drop(file);

        self.current = Some(next);
        Ok(())
    }
}
