//! Segment header.

use crate::error::{LogError, LogResult};
use bytes::{Buf, BufMut};
use txlog_storage::StorageBackend;

/// The 16 bytes at the start of every segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Monotonic segment version.
    pub version: i64,
    /// Last committed transaction id when the segment was created.
    pub last_committed_tx: i64,
}

impl SegmentHeader {
    /// Encoded size in bytes.
    pub const SIZE: usize = 16;

    /// Creates a header.
    #[must_use]
    pub const fn new(version: i64, last_committed_tx: i64) -> Self {
        Self {
            version,
            last_committed_tx,
        }
    }

    /// Serializes the header.
    #[must_use]
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        let mut buf = &mut out[..];
        buf.put_i64(self.version);
        buf.put_i64(self.last_committed_tx);
        out
    }

    /// Deserializes a header from the front of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InvalidFormat`] if fewer than 16 bytes are given.
    pub fn decode(bytes: &[u8]) -> LogResult<Self> {
        if bytes.len() < Self::SIZE {
            return Err(LogError::invalid_format(format!(
                "segment header needs {} bytes, got {}",
                Self::SIZE,
                bytes.len()
            )));
        }
        let mut buf = bytes;
        Ok(Self {
            version: buf.get_i64(),
            last_committed_tx: buf.get_i64(),
        })
    }

    /// Reads the header of a segment.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InvalidFormat`] if the segment is shorter than a
    /// header, or a storage error.
    pub fn read_from(backend: &dyn StorageBackend) -> LogResult<Self> {
        let size = backend.size()?;
        if size < Self::SIZE as u64 {
            return Err(LogError::invalid_format(format!(
                "segment of {size} bytes has no complete header"
            )));
        }
        Self::decode(&backend.read_at(0, Self::SIZE)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use txlog_storage::InMemoryBackend;

    #[test]
    fn layout_is_big_endian() {
        let header = SegmentHeader::new(3, 0x0102);
        assert_eq!(
            header.encode(),
            [0, 0, 0, 0, 0, 0, 0, 3, 0, 0, 0, 0, 0, 0, 1, 2]
        );
        assert_eq!(SegmentHeader::decode(&header.encode()).unwrap(), header);
    }

    #[test]
    fn negative_values_survive() {
        let header = SegmentHeader::new(-1, i64::MIN);
        assert_eq!(SegmentHeader::decode(&header.encode()).unwrap(), header);
    }

    #[test]
    fn short_segment_has_no_header() {
        let backend = InMemoryBackend::with_data(vec![0; 15]);
        let err = SegmentHeader::read_from(&backend).unwrap_err();
        assert!(matches!(err, LogError::InvalidFormat { .. }));
    }

    #[test]
    fn reads_header_before_entries() {
        let mut data = SegmentHeader::new(9, 90).encode().to_vec();
        data.extend_from_slice(&[4, 0, 0, 0, 1]);
        let backend = InMemoryBackend::with_data(data);
        assert_eq!(
            SegmentHeader::read_from(&backend).unwrap(),
            SegmentHeader::new(9, 90)
        );
    }
}
