//! Command payload framing.

use crate::error::{LogError, LogResult};
use bytes::{Buf, BufMut};

/// Frames the opaque payload of `Command` entries.
///
/// The log never interprets command payloads. The storage engine owning the
/// log decides how a payload is delimited on disk, so the codec has to report
/// how many bytes it consumed.
pub trait CommandCodec: Send + Sync {
    /// Appends the framed `payload` to `out`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be framed.
    fn write_command(&self, payload: &[u8], out: &mut Vec<u8>) -> LogResult<()>;

    /// Reads one framed payload from the front of `input`.
    ///
    /// Returns `Ok(None)` if `input` ends before the payload does, otherwise
    /// the payload and the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes can never form a valid payload.
    fn read_command(&self, input: &[u8]) -> LogResult<Option<(Vec<u8>, usize)>>;
}

/// The default codec: a big-endian `u32` length followed by the payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct LengthPrefixedCodec;

impl LengthPrefixedCodec {
    /// Largest payload the 4-byte length field can describe.
    pub const MAX_PAYLOAD_SIZE: usize = u32::MAX as usize;
}

impl CommandCodec for LengthPrefixedCodec {
    fn write_command(&self, payload: &[u8], out: &mut Vec<u8>) -> LogResult<()> {
        let len = u32::try_from(payload.len()).map_err(|_| {
            LogError::invalid_argument(format!(
                "command payload too large: {} bytes exceeds maximum of {} bytes",
                payload.len(),
                Self::MAX_PAYLOAD_SIZE
            ))
        })?;
        out.put_u32(len);
        out.put_slice(payload);
        Ok(())
    }

    fn read_command(&self, input: &[u8]) -> LogResult<Option<(Vec<u8>, usize)>> {
        let mut buf = input;
        if buf.remaining() < 4 {
            return Ok(None);
        }
        let len = buf.get_u32() as usize;
        if buf.remaining() < len {
            return Ok(None);
        }
        Ok(Some((buf[..len].to_vec(), 4 + len)))
    }
}
