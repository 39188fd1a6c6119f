//! Log entry types and serialization.

use crate::entry::command::CommandCodec;
use crate::error::{LogError, LogResult};
use crate::types::{CommitKind, DistributedTxId, Identifier};
use bytes::{Buf, BufMut};
use std::fmt;

/// One-byte tag at the start of every entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Zero byte: logical end of data.
    Empty = 0,
    /// A transaction started.
    Start = 1,
    /// A transaction was prepared (2PC durability point).
    Prepare = 2,
    /// An opaque command belonging to a transaction.
    Command = 3,
    /// A transaction is finished and may be forgotten.
    Done = 4,
    /// Committed without a prepare phase.
    OnePhaseCommit = 5,
    /// Committed after a prepare phase.
    TwoPhaseCommit = 6,
}

impl Opcode {
    /// Converts a byte to an opcode.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Empty),
            1 => Some(Self::Start),
            2 => Some(Self::Prepare),
            3 => Some(Self::Command),
            4 => Some(Self::Done),
            5 => Some(Self::OnePhaseCommit),
            6 => Some(Self::TwoPhaseCommit),
            _ => None,
        }
    }

    /// Converts the opcode to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A decoded log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    /// A transaction started.
    Start {
        /// Distributed transaction id.
        xid: DistributedTxId,
        /// Log-local identifier.
        identifier: Identifier,
        /// Offset of this entry in its segment. Not encoded; decoding fills it
        /// in from the read position.
        start_offset: u64,
    },

    /// The transaction was prepared.
    Prepare {
        /// Log-local identifier.
        identifier: Identifier,
    },

    /// An opaque command.
    Command {
        /// Log-local identifier.
        identifier: Identifier,
        /// Payload as produced by the [`CommandCodec`].
        payload: Vec<u8>,
    },

    /// The transaction finished.
    Done {
        /// Log-local identifier.
        identifier: Identifier,
    },

    /// Committed without a prepare phase.
    OnePhaseCommit {
        /// Log-local identifier.
        identifier: Identifier,
        /// Committed transaction id.
        committed_tx_id: i64,
    },

    /// Committed after a prepare phase.
    TwoPhaseCommit {
        /// Log-local identifier.
        identifier: Identifier,
        /// Committed transaction id.
        committed_tx_id: i64,
    },
}

/// Outcome of decoding bytes at one position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete entry and the number of bytes it occupied.
    Entry {
        /// The entry.
        entry: LogEntry,
        /// Encoded length in bytes.
        len: usize,
    },
    /// The input ends inside an entry.
    Incomplete,
    /// An `Empty` opcode: no more entries follow.
    Empty,
}

const IDENT_SIZE: usize = 4;
const COMMIT_BODY_SIZE: usize = IDENT_SIZE + 8;

impl LogEntry {
    /// Creates a commit entry of the given kind.
    #[must_use]
    pub fn commit(kind: CommitKind, identifier: Identifier, committed_tx_id: i64) -> Self {
        match kind {
            CommitKind::OnePhase => Self::OnePhaseCommit {
                identifier,
                committed_tx_id,
            },
            CommitKind::TwoPhase => Self::TwoPhaseCommit {
                identifier,
                committed_tx_id,
            },
        }
    }

    /// Returns the opcode.
    #[must_use]
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Start { .. } => Opcode::Start,
            Self::Prepare { .. } => Opcode::Prepare,
            Self::Command { .. } => Opcode::Command,
            Self::Done { .. } => Opcode::Done,
            Self::OnePhaseCommit { .. } => Opcode::OnePhaseCommit,
            Self::TwoPhaseCommit { .. } => Opcode::TwoPhaseCommit,
        }
    }

    /// Returns the identifier of the transaction this entry belongs to.
    #[must_use]
    pub fn identifier(&self) -> Identifier {
        match self {
            Self::Start { identifier, .. }
            | Self::Prepare { identifier }
            | Self::Command { identifier, .. }
            | Self::Done { identifier }
            | Self::OnePhaseCommit { identifier, .. }
            | Self::TwoPhaseCommit { identifier, .. } => *identifier,
        }
    }

    /// Replaces the identifier.
    pub fn set_identifier(&mut self, new: Identifier) {
        match self {
            Self::Start { identifier, .. }
            | Self::Prepare { identifier }
            | Self::Command { identifier, .. }
            | Self::Done { identifier }
            | Self::OnePhaseCommit { identifier, .. }
            | Self::TwoPhaseCommit { identifier, .. } => *identifier = new,
        }
    }

    /// Returns the commit kind and committed tx id for commit entries.
    #[must_use]
    pub fn commit_info(&self) -> Option<(CommitKind, i64)> {
        match self {
            Self::OnePhaseCommit {
                committed_tx_id, ..
            } => Some((CommitKind::OnePhase, *committed_tx_id)),
            Self::TwoPhaseCommit {
                committed_tx_id, ..
            } => Some((CommitKind::TwoPhase, *committed_tx_id)),
            _ => None,
        }
    }

    /// Serializes the entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the codec cannot frame a command payload.
    pub fn encode(&self, codec: &dyn CommandCodec) -> LogResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.encode_into(codec, &mut buf)?;
        Ok(buf)
    }

    /// Serializes the entry, appending to `buf`.
    ///
    /// # Errors
    ///
    /// Returns an error if the codec cannot frame a command payload.
    pub fn encode_into(&self, codec: &dyn CommandCodec, buf: &mut Vec<u8>) -> LogResult<()> {
        buf.put_u8(self.opcode().as_byte());

        match self {
            Self::Start {
                xid, identifier, ..
            } => {
                // Lengths fit in a byte: DistributedTxId::new enforces it.
                buf.put_u8(xid.global_id().len() as u8);
                buf.put_u8(xid.branch_id().len() as u8);
                buf.put_slice(xid.global_id());
                buf.put_slice(xid.branch_id());
                buf.put_i32(identifier.as_i32());
                buf.put_i32(xid.format_id());
            }

            Self::Prepare { identifier } | Self::Done { identifier } => {
                buf.put_i32(identifier.as_i32());
            }

            Self::Command {
                identifier,
                payload,
            } => {
                buf.put_i32(identifier.as_i32());
                codec.write_command(payload, buf)?;
            }

            Self::OnePhaseCommit {
                identifier,
                committed_tx_id,
            }
            | Self::TwoPhaseCommit {
                identifier,
                committed_tx_id,
            } => {
                buf.put_i32(identifier.as_i32());
                buf.put_i64(*committed_tx_id);
            }
        }

        Ok(())
    }

    /// Decodes one entry from the front of `input`.
    ///
    /// `position` is the offset of `input[0]` in its segment; it becomes the
    /// `start_offset` of a decoded `Start` entry.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InvalidFormat`] for an unknown opcode, or whatever
    /// error the codec reports for a malformed command payload.
    pub fn decode(input: &[u8], position: u64, codec: &dyn CommandCodec) -> LogResult<Decoded> {
        let mut buf = input;
        if !buf.has_remaining() {
            return Ok(Decoded::Incomplete);
        }

        let op = buf.get_u8();
        let opcode = Opcode::from_byte(op).ok_or_else(|| {
            LogError::invalid_format(format!("unknown opcode {op} at offset {position}"))
        })?;

        let entry = match opcode {
            Opcode::Empty => return Ok(Decoded::Empty),

            Opcode::Start => {
                if buf.remaining() < 2 {
                    return Ok(Decoded::Incomplete);
                }
                let global_len = buf.get_u8() as usize;
                let branch_len = buf.get_u8() as usize;
                if buf.remaining() < global_len + branch_len + 8 {
                    return Ok(Decoded::Incomplete);
                }
                let global_id = buf.copy_to_bytes(global_len).to_vec();
                let branch_id = buf.copy_to_bytes(branch_len).to_vec();
                let identifier = Identifier::new(buf.get_i32());
                let format_id = buf.get_i32();
                Self::Start {
                    xid: DistributedTxId::new(global_id, branch_id, format_id)?,
                    identifier,
                    start_offset: position,
                }
            }

            Opcode::Prepare | Opcode::Done => {
                if buf.remaining() < IDENT_SIZE {
                    return Ok(Decoded::Incomplete);
                }
                let identifier = Identifier::new(buf.get_i32());
                if opcode == Opcode::Prepare {
                    Self::Prepare { identifier }
                } else {
                    Self::Done { identifier }
                }
            }

            Opcode::OnePhaseCommit | Opcode::TwoPhaseCommit => {
                if buf.remaining() < COMMIT_BODY_SIZE {
                    return Ok(Decoded::Incomplete);
                }
                let identifier = Identifier::new(buf.get_i32());
                let committed_tx_id = buf.get_i64();
                let kind = if opcode == Opcode::OnePhaseCommit {
                    CommitKind::OnePhase
                } else {
                    CommitKind::TwoPhase
                };
                Self::commit(kind, identifier, committed_tx_id)
            }

            Opcode::Command => {
                if buf.remaining() < IDENT_SIZE {
                    return Ok(Decoded::Incomplete);
                }
                let identifier = Identifier::new(buf.get_i32());
                let Some((payload, consumed)) = codec.read_command(buf)? else {
                    return Ok(Decoded::Incomplete);
                };
                buf.advance(consumed);
                Self::Command {
                    identifier,
                    payload,
                }
            }
        };

        Ok(Decoded::Entry {
            entry,
            len: input.len() - buf.remaining(),
        })
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start {
                xid,
                identifier,
                start_offset,
            } => write!(f, "Start[{identifier}, {xid}, pos={start_offset}]"),
            Self::Prepare { identifier } => write!(f, "Prepare[{identifier}]"),
            Self::Command {
                identifier,
                payload,
            } => write!(f, "Command[{identifier}, {} bytes]", payload.len()),
            Self::Done { identifier } => write!(f, "Done[{identifier}]"),
            Self::OnePhaseCommit {
                identifier,
                committed_tx_id,
            } => write!(f, "1PC[{identifier}, txId={committed_tx_id}]"),
            Self::TwoPhaseCommit {
                identifier,
                committed_tx_id,
            } => write!(f, "2PC[{identifier}, txId={committed_tx_id}]"),
        }
    }
}
