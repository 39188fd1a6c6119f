//! Core type definitions.

use crate::error::{LogError, LogResult};
use std::fmt;

/// Longest global or branch id a `Start` entry can carry (one length byte).
pub const MAX_XID_PART_LEN: usize = u8::MAX as usize;

/// Log-local handle for an active transaction.
///
/// Identifiers are allocated from a counter that wraps from `i32::MAX` back
/// to 1. Zero and negative values are never handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identifier(pub i32);

impl Identifier {
    /// Creates an identifier.
    #[must_use]
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Returns the identifier that follows this one, wrapping to 1.
    #[must_use]
    pub const fn next(self) -> Self {
        if self.0 >= i32::MAX || self.0 < 0 {
            Self(1)
        } else {
            Self(self.0 + 1)
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ident:{}", self.0)
    }
}

/// Identifies one logical transaction across process and node boundaries.
///
/// This is the XA-style `(format, global, branch)` triple. It is distinct from
/// the log-local [`Identifier`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DistributedTxId {
    global_id: Vec<u8>,
    branch_id: Vec<u8>,
    format_id: i32,
}

impl DistributedTxId {
    /// Creates a distributed transaction id.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InvalidArgument`] if either id is longer than
    /// [`MAX_XID_PART_LEN`] bytes.
    pub fn new(global_id: Vec<u8>, branch_id: Vec<u8>, format_id: i32) -> LogResult<Self> {
        if global_id.len() > MAX_XID_PART_LEN || branch_id.len() > MAX_XID_PART_LEN {
            return Err(LogError::invalid_argument(format!(
                "xid parts must be at most {MAX_XID_PART_LEN} bytes, got global={} branch={}",
                global_id.len(),
                branch_id.len()
            )));
        }
        Ok(Self {
            global_id,
            branch_id,
            format_id,
        })
    }

    /// Returns the global transaction id bytes.
    #[must_use]
    pub fn global_id(&self) -> &[u8] {
        &self.global_id
    }

    /// Returns the branch qualifier bytes.
    #[must_use]
    pub fn branch_id(&self) -> &[u8] {
        &self.branch_id
    }

    /// Returns the format id.
    #[must_use]
    pub const fn format_id(&self) -> i32 {
        self.format_id
    }
}

impl fmt::Display for DistributedTxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "xid[{}:", self.format_id)?;
        for b in &self.global_id {
            write!(f, "{b:02x}")?;
        }
        f.write_str(":")?;
        for b in &self.branch_id {
            write!(f, "{b:02x}")?;
        }
        f.write_str("]")
    }
}

/// Which commit protocol finished a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommitKind {
    /// Single resource, committed without a prepare phase.
    OnePhase,
    /// Prepared first, then committed by the coordinator.
    TwoPhase,
}

impl fmt::Display for CommitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnePhase => f.write_str("1PC"),
            Self::TwoPhase => f.write_str("2PC"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_wraps_to_one() {
        assert_eq!(Identifier::new(1).next(), Identifier::new(2));
        assert_eq!(Identifier::new(i32::MAX).next(), Identifier::new(1));
        assert_eq!(Identifier::new(0).next(), Identifier::new(1));
    }

    #[test]
    fn xid_accepts_boundary_lengths() {
        let xid = DistributedTxId::new(vec![1; 255], vec![2; 255], 7).unwrap();
        assert_eq!(xid.global_id().len(), 255);
        assert_eq!(xid.branch_id().len(), 255);
        assert_eq!(xid.format_id(), 7);
    }

    #[test]
    fn xid_rejects_oversized_parts() {
        let err = DistributedTxId::new(vec![0; 256], Vec::new(), 0).unwrap_err();
        assert!(matches!(err, LogError::InvalidArgument { .. }));
        assert!(DistributedTxId::new(Vec::new(), vec![0; 300], 0).is_err());
    }

    #[test]
    fn xid_display_is_hex() {
        let xid = DistributedTxId::new(vec![0xab, 0x01], vec![0xff], 3).unwrap();
        assert_eq!(xid.to_string(), "xid[3:ab01:ff]");
    }
}
