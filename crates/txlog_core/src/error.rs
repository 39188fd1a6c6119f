//! Error types for the transaction log.

use std::io;
use thiserror::Error;

/// Result type for log operations.
pub type LogResult<T> = Result<T, LogError>;

/// Errors that can occur in log operations.
///
/// A truncated trailing entry is not an error: decoding reports it as
/// [`crate::Decoded::Incomplete`] and recovery treats it as the end of valid
/// data. Every variant here propagates to the caller.
#[derive(Debug, Error)]
pub enum LogError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] txlog_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Unknown opcode, unreadable header or otherwise malformed bytes.
    #[error("invalid log format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// The on-disk or in-memory state contradicts itself.
    #[error("inconsistent log state: {message}")]
    InconsistentState {
        /// Description of the inconsistency.
        message: String,
    },

    /// A foreign segment does not carry the expected next version.
    #[error("log version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Version this log expected.
        expected: i64,
        /// Version found in the incoming segment.
        actual: i64,
    },

    /// The operation is not allowed in the log's current mode.
    #[error("operation not permitted: {message}")]
    PolicyViolation {
        /// Why the operation was rejected.
        message: String,
    },

    /// A replicated transaction arrived out of commit order.
    #[error("unexpected committed tx id: expected {expected}, got {actual}")]
    UnexpectedCommitId {
        /// The next committed id this log expected.
        expected: i64,
        /// The committed id supplied by the caller.
        actual: i64,
    },

    /// No active transaction has this identifier.
    #[error("unknown transaction identifier {identifier}")]
    UnknownIdentifier {
        /// The identifier that was not found.
        identifier: i32,
    },

    /// Extraction could not find the requested transaction.
    #[error("transaction not found: {message}")]
    TransactionNotFound {
        /// What was searched for and where.
        message: String,
    },

    /// No archived segment exists for the version.
    #[error("no such log version: {version}")]
    NoSuchLogVersion {
        /// The requested version.
        version: i64,
    },

    /// An argument is out of range.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// Another process holds the log's lock file.
    #[error("log locked: another process has exclusive access")]
    LogLocked,

    /// The log has been closed.
    #[error("log is closed")]
    LogClosed,
}

impl LogError {
    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an inconsistent state error.
    pub fn inconsistent(message: impl Into<String>) -> Self {
        Self::InconsistentState {
            message: message.into(),
        }
    }

    /// Creates a policy violation error.
    pub fn policy_violation(message: impl Into<String>) -> Self {
        Self::PolicyViolation {
            message: message.into(),
        }
    }

    /// Creates a transaction not found error.
    pub fn transaction_not_found(message: impl Into<String>) -> Self {
        Self::TransactionNotFound {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Returns true for errors that indicate on-disk corruption.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::InvalidFormat { .. } | Self::InconsistentState { .. }
        )
    }
}
