//! Error handling.

use std::error::Error as StdError;
use std::io;

use displaydoc::Display;

pub type DagPoolResult<T> = Result<T, DagPoolError>;

/// The taxonomy of errors surfaced by the pool.
///
/// Every error that crosses a service boundary is classified into one
/// of these kinds so that callers can react without parsing message
/// strings.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The block or key is absent.
    NotFound,

    /// Authentication or policy check failed.
    AccessDenied,

    /// Fewer than `k` shards were reachable within the deadline.
    Unavailable,

    /// A CRC or content hash check failed.
    Corrupt,

    /// The operation violates a cluster invariant.
    Conflict,

    /// An unexpected local failure.
    Internal,

    /// The deadline elapsed or the caller canceled.
    Canceled,
}

/// An error.
#[derive(Debug, Display)]
pub enum DagPoolError {
    /// Block {cid} not found.
    BlockNotFound { cid: String },

    /// Key "{key}" not found.
    KeyNotFound { key: String },

    /// Access denied.
    AccessDenied,

    /// Only {available} of {required} shards were available.
    ShardsUnavailable { available: usize, required: usize },

    /// Corrupt record: {reason}
    CorruptRecord { reason: String },

    /// Content hash mismatch for {cid}.
    HashMismatch { cid: String },

    /// Invalid erasure parameters (k = {k}, m = {m}): {reason}
    InvalidErasureParams {
        k: usize,
        m: usize,
        reason: &'static str,
    },

    /// Invalid slot range {start}..={end}.
    InvalidSlotRange { start: u16, end: u16 },

    /// Conflict: {reason}
    Conflict { reason: String },

    /// Hashing error: {0}
    HashError(crate::hash::Error),

    /// I/O error: {error}
    IoError { error: io::Error },

    /// Operation canceled.
    Canceled,
}

impl DagPoolError {
    /// Returns the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BlockNotFound { .. } => ErrorKind::NotFound,
            Self::KeyNotFound { .. } => ErrorKind::NotFound,
            Self::AccessDenied => ErrorKind::AccessDenied,
            Self::ShardsUnavailable { .. } => ErrorKind::Unavailable,
            Self::CorruptRecord { .. } => ErrorKind::Corrupt,
            Self::HashMismatch { .. } => ErrorKind::Corrupt,
            Self::InvalidErasureParams { .. } => ErrorKind::Conflict,
            Self::InvalidSlotRange { .. } => ErrorKind::Conflict,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::HashError(_) => ErrorKind::Corrupt,
            Self::IoError { .. } => ErrorKind::Internal,
            Self::Canceled => ErrorKind::Canceled,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::BlockNotFound { .. } => "BlockNotFound",
            Self::KeyNotFound { .. } => "KeyNotFound",
            Self::AccessDenied => "AccessDenied",
            Self::ShardsUnavailable { .. } => "ShardsUnavailable",
            Self::CorruptRecord { .. } => "CorruptRecord",
            Self::HashMismatch { .. } => "HashMismatch",
            Self::InvalidErasureParams { .. } => "InvalidErasureParams",
            Self::InvalidSlotRange { .. } => "InvalidSlotRange",
            Self::Conflict { .. } => "Conflict",
            Self::HashError(e) => e.name(),
            Self::IoError { .. } => "IoError",
            Self::Canceled => "Canceled",
        }
    }
}

impl StdError for DagPoolError {}

impl From<io::Error> for DagPoolError {
    fn from(error: io::Error) -> Self {
        Self::IoError { error }
    }
}

impl From<crate::hash::Error> for DagPoolError {
    fn from(error: crate::hash::Error) -> Self {
        Self::HashError(error)
    }
}
