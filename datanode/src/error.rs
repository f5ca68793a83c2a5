//! Error handling.

use std::error::Error as StdError;
use std::io;
use std::path::PathBuf;

use displaydoc::Display;

use dagpool::error::DagPoolError;

pub type DataNodeResult<T> = Result<T, DataNodeError>;

/// An error from the DataNode storage layer.
#[derive(Debug, Display)]
pub enum DataNodeError {
    /// Key "{key}" not found.
    NotFound { key: String },

    /// Corrupt record in cask {cask_id}: {reason}
    Corrupt { cask_id: u32, reason: String },

    /// No space left on the store device.
    NoSpace,

    /// Repo {path:?} is locked by another process.
    RepoLocked { path: PathBuf },

    /// Invalid repo at {path:?}: {reason}
    InvalidRepo { path: PathBuf, reason: String },

    /// The member is unreachable.
    Unreachable,

    /// I/O error: {error}
    IoError { error: io::Error },
}

impl DataNodeError {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NotFound",
            Self::Corrupt { .. } => "Corrupt",
            Self::NoSpace => "NoSpace",
            Self::RepoLocked { .. } => "RepoLocked",
            Self::InvalidRepo { .. } => "InvalidRepo",
            Self::Unreachable => "Unreachable",
            Self::IoError { .. } => "IoError",
        }
    }

    /// True when the operation may succeed on retry against the same
    /// member.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable | Self::IoError { .. })
    }
}

impl StdError for DataNodeError {}

impl From<io::Error> for DataNodeError {
    fn from(error: io::Error) -> Self {
        if error.kind() == io::ErrorKind::StorageFull {
            Self::NoSpace
        } else {
            Self::IoError { error }
        }
    }
}

impl From<DataNodeError> for DagPoolError {
    fn from(error: DataNodeError) -> Self {
        match error {
            DataNodeError::NotFound { key } => DagPoolError::KeyNotFound { key },
            DataNodeError::Corrupt { cask_id, reason } => DagPoolError::CorruptRecord {
                reason: format!("cask {}: {}", cask_id, reason),
            },
            DataNodeError::NoSpace => DagPoolError::IoError {
                error: io::Error::new(io::ErrorKind::StorageFull, "no space left on device"),
            },
            DataNodeError::RepoLocked { path } => DagPoolError::Conflict {
                reason: format!("repo {} is locked by another process", path.display()),
            },
            DataNodeError::InvalidRepo { path, reason } => DagPoolError::Conflict {
                reason: format!("invalid repo {}: {}", path.display(), reason),
            },
            DataNodeError::Unreachable => DagPoolError::ShardsUnavailable {
                available: 0,
                required: 1,
            },
            DataNodeError::IoError { error } => DagPoolError::IoError { error },
        }
    }
}
