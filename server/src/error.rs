//! Error handling.

use std::error::Error as StdError;

use anyhow::Error as AnyError;
use displaydoc::Display;

use dagpool::error::{DagPoolError, ErrorKind};
use dagpool_datanode::error::DataNodeError;

pub type ServerResult<T> = Result<T, ServerError>;

/// An error.
#[derive(Debug, Display)]
pub enum ServerError {
    /// The requested block does not exist.
    NoSuchBlock,

    /// Access denied.
    AccessDenied,

    /// The requested DagNode does not exist.
    NoSuchDagNode { name: String },

    /// The DagNode already exists.
    DagNodeAlreadyExists { name: String },

    /// The requested user does not exist.
    NoSuchUser { username: String },

    /// The user already exists.
    UserAlreadyExists { username: String },

    /// The user is protected and cannot be modified.
    ProtectedUser { username: String },

    /// Invalid policy "{name}".
    InvalidPolicy { name: String },

    /// Only {available} of {required} members responded in time.
    Unavailable { available: usize, required: usize },

    /// Conflict: {reason}
    Conflict { reason: String },

    /// The operation was canceled.
    Canceled,

    /// Database error: {0}
    DatabaseError(AnyError),

    /// Storage error: {0}
    StorageError(AnyError),

    /// Error from the common components.
    DagPoolError(DagPoolError),

    /// Error from a DataNode: {0}
    DataNodeError(DataNodeError),
}

impl ServerError {
    pub fn database_error(error: impl StdError + Send + Sync + 'static) -> Self {
        Self::DatabaseError(AnyError::new(error))
    }

    pub fn storage_error(error: impl StdError + Send + Sync + 'static) -> Self {
        Self::StorageError(AnyError::new(error))
    }

    /// Returns the classification of this error per the public
    /// taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoSuchBlock => ErrorKind::NotFound,
            Self::AccessDenied => ErrorKind::AccessDenied,
            Self::NoSuchDagNode { .. } => ErrorKind::NotFound,
            Self::DagNodeAlreadyExists { .. } => ErrorKind::Conflict,
            Self::NoSuchUser { .. } => ErrorKind::NotFound,
            Self::UserAlreadyExists { .. } => ErrorKind::Conflict,
            Self::ProtectedUser { .. } => ErrorKind::Conflict,
            Self::InvalidPolicy { .. } => ErrorKind::Conflict,
            Self::Unavailable { .. } => ErrorKind::Unavailable,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Canceled => ErrorKind::Canceled,
            Self::DatabaseError(_) => ErrorKind::Internal,
            Self::StorageError(_) => ErrorKind::Internal,
            Self::DagPoolError(e) => e.kind(),
            Self::DataNodeError(e) => match e {
                DataNodeError::NotFound { .. } => ErrorKind::NotFound,
                DataNodeError::Corrupt { .. } => ErrorKind::Corrupt,
                DataNodeError::Unreachable => ErrorKind::Unavailable,
                DataNodeError::RepoLocked { .. } => ErrorKind::Conflict,
                DataNodeError::InvalidRepo { .. } => ErrorKind::Conflict,
                _ => ErrorKind::Internal,
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::NoSuchBlock => "NoSuchBlock",
            Self::AccessDenied => "AccessDenied",
            Self::NoSuchDagNode { .. } => "NoSuchDagNode",
            Self::DagNodeAlreadyExists { .. } => "DagNodeAlreadyExists",
            Self::NoSuchUser { .. } => "NoSuchUser",
            Self::UserAlreadyExists { .. } => "UserAlreadyExists",
            Self::ProtectedUser { .. } => "ProtectedUser",
            Self::InvalidPolicy { .. } => "InvalidPolicy",
            Self::Unavailable { .. } => "Unavailable",
            Self::Conflict { .. } => "Conflict",
            Self::Canceled => "Canceled",
            Self::DatabaseError(_) => "DatabaseError",
            Self::StorageError(_) => "StorageError",
            Self::DagPoolError(e) => e.name(),
            Self::DataNodeError(e) => e.name(),
        }
    }

    /// True when the block or key simply is not there.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl StdError for ServerError {}

impl From<DagPoolError> for ServerError {
    fn from(error: DagPoolError) -> Self {
        Self::DagPoolError(error)
    }
}

impl From<DataNodeError> for ServerError {
    fn from(error: DataNodeError) -> Self {
        Self::DataNodeError(error)
    }
}

impl From<sea_orm::DbErr> for ServerError {
    fn from(error: sea_orm::DbErr) -> Self {
        Self::DatabaseError(AnyError::new(error))
    }
}
