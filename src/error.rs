use std::io;

use thiserror::Error;

/// Errors produced by filesystem backends.
///
/// The locking wrappers never create these; they pass through whatever the
/// wrapped implementation returned.
#[derive(Error, Debug)]
pub enum FsError {
    #[error("{path}: no such file or directory")]
    NotFound { path: String },

    #[error("{path}: file exists")]
    AlreadyExists { path: String },

    #[error("{path}: not a directory")]
    NotADirectory { path: String },

    #[error("{path}: is a directory")]
    IsADirectory { path: String },

    #[error("{path}: directory not empty")]
    DirectoryNotEmpty { path: String },

    #[error("{path}: permission denied")]
    PermissionDenied { path: String },

    #[error("{path}: invalid argument: {reason}")]
    InvalidInput { path: String, reason: String },

    #[error("{path}: invalid path")]
    InvalidPath { path: String },

    #[error("{path}: file already closed")]
    Closed { path: String },

    #[error("{path}: too many levels of symbolic links")]
    TooManyLinks { path: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl FsError {
    pub fn is_not_found(&self) -> bool {
        match self {
            FsError::NotFound { .. } => true,
            FsError::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    pub fn is_already_exists(&self) -> bool {
        match self {
            FsError::AlreadyExists { .. } => true,
            FsError::Io(e) => e.kind() == io::ErrorKind::AlreadyExists,
            _ => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, FsError::Closed { .. })
    }
}

pub type Result<T> = std::result::Result<T, FsError>;
