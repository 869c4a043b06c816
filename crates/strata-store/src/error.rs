//! Error taxonomy for store operations.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::state::FileState;

/// Coarse classification of a [`StoreError`].
///
/// Callers branch on the kind rather than on individual variants, e.g. a
/// registry client treats every `NotFound` as "blob absent".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    WrongState,
    InvalidArgument,
    Io,
}

/// Errors that can occur during store operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("file not found: {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("metadata {suffix} not found for {name}")]
    MetadataNotFound { name: String, suffix: String },

    #[error("file already exists: {}", .path.display())]
    AlreadyExists { path: PathBuf },

    #[error("{name} is in state {actual}, expected one of [{}]", join_labels(.expected))]
    WrongState {
        name: String,
        actual: FileState,
        expected: Vec<FileState>,
    },

    #[error("entry {name} was removed")]
    EntryRemoved { name: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Classify an `io::Error` raised while operating on `path`.
    pub(crate) fn from_io(err: io::Error, path: &Path) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound {
                path: path.to_path_buf(),
            },
            io::ErrorKind::AlreadyExists => StoreError::AlreadyExists {
                path: path.to_path_buf(),
            },
            _ => StoreError::Io {
                path: path.to_path_buf(),
                source: err,
            },
        }
    }

    /// `map_err` adapter for [`StoreError::from_io`].
    pub(crate) fn io(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |err| Self::from_io(err, path)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound { .. }
            | StoreError::MetadataNotFound { .. }
            | StoreError::EntryRemoved { .. } => ErrorKind::NotFound,
            StoreError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            StoreError::WrongState { .. } => ErrorKind::WrongState,
            StoreError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            StoreError::Io { .. } => ErrorKind::Io,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind() == ErrorKind::AlreadyExists
    }

    pub fn is_wrong_state(&self) -> bool {
        self.kind() == ErrorKind::WrongState
    }
}

fn join_labels(states: &[FileState]) -> String {
    states
        .iter()
        .map(|s| s.label())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_classification() {
        let path = Path::new("/tmp/x");

        let err = StoreError::from_io(io::Error::from(io::ErrorKind::NotFound), path);
        assert!(matches!(err, StoreError::NotFound { .. }));

        let err = StoreError::from_io(io::Error::from(io::ErrorKind::AlreadyExists), path);
        assert!(err.is_already_exists());

        let err = StoreError::from_io(io::Error::from(io::ErrorKind::PermissionDenied), path);
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().contains("/tmp/x"));
    }

    #[test]
    fn test_wrong_state_message_lists_expected() {
        let err = StoreError::WrongState {
            name: "abcd".to_string(),
            actual: FileState::new("complete", "/s/complete"),
            expected: vec![
                FileState::new("incomplete", "/s/incomplete"),
                FileState::new("trash", "/s/trash"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "abcd is in state complete, expected one of [incomplete, trash]"
        );
        assert!(err.is_wrong_state());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_metadata_not_found_is_not_found_kind() {
        let err = StoreError::MetadataNotFound {
            name: "abcd".to_string(),
            suffix: "_refcount".to_string(),
        };
        assert!(err.is_not_found());
    }
}
