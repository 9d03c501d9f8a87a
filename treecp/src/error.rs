//! Error types for the transfer engine

use std::path::PathBuf;
use treecp_core::StoreError;

/// Result type alias for transfer operations
pub type Result<T> = std::result::Result<T, TransferError>;

/// Error type for transfer operations
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// Source root does not exist
    #[error("No node found at '{0}'")]
    NotFound(String),

    /// A remote store call failed
    #[error("Remote store unavailable: {0}")]
    StoreUnavailable(StoreError),

    /// Existing destination entry has the wrong type
    #[error("Target conflict at '{path}': {message}")]
    TargetConflict { path: String, message: String },

    /// Copy of a single file failed
    #[error("Transfer of '{path}' failed: {message}")]
    TransferFailed { path: String, message: String },

    /// Local filesystem errors outside a single file copy
    #[error("IO error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Both endpoints live on the same backend
    #[error("Unsupported transfer: {0}")]
    Unsupported(String),
}

impl TransferError {
    /// Create a new target conflict error
    pub fn conflict(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TargetConflict {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new transfer failure for one file
    pub fn transfer_failed(path: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::TransferFailed {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Create a new local IO error
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Any adapter failure, whatever its kind, as a store outage
    pub fn store_unavailable(error: StoreError) -> Self {
        Self::StoreUnavailable(error)
    }

    /// Attach a failure to the file it happened on. Conflicts keep their kind.
    pub fn for_file(self, path: impl Into<String>) -> Self {
        match self {
            Self::TargetConflict { .. } | Self::TransferFailed { .. } => self,
            other => Self::transfer_failed(path, other),
        }
    }

    /// Path the error is about, when it has one
    pub fn path(&self) -> Option<String> {
        match self {
            Self::NotFound(path) => Some(path.clone()),
            Self::TargetConflict { path, .. } | Self::TransferFailed { path, .. } => {
                Some(path.clone())
            }
            Self::Io { path, .. } => Some(path.display().to_string()),
            Self::StoreUnavailable(_) | Self::Unsupported(_) => None,
        }
    }
}

impl From<StoreError> for TransferError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(path) => Self::NotFound(path),
            StoreError::Conflict { path, message } => Self::TargetConflict { path, message },
            other if other.is_not_found() => Self::NotFound(other.to_string()),
            other => Self::StoreUnavailable(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_mapping() {
        let not_found: TransferError = StoreError::NotFound("a/b".to_string()).into();
        assert!(matches!(not_found, TransferError::NotFound(p) if p == "a/b"));

        let conflict: TransferError = StoreError::conflict("a", "folder").into();
        assert!(matches!(conflict, TransferError::TargetConflict { .. }));

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let missing: TransferError = StoreError::Io(io).into();
        assert!(matches!(missing, TransferError::NotFound(_)));

        let down: TransferError = StoreError::Unavailable("timeout".to_string()).into();
        assert!(matches!(down, TransferError::StoreUnavailable(_)));
    }

    #[test]
    fn test_for_file_keeps_conflicts() {
        let conflict = TransferError::conflict("x", "folder").for_file("y");
        assert_eq!(conflict.path().as_deref(), Some("x"));

        let failed = TransferError::StoreUnavailable(StoreError::Unavailable("down".to_string()))
            .for_file("docs/a.txt");
        assert!(matches!(failed, TransferError::TransferFailed { .. }));
        assert_eq!(failed.path().as_deref(), Some("docs/a.txt"));
        assert!(failed.to_string().contains("down"));
    }
}
