use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("No node found at {0}")]
    NotFound(String),

    #[error("Conflict at {path}: {message}")]
    Conflict { path: String, message: String },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid listing pattern: {0}")]
    Pattern(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metadata serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Upload of {path} failed: {message}")]
    Upload { path: String, message: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn conflict(path: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Conflict {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn upload(path: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Upload {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            StoreError::NotFound(_) => true,
            StoreError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
