//! Error types for the storage layer.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Path escapes storage root: {0}")]
    OutsideRoot(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Directory is not empty: {0}")]
    NotEmpty(String),

    #[error("Backend error: {0}")]
    Backend(String),

    /// Copy succeeded but removing the source failed; both keys now exist.
    #[error("Rename of {from} to {to} left both keys in place: {reason}")]
    PartialRename {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Invalid setting {key}: {reason}")]
    InvalidSetting { key: String, reason: String },

    #[error("Scan error: {0}")]
    Scan(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StorageError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}
