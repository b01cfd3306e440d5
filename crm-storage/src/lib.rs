//! CRM storage layer
//!
//! Streaming database export, the backup scheduling gate, storage quota
//! accounting and a file manager spanning a remote object store and a local
//! filesystem root.

pub mod audit;
pub mod auth;
pub mod backups;
pub mod error;
pub mod export;
pub mod files;
pub mod local;
pub mod quota;
pub mod remote;
pub mod scheduler;
pub mod settings;

// Re-export commonly used types
pub use auth::Actor;
pub use error::StorageError;
pub type Result<T> = std::result::Result<T, StorageError>;
