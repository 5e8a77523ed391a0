//! Error types for the store module.

use sks_recon_core::CoreError;
use thiserror::Error;

/// Errors that can occur during prefix-tree operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Node or element serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Element is already present in the tree.
    #[error("duplicate element: {0}")]
    DuplicateElement(String),

    /// Element is not present in the tree.
    #[error("element not found: {0}")]
    ElementNotFound(String),

    /// No node stored under the key.
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// Element coincides with a sample point and cannot be represented.
    #[error("element {0} is a sample point")]
    SamplePointElement(String),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Field arithmetic error.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
