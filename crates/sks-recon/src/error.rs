//! Error types for the reconciliation node.

use sks_recon_core::CoreError;
use sks_recon_store::StoreError;
use sks_recon_sync::SyncError;
use thiserror::Error;

/// Errors that can occur during node operations.
#[derive(Debug, Error)]
pub enum ReconError {
    /// Field or digest error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Prefix tree error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Protocol or peer error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// A digest that cannot become a field element.
    #[error("bad digest {digest:?}: {source}")]
    BadDigest {
        digest: String,
        #[source]
        source: CoreError,
    },

    /// Fetching recovered elements failed.
    #[error("fetch from {addr} failed: {reason}")]
    Fetch { addr: String, reason: String },

    /// The node was already started or stopped.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, ReconError>;
