//! Error types for the sync module.

use std::io;

use thiserror::Error;

use crate::messages::BUSY_RESPONSE;

/// Errors that can occur during reconciliation sessions.
///
/// Every variant except `Settings` aborts only the session it arose in.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Socket read or write failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Timeout waiting for peer.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Malformed frame or message body.
    #[error("codec error: {0}")]
    Codec(String),

    /// A well-formed message arrived where the protocol does not allow it.
    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),

    /// Peer sent an `Error` message.
    #[error("peer error: {0}")]
    PeerError(String),

    /// We refused the remote configuration.
    #[error("cannot peer: {0}")]
    ConfigRejected(String),

    /// The remote refused our configuration.
    #[error("remote rejected configuration: {0}")]
    RemoteRejectedConfig(String),

    /// The remote advertised an HTTP port that is not a valid TCP port.
    #[error("invalid http port {0}")]
    InvalidHttpPort(u32),

    /// Remote peer configuration is not compatible.
    #[error("remote peer configuration is not compatible")]
    IncompatiblePeer,

    /// Local tree is being mutated or the recovery channel is backlogged.
    #[error("peer is busy handling another request")]
    PeerBusy,

    /// No reachable partner to gossip with.
    #[error("no recon partners configured")]
    NoPartners,

    /// Invalid settings.
    #[error("invalid settings: {0}")]
    Settings(String),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] sks_recon_store::StoreError),

    /// Field or polynomial operation failed.
    #[error("core error: {0}")]
    Core(#[from] sks_recon_core::CoreError),

    /// The peer is shutting down.
    #[error("peer is shutting down")]
    Shutdown,
}

impl SyncError {
    /// The session did not run because one side was mutating its tree or
    /// behind on recovery.
    pub fn is_busy(&self) -> bool {
        match self {
            SyncError::PeerBusy => true,
            SyncError::RemoteRejectedConfig(reason) => reason == BUSY_RESPONSE,
            _ => false,
        }
    }

    /// Errors that stop a gossip attempt before any tree access.
    pub fn is_gossip_blocked(&self) -> bool {
        matches!(
            self,
            SyncError::NoPartners | SyncError::IncompatiblePeer | SyncError::PeerBusy
        )
    }
}

impl From<tokio::time::error::Elapsed> for SyncError {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        SyncError::Timeout(e.to_string())
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
