//! # SKS Recon Sync
//!
//! Wire protocol and peer engine for reconciling prefix trees between
//! keyservers.
//!
//! ## Overview
//!
//! A [`Peer`] owns a [`PrefixTree`](sks_recon_store::PrefixTree) and runs two
//! roles. As a gossip client it periodically dials a weighted-random partner;
//! as a server it accepts sessions from allowed addresses. In each session
//! the accepting side walks its tree and the initiating side answers, until
//! both know which elements they are missing.
//!
//! ## Key Properties
//!
//! - **Compact**: nodes are compared by `mbar + 1` sample values, not contents
//! - **Pipelined**: the server keeps many requests in flight between flushes
//! - **Isolated failures**: a bad message or mismatched config ends only that session
//! - **Read-available**: mutations are queued and applied between sessions
//! - **Observable**: session outcomes are exported as Prometheus metrics
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use sks_recon_store::{MemPrefixTree, PTreeConfig};
//! use sks_recon_sync::{Peer, PeerMode, Settings};
//!
//! async fn example() {
//!     let settings = Settings::parse("[conflux.recon]\nreconAddr = \":11370\"").unwrap();
//!     let tree = Arc::new(MemPrefixTree::new(settings.ptree_config()));
//!     let (peer, mut recover_rx) = Peer::new(settings, tree);
//!     peer.start(PeerMode::Default).await.unwrap();
//!
//!     while let Some(recover) = recover_rx.recv().await {
//!         // fetch recover.remote_elements from recover.hkp_addr() ...
//!         peer.insert(recover.remote_elements.clone());
//!         recover.complete();
//!     }
//!     peer.stop().await;
//! }
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! Gossip (client)                      Serve (server)
//!   |-------- Config ------------------>|
//!   |<------- Config -------------------|
//!   |-------- "passed" ---------------->|
//!   |<------- "passed" -----------------|
//!   |<------- ReconRqstPoly / Full -----|   (one per node, pipelined)
//!   |<------- Flush --------------------|
//!   |-------- Elements / FullElements ->|
//!   |-------- SyncFail ---------------->|   (server descends into children)
//!   |<------- Elements -----------------|
//!   |<------- Done ---------------------|
//! ```

pub mod client;
pub mod codec;
pub mod error;
pub mod gate;
pub mod handshake;
pub mod matcher;
pub mod messages;
pub mod metrics;
pub mod peer;
pub mod recover;
pub mod server;
pub mod settings;
mod tasks;
pub mod transport;

pub use error::{Result, SyncError};
pub use gate::{MutationGuard, ReadGuard, ReconGate};
pub use matcher::IpMatcher;
pub use messages::{limits, Config, MsgType, ReconMsg};
pub use metrics::{metrics, ReconMetrics};
pub use peer::{Peer, PeerMode};
pub use recover::{Recover, RecoverChan};
pub use settings::{Partner, SessionTimeouts, Settings};
pub use transport::{memory, Connection, ReconStream};
