//! # SKS Recon
//!
//! The unified API for SKS set reconciliation: keyservers agree on which
//! key digests each holds by exchanging a handful of polynomial samples
//! instead of their full digest sets.
//!
//! ## Overview
//!
//! SKS Recon provides:
//!
//! - **Field algebra**: elements of Z/pZ, polynomials and rational function
//!   interpolation over the SKS prime
//! - **Prefix tree**: a digest set partitioned by bit prefix, with sample
//!   values kept per node (in memory or in SQLite)
//! - **Peer**: the recon wire protocol, gossip with weighted partners and
//!   serving inbound sessions
//! - **Recovery**: fetching the elements reconciliation finds missing
//!
//! ## Key Concepts
//!
//! - **Element**: a 16-byte key digest read as a field element.
//! - **Sample value**: the product of `(point - z)` over a node's elements
//!   at a fixed sample point.
//! - **mbar**: how many differences a single node comparison can resolve.
//! - **Recover**: elements a remote holds that this node lacks.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use sks_recon::{ElementFetcher, NodeConfig, ReconNode, Result, Settings};
//! use sks_recon::core::Zp;
//!
//! struct HashQuery;
//!
//! #[async_trait]
//! impl ElementFetcher for HashQuery {
//!     async fn fetch(&self, hkp_addr: &str, chunk: &[Zp]) -> Result<Vec<Zp>> {
//!         // POST the digests to http://{hkp_addr}/pks/hashquery, store the keys
//!         Ok(chunk.to_vec())
//!     }
//! }
//!
//! async fn example() -> Result<()> {
//!     let settings = Settings::parse("[conflux.recon]\nreconAddr = \":11370\"")?;
//!     let node = ReconNode::open("ptree.db", settings, NodeConfig::default())?;
//!     node.start(HashQuery).await?;
//!
//!     // Feed key store changes as they happen
//!     node.digests_changed(["0b1e8a9a4e1e4e0d8f5b06e1c2f3a4b5"], Vec::<String>::new())?;
//!
//!     node.stop().await
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `sks_recon::core` - Field, polynomial and digest primitives
//! - `sks_recon::store` - Prefix tree trait and backends
//! - `sks_recon::sync` - Wire protocol and peer engine

pub mod error;
pub mod node;
pub mod recovery;

// Re-export component crates
pub use sks_recon_core as core;
pub use sks_recon_store as store;
pub use sks_recon_sync as sync;

// Re-export main types for convenience
pub use error::{ReconError, Result};
pub use node::{zp_to_digest, NodeConfig, ReconNode, DIGEST_LEN};
pub use recovery::{
    ElementFetcher, RecoveryConfig, RecoveryReport, RecoveryWorker, DEFAULT_MAX_RECOVERY_ATTEMPTS,
    REQUEST_CHUNK_SIZE,
};

// Re-export commonly used types
pub use sks_recon_core::{digest_to_zp, ZSet, Zp};
pub use sks_recon_store::{MemPrefixTree, PTreeConfig, PrefixTree, SqlitePrefixTree};
pub use sks_recon_sync::{Peer, PeerMode, Recover, SessionTimeouts, Settings};
