//! # SKS Recon Store
//!
//! Prefix-tree storage for set reconciliation. Provides a trait-based
//! interface over the tree with SQLite and in-memory implementations.
//!
//! ## Overview
//!
//! Elements are routed down the tree by the bits of their encoding,
//! `bit_quantum` bits per level. Every node keeps the evaluations of its
//! subtree's characteristic polynomial at a fixed set of sample points, so
//! two peers can compare subtrees by exchanging a handful of field elements.
//!
//! ## Key Types
//!
//! - [`PrefixTree`] - The async trait for all tree operations
//! - [`PrefixNode`] - Snapshot of one node: key, sample values, size
//! - [`MemPrefixTree`] - In-memory tree
//! - [`SqlitePrefixTree`] - SQLite-backed persistent tree
//! - [`PTreeConfig`] - Tree geometry (split threshold, bit quantum, mbar)
//!
//! ## Usage
//!
//! ```rust,no_run
//! use sks_recon_core::digest_to_zp;
//! use sks_recon_store::{PTreeConfig, PrefixTree, PrefixTreeExt, SqlitePrefixTree};
//!
//! async fn example() {
//!     let tree = SqlitePrefixTree::open("ptree.db", PTreeConfig::default()).unwrap();
//!
//!     let z = digest_to_zp("8d3cf8a3d8f1f1bc4b4b4a1e").unwrap();
//!     tree.insert(&z).await.unwrap();
//!
//!     let leaf = tree.find(&z).await.unwrap();
//!     assert!(tree.elements(&leaf).await.unwrap().contains(&z));
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Duplicate inserts fail**: inserting a present element is an error
//! - **Removing absent elements fails**: the tree is left untouched
//! - **Split/join hysteresis**: leaves split above `thresh_mult * mbar`
//!   elements and rejoin at half that

pub mod config;
pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use config::PTreeConfig;
pub use error::{Result, StoreError};
pub use memory::MemPrefixTree;
pub use sqlite::SqlitePrefixTree;
pub use traits::{
    add_element_array, child_key, del_element_array, next_child, PrefixNode, PrefixTree,
    PrefixTreeExt,
};
