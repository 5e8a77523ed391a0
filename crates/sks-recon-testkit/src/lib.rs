//! # SKS Recon Testkit
//!
//! Testing utilities for SKS set reconciliation.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Vectors**: canned reconciliation and evaluation cases with exact results
//! - **Generators**: Proptest strategies for elements, sets and bitstrings
//! - **Fixtures**: peers over in-memory pipes for whole-session tests
//!
//! ## Vectors
//!
//! ```rust
//! use sks_recon_testkit::vectors::verify_all_vectors;
//!
//! for (name, passed) in verify_all_vectors() {
//!     assert!(passed, "{name}");
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use sks_recon_testkit::generators::SetPair;
//!
//! proptest! {
//!     #[test]
//!     fn union_is_larger(pair: SetPair) {
//!         prop_assert!(pair.union().len() >= pair.a().len());
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use sks_recon_testkit::fixtures::TwoPeers;
//!
//! async fn example(a: &[sks_recon_core::Zp], b: &[sks_recon_core::Zp]) -> anyhow::Result<()> {
//!     let peers = TwoPeers::new(a, b).await?;
//!     peers.converge(3).await?;
//!     peers.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{PeerFixture, TwoPeers};
pub use generators::{set_pair, SetPair};
pub use vectors::{reconcile_vectors, verify_all_vectors, ReconcileVector};
