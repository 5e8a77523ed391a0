//! # SKS Recon Core
//!
//! Pure primitives for SKS-style set reconciliation: finite-field integers,
//! polynomials over them, and the rational-function interpolation that
//! recovers a bounded symmetric difference from a handful of samples.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`Zp`] - An integer reduced modulo a prime, the atomic value type
//! - [`Poly`] - Polynomial with ascending-degree [`Zp`] coefficients
//! - [`ZSet`] - Ordered set of field elements
//! - [`Bitstring`] - Bit path of an element, used for prefix-tree descent
//! - [`RationalFn`] - Numerator/denominator pair returned by [`interpolate`]
//!
//! ## Reconciliation
//!
//! Two replicas evaluate the characteristic polynomial of their sets at the
//! same fixed sample points. The ratio of the evaluations is a rational
//! function whose numerator and denominator roots are exactly the elements
//! unique to each side:
//!
//! ```rust
//! use sks_recon_core::{p_sks, reconcile, zpoints, Zp, ZSet};
//!
//! let p = p_sks();
//! let points = zpoints(&p, 4);
//! let ours = [Zp::from_i64(&p, 65537)];
//! let theirs = [Zp::from_i64(&p, 65539), Zp::from_i64(&p, 65541)];
//!
//! let values: Vec<Zp> = points
//!     .iter()
//!     .map(|k| {
//!         let num = theirs.iter().fold(Zp::one(&p), |acc, z| acc * (k - z));
//!         let den = ours.iter().fold(Zp::one(&p), |acc, z| acc * (k - z));
//!         num / den
//!     })
//!     .collect();
//!
//! let (theirs_only, ours_only) = reconcile(&values, &points, 1).unwrap();
//! assert_eq!(theirs_only, ZSet::from_iter(theirs));
//! assert_eq!(ours_only, ZSet::from_iter(ours));
//! ```

pub mod bitstring;
pub mod decode;
pub mod error;
pub mod matrix;
pub mod poly;
pub mod zp;
pub mod zset;

pub use bitstring::Bitstring;
pub use decode::{interpolate, reconcile, zpoints};
pub use error::{CoreError, Result};
pub use matrix::Matrix;
pub use poly::{Poly, RationalFn};
pub use zp::{digest_to_zp, pad_sks_element, p_sks, Zp, SKS_ZP_NBYTES};
pub use zset::ZSet;
