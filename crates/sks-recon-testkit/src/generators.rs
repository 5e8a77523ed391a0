//! Proptest generators for property-based testing.

use proptest::prelude::*;

use sks_recon_core::{p_sks, Bitstring, ZSet, Zp};

/// Generate a 16-byte key digest.
pub fn digest_bytes() -> impl Strategy<Value = [u8; 16]> {
    any::<[u8; 16]>()
}

/// Generate a lowercase hex digest.
pub fn digest() -> impl Strategy<Value = String> {
    digest_bytes().prop_map(hex::encode)
}

/// Generate an element the way a key store produces one: from a digest.
pub fn element() -> impl Strategy<Value = Zp> {
    digest_bytes().prop_map(|d| Zp::from_le_bytes(&p_sks(), &d))
}

/// Generate a small element, handy when tests print values.
pub fn small_element() -> impl Strategy<Value = Zp> {
    (1_000i64..1_000_000).prop_map(|n| Zp::from_i64(&p_sks(), n))
}

/// Generate a set of up to `max` elements.
pub fn zset(max: usize) -> impl Strategy<Value = ZSet> {
    prop::collection::btree_set(digest_bytes(), 0..=max).prop_map(|digests| {
        let p = p_sks();
        digests.iter().map(|d| Zp::from_le_bytes(&p, d)).collect()
    })
}

/// Generate a bitstring of up to `max_bits` bits.
pub fn bitstring(max_bits: usize) -> impl Strategy<Value = Bitstring> {
    (0..=max_bits).prop_flat_map(|bits| {
        prop::collection::vec(any::<u8>(), bits.div_ceil(8))
            .prop_map(move |bytes| Bitstring::from_bytes(bits, &bytes))
    })
}

/// Two overlapping element sets.
#[derive(Debug, Clone)]
pub struct SetPair {
    pub shared: Vec<Zp>,
    pub only_a: Vec<Zp>,
    pub only_b: Vec<Zp>,
}

impl SetPair {
    /// Everything side a holds.
    pub fn a(&self) -> Vec<Zp> {
        self.shared.iter().chain(&self.only_a).cloned().collect()
    }

    /// Everything side b holds.
    pub fn b(&self) -> Vec<Zp> {
        self.shared.iter().chain(&self.only_b).cloned().collect()
    }

    /// What both sides hold after reconciling.
    pub fn union(&self) -> ZSet {
        self.a().into_iter().chain(self.only_b.iter().cloned()).collect()
    }
}

/// Generate a [`SetPair`] with at most `max_shared` common and `max_diff`
/// unique elements per side.
pub fn set_pair(max_shared: usize, max_diff: usize) -> impl Strategy<Value = SetPair> {
    prop::collection::btree_set(digest_bytes(), 0..=max_shared + 2 * max_diff)
        .prop_flat_map(move |digests| {
            let all: Vec<Zp> = digests
                .iter()
                .map(|d| Zp::from_le_bytes(&p_sks(), d))
                .collect();
            let len = all.len();
            (Just(all), 0..=len.min(max_diff), 0..=len.min(max_diff))
        })
        .prop_map(|(all, na, nb)| {
            let nb = nb.min(all.len() - na);
            let (only_a, rest) = all.split_at(na);
            let (only_b, shared) = rest.split_at(nb);
            SetPair {
                shared: shared.to_vec(),
                only_a: only_a.to_vec(),
                only_b: only_b.to_vec(),
            }
        })
}

impl Arbitrary for SetPair {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        set_pair(64, 16).boxed()
    }
}
