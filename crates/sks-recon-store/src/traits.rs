//! PrefixTree trait: the abstract interface over tree backends.
//!
//! The reconciliation engine only sees this trait, so in-memory and
//! persistent trees are interchangeable.

use async_trait::async_trait;
use sks_recon_core::{Bitstring, Zp};

use crate::config::PTreeConfig;
use crate::error::{Result, StoreError};

/// A point-in-time view of one tree node.
///
/// Nodes are identified by their key. A snapshot stays valid only until the
/// next mutation of the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixNode {
    pub(crate) key: Bitstring,
    pub(crate) svalues: Vec<Zp>,
    pub(crate) size: usize,
    pub(crate) leaf: bool,
}

impl PrefixNode {
    /// Path from the root, `bit_quantum` bits per level.
    pub fn key(&self) -> &Bitstring {
        &self.key
    }

    /// Characteristic-polynomial evaluations at the tree's sample points.
    pub fn svalues(&self) -> &[Zp] {
        &self.svalues
    }

    /// Number of elements at or below this node.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_leaf(&self) -> bool {
        self.leaf
    }

    /// Depth below the root.
    pub fn depth(&self, bit_quantum: usize) -> usize {
        self.key.bit_len() / bit_quantum
    }

    /// Key of the parent node, or `None` at the root.
    pub fn parent_key(&self, bit_quantum: usize) -> Option<Bitstring> {
        let len = self.key.bit_len();
        (len >= bit_quantum && len > 0).then(|| self.key.prefix(len - bit_quantum))
    }
}

/// The PrefixTree trait: async interface to a reconciliation tree.
///
/// # Design Notes
///
/// - **Sample values**: every node carries the product of `(point - z)`
///   over the elements below it, maintained incrementally on each
///   insert and remove.
/// - **Split/join**: leaves split into `2^bit_quantum` children past the
///   split threshold; interior nodes fold back into a leaf at or below the
///   join threshold.
/// - **Membership**: inserting a present element or removing an absent
///   one fails without touching the tree.
#[async_trait]
pub trait PrefixTree: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Geometry
    // ─────────────────────────────────────────────────────────────────────────

    /// The tree's shape parameters.
    fn config(&self) -> &PTreeConfig;

    /// Sample points shared by every node.
    fn points(&self) -> &[Zp];

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Reset to an empty tree.
    async fn init(&self) -> Result<()>;

    /// Create backing storage and the root node, if absent.
    async fn create(&self) -> Result<()>;

    /// Discard all nodes and elements.
    async fn drop_tree(&self) -> Result<()>;

    /// Release backend resources.
    async fn close(&self) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Navigation
    // ─────────────────────────────────────────────────────────────────────────

    /// The root node.
    async fn root(&self) -> Result<PrefixNode>;

    /// The deepest existing node whose key is a prefix of `key`.
    async fn node(&self, key: &Bitstring) -> Result<PrefixNode>;

    /// Children of `node` in index order; empty for a leaf.
    async fn children(&self, node: &PrefixNode) -> Result<Vec<PrefixNode>>;

    /// Every element at or below `node`.
    async fn elements(&self, node: &PrefixNode) -> Result<Vec<Zp>>;

    /// Whether `z` is in the tree.
    async fn contains(&self, z: &Zp) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Mutation
    // ─────────────────────────────────────────────────────────────────────────

    /// Add an element.
    async fn insert(&self, z: &Zp) -> Result<()>;

    /// Remove an element.
    async fn remove(&self, z: &Zp) -> Result<()>;
}

/// Helper methods for any [`PrefixTree`].
#[async_trait]
pub trait PrefixTreeExt: PrefixTree {
    /// The node on `z`'s path where `z` is or would be stored.
    async fn find(&self, z: &Zp) -> Result<PrefixNode> {
        self.node(&Bitstring::from_zp(z)).await
    }

    /// The parent of `node`, or `None` at the root.
    async fn parent(&self, node: &PrefixNode) -> Result<Option<PrefixNode>> {
        match node.parent_key(self.config().bit_quantum) {
            Some(key) => self.node(&key).await.map(Some),
            None => Ok(None),
        }
    }

    /// Insert each element, stopping at the first failure.
    async fn insert_all(&self, zs: &[Zp]) -> Result<()> {
        for z in zs {
            self.insert(z).await?;
        }
        Ok(())
    }
}

impl<T: PrefixTree + ?Sized> PrefixTreeExt for T {}

/// Child index of `bs` at `depth`: bit `j` of the index is bit
/// `depth * bit_quantum + j` of the path. Bits past the end read as zero.
pub fn next_child(bs: &Bitstring, depth: usize, bit_quantum: usize) -> usize {
    (0..bit_quantum)
        .filter(|j| {
            let i = depth * bit_quantum + j;
            i < bs.bit_len() && bs.get(i)
        })
        .fold(0, |index, j| index | (1 << j))
}

/// Key of child `index` under `parent`.
pub fn child_key(parent: &Bitstring, index: usize, bit_quantum: usize) -> Bitstring {
    let base = parent.bit_len();
    let mut key = parent.prefix(base + bit_quantum);
    for j in 0..bit_quantum {
        key.assign(base + j, (index >> j) & 1 == 1);
    }
    key
}

/// Factors multiplied into each sample value when inserting `z`.
pub fn add_element_array(points: &[Zp], z: &Zp) -> Result<Vec<Zp>> {
    points
        .iter()
        .map(|point| {
            let m = point - z;
            if m.is_zero() {
                Err(StoreError::SamplePointElement(z.to_string()))
            } else {
                Ok(m)
            }
        })
        .collect()
}

/// Factors multiplied into each sample value when removing `z`.
pub fn del_element_array(points: &[Zp], z: &Zp) -> Result<Vec<Zp>> {
    points
        .iter()
        .map(|point| {
            (point - z)
                .inv()
                .ok_or_else(|| StoreError::SamplePointElement(z.to_string()))
        })
        .collect()
}

pub(crate) fn update_svalues(svalues: &mut [Zp], marray: &[Zp]) {
    for (s, m) in svalues.iter_mut().zip(marray) {
        *s *= m;
    }
}
