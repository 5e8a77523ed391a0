//! Ordered sets of field elements.

use std::collections::BTreeSet;
use std::fmt;

use crate::zp::Zp;

/// A set of [`Zp`] values with deterministic iteration order.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ZSet {
    items: BTreeSet<Zp>,
}

impl ZSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the value was newly inserted.
    pub fn insert(&mut self, z: Zp) -> bool {
        self.items.insert(z)
    }

    /// Returns `true` if the value was present.
    pub fn remove(&mut self, z: &Zp) -> bool {
        self.items.remove(z)
    }

    pub fn contains(&self, z: &Zp) -> bool {
        self.items.contains(z)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Zp> {
        self.items.iter()
    }

    /// Members in ascending order.
    pub fn items(&self) -> Vec<Zp> {
        self.items.iter().cloned().collect()
    }

    /// Add every member of `other`.
    pub fn add_all(&mut self, other: &ZSet) {
        self.items.extend(other.items.iter().cloned());
    }

    /// Members of `self` that are not in `other`.
    pub fn difference(&self, other: &ZSet) -> ZSet {
        ZSet {
            items: self.items.difference(&other.items).cloned().collect(),
        }
    }
}

impl FromIterator<Zp> for ZSet {
    fn from_iter<I: IntoIterator<Item = Zp>>(iter: I) -> Self {
        ZSet {
            items: iter.into_iter().collect(),
        }
    }
}

impl Extend<Zp> for ZSet {
    fn extend<I: IntoIterator<Item = Zp>>(&mut self, iter: I) {
        self.items.extend(iter);
    }
}

impl IntoIterator for ZSet {
    type Item = Zp;
    type IntoIter = std::collections::btree_set::IntoIter<Zp>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl fmt::Display for ZSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, z) in self.items.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{z}")?;
        }
        write!(f, "}}")
    }
}

impl fmt::Debug for ZSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ZSet{self}")
    }
}
