//! Prefix-tree geometry.

use serde::{Deserialize, Serialize};

/// Default multiplier applied to `mbar` to get the split threshold.
pub const DEFAULT_THRESH_MULT: usize = 10;
/// Default bits consumed per tree level.
pub const DEFAULT_BIT_QUANTUM: usize = 2;
/// Default sample-count parameter.
pub const DEFAULT_MBAR: usize = 5;

/// Shape of a prefix tree. Two peers can only compare sample values if
/// their trees share `bit_quantum` and `mbar`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PTreeConfig {
    #[serde(rename = "threshMult")]
    pub thresh_mult: usize,
    #[serde(rename = "bitQuantum")]
    pub bit_quantum: usize,
    #[serde(rename = "mBar")]
    pub mbar: usize,
}

impl Default for PTreeConfig {
    fn default() -> Self {
        Self {
            thresh_mult: DEFAULT_THRESH_MULT,
            bit_quantum: DEFAULT_BIT_QUANTUM,
            mbar: DEFAULT_MBAR,
        }
    }
}

impl PTreeConfig {
    /// A leaf holding more than this many elements splits on the next insert.
    pub fn split_threshold(&self) -> usize {
        self.thresh_mult * self.mbar
    }

    /// An interior node whose size drops to this or below is joined.
    pub fn join_threshold(&self) -> usize {
        self.split_threshold() / 2
    }

    /// Sample points per node.
    pub fn num_samples(&self) -> usize {
        self.mbar + 1
    }

    /// Children per interior node.
    pub fn num_children(&self) -> usize {
        1 << self.bit_quantum
    }
}
