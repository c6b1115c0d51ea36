//! Rollup shape parameters.

use serde::{Deserialize, Serialize};

/// Monotonically increasing rollup number.
pub type RollupId = u32;

/// Output notes created by every client transaction.
pub const NOTES_PER_TX: u32 = 2;

/// Shape of a rollup: how many txs one inner proof aggregates and how many inner proofs
/// one root proof aggregates.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupSize {
    pub txs_per_inner: u32,
    pub inners_per_root: u32,
}

impl RollupSize {
    pub fn new(txs_per_inner: u32, inners_per_root: u32) -> Self {
        Self {
            txs_per_inner,
            inners_per_root,
        }
    }

    /// Maximum number of txs in one rollup.
    pub fn capacity(&self) -> u32 {
        self.txs_per_inner.saturating_mul(self.inners_per_root)
    }

    /// Number of inner proofs needed to cover `num_txs` transactions.
    pub fn inners_for(&self, num_txs: u32) -> u32 {
        if self.txs_per_inner == 0 {
            return 0;
        }
        num_txs.div_ceil(self.txs_per_inner)
    }

    /// Data tree leaves reserved by one rollup, regardless of how full it is.
    pub fn data_leaves(&self) -> u32 {
        self.capacity().saturating_mul(NOTES_PER_TX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_and_inners() {
        let size = RollupSize::new(4, 3);
        assert_eq!(size.capacity(), 12);
        assert_eq!(size.inners_for(0), 0);
        assert_eq!(size.inners_for(1), 1);
        assert_eq!(size.inners_for(4), 1);
        assert_eq!(size.inners_for(5), 2);
        assert_eq!(size.inners_for(12), 3);
        assert_eq!(size.data_leaves(), 24);
    }
}
