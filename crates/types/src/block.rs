//! Block types for the DAG ledger.

use crate::NodeIndex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Globally unique, densely assigned block index.
///
/// Indices are handed out by the oracle in mining order, so a lower index
/// always means the block was mined earlier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct BlockIndex(pub u64);

/// Index of the genesis block.
pub const GENESIS_INDEX: BlockIndex = BlockIndex(0);

impl BlockIndex {
    /// Check if this is the genesis index.
    pub fn is_genesis(&self) -> bool {
        *self == GENESIS_INDEX
    }
}

impl fmt::Display for BlockIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the oracle decides about a block before anyone sees it.
///
/// The oracle draws the discovery time, the winning miner and the tie-break
/// residual. The miner then chooses the parent and reference edges from its
/// own view and turns the slot into a [`Block`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MiningSlot {
    /// Index the mined block will carry.
    pub index: BlockIndex,
    /// Miner that found the block.
    pub miner: NodeIndex,
    /// Fraction lost when the continuous discovery time was rounded up to a
    /// whole tick, in `[0, 1)`.
    pub residual: f64,
    /// Simulated discovery time.
    pub time: Duration,
}

/// A mined block.
///
/// Immutable once created; shared between ledgers as `Arc<Block>`. Children
/// and reference-children are not stored here because each node only knows
/// the subset it has received. Ledgers keep those lists locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Global index.
    pub index: BlockIndex,
    /// Miner that produced the block (`None` for genesis).
    pub miner: Option<NodeIndex>,
    /// Parent edge (`None` for genesis).
    pub parent: Option<BlockIndex>,
    /// Reference edges to tips that were visible but not chosen as parent.
    pub references: Vec<BlockIndex>,
    /// Deterministic tie-break value, see [`MiningSlot::residual`].
    pub residual: f64,
    /// Parent height + 1 (genesis = 0).
    pub height: u64,
    /// Number of blocks in the miner's view when this block was mined.
    pub ancestor_count: u64,
    /// Simulated time the block was mined.
    pub mined_at: Duration,
}

impl Block {
    /// The genesis block. Every ledger contains it from the start.
    pub fn genesis() -> Self {
        Self {
            index: GENESIS_INDEX,
            miner: None,
            parent: None,
            references: Vec::new(),
            residual: 0.0,
            height: 0,
            ancestor_count: 0,
            mined_at: Duration::ZERO,
        }
    }

    /// Build a block from an oracle slot and the edges the miner chose.
    pub fn new(
        slot: MiningSlot,
        parent: BlockIndex,
        references: Vec<BlockIndex>,
        height: u64,
        ancestor_count: u64,
    ) -> Self {
        Self {
            index: slot.index,
            miner: Some(slot.miner),
            parent: Some(parent),
            references,
            residual: slot.residual,
            height,
            ancestor_count,
            mined_at: slot.time,
        }
    }

    /// Check if this is the genesis block.
    pub fn is_genesis(&self) -> bool {
        self.parent.is_none()
    }

    /// Check if the block was mined by the given node.
    pub fn is_mined_by(&self, node: NodeIndex) -> bool {
        self.miner == Some(node)
    }

    /// Parent followed by references: every block this one points at.
    pub fn predecessors(&self) -> impl Iterator<Item = BlockIndex> + '_ {
        self.parent.into_iter().chain(self.references.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_has_no_edges() {
        let genesis = Block::genesis();
        assert!(genesis.is_genesis());
        assert!(genesis.index.is_genesis());
        assert_eq!(genesis.predecessors().count(), 0);
        assert!(!genesis.is_mined_by(0));
    }

    #[test]
    fn test_predecessors_lists_parent_first() {
        let slot = MiningSlot {
            index: BlockIndex(7),
            miner: 3,
            residual: 0.25,
            time: Duration::from_secs(2),
        };
        let block = Block::new(slot, BlockIndex(4), vec![BlockIndex(5), BlockIndex(6)], 3, 6);

        let preds: Vec<_> = block.predecessors().collect();
        assert_eq!(preds, vec![BlockIndex(4), BlockIndex(5), BlockIndex(6)]);
        assert!(block.is_mined_by(3));
        assert_eq!(block.mined_at, Duration::from_secs(2));
    }
}
