//! Core types for the pivot-chain simulator.
//!
//! This crate provides the foundational types shared by every other crate:
//!
//! - **Identifiers**: [`BlockIndex`], [`NodeIndex`]
//! - **Blocks**: [`Block`] (immutable once mined) and [`MiningSlot`] (what the
//!   oracle decides before a miner picks the block's edges)
//! - **Containers**: [`CountMap`] for per-key tallies
//!
//! # Design Philosophy
//!
//! This crate is self-contained and does not depend on any other workspace
//! crate, making it the foundation layer.

mod block;
mod containers;

pub use block::{Block, BlockIndex, MiningSlot, GENESIS_INDEX};
pub use containers::CountMap;

/// Index of a simulated node (miner).
///
/// Nodes are numbered densely from zero in the order they are added to the
/// simulation.
pub type NodeIndex = u32;

/// Test utilities.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    /// The genesis block every ledger starts from.
    pub fn genesis() -> Arc<Block> {
        Arc::new(Block::genesis())
    }

    /// Create a block with the given edges and residual, mined by node 0.
    pub fn block(index: u64, parent: u64, references: &[u64], residual: f64) -> Arc<Block> {
        block_by(index, 0, parent, references, residual)
    }

    /// Create a block mined by a specific node.
    pub fn block_by(
        index: u64,
        miner: NodeIndex,
        parent: u64,
        references: &[u64],
        residual: f64,
    ) -> Arc<Block> {
        let slot = MiningSlot {
            index: BlockIndex(index),
            miner,
            residual,
            time: Duration::from_millis(index),
        };
        Arc::new(Block::new(
            slot,
            BlockIndex(parent),
            references.iter().map(|&r| BlockIndex(r)).collect(),
            // Heights are not consulted by the ledger, only by reports.
            index,
            0,
        ))
    }

    /// Create a linear chain `genesis <- 1 <- 2 <- ... <- len`.
    pub fn chain(len: u64) -> Vec<Arc<Block>> {
        let mut blocks = vec![genesis()];
        for i in 1..=len {
            blocks.push(block(i, i - 1, &[], 0.5));
        }
        blocks
    }
}
