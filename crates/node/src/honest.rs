//! The honest strategy.

use crate::{build_block, relay_all, template_or_genesis};
use pivotsim_core::{Action, MinedBlock, Miner};
use pivotsim_ledger::{InsertOutcome, Ledger, PendingBlocks};
use pivotsim_types::{Block, MiningSlot, NodeIndex};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Mines on the pivot tip, references every other tip, publishes at once.
#[derive(Debug)]
pub struct HonestMiner {
    id: NodeIndex,
    ledger: Ledger,
    pending: PendingBlocks,
}

impl HonestMiner {
    pub fn new(id: NodeIndex, consistency_checks: bool) -> Self {
        let mut ledger = Ledger::new();
        ledger.set_consistency_checks(consistency_checks);
        Self {
            id,
            ledger,
            pending: PendingBlocks::new(),
        }
    }

    /// Blocks waiting for ancestors.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl Miner for HonestMiner {
    fn id(&self) -> NodeIndex {
        self.id
    }

    fn setup(&mut self, genesis: Arc<Block>) {
        self.ledger.insert(genesis);
    }

    fn generate_block(&mut self, slot: MiningSlot, _now: Duration) -> MinedBlock {
        let block = build_block(slot, template_or_genesis(&self.ledger));
        self.ledger.insert(Arc::clone(&block));
        debug!(
            miner = self.id,
            block = %block.index,
            parent = ?block.parent,
            references = block.references.len(),
            "Mined block"
        );
        MinedBlock {
            actions: vec![Action::Broadcast {
                block: Arc::clone(&block),
            }],
            block,
        }
    }

    fn receive_block(&mut self, block: Arc<Block>, _now: Duration) -> Vec<Action> {
        match self.ledger.insert(Arc::clone(&block)) {
            InsertOutcome::Success => {
                let unblocked = self.pending.drain_into(&mut self.ledger);
                relay_all(std::iter::once(block).chain(unblocked))
            }
            InsertOutcome::Existing => Vec::new(),
            InsertOutcome::NeedsAncestors => {
                trace!(miner = self.id, block = %block.index, "Buffering block until ancestors arrive");
                self.pending.push(block);
                Vec::new()
            }
        }
    }

    fn wake(&mut self, block: Arc<Block>, _now: Duration) -> Vec<Action> {
        trace!(miner = self.id, block = %block.index, "Unexpected wake-up");
        Vec::new()
    }

    fn ledger(&self) -> &Ledger {
        &self.ledger
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pivotsim_types::test_utils::{block_by, genesis};
    use pivotsim_types::BlockIndex;

    fn slot(index: u64, miner: NodeIndex) -> MiningSlot {
        MiningSlot {
            index: BlockIndex(index),
            miner,
            residual: 0.5,
            time: Duration::from_secs(index),
        }
    }

    fn relayed(actions: &[Action]) -> Vec<u64> {
        actions
            .iter()
            .map(|a| match a {
                Action::Relay { block } => block.index.0,
                other => panic!("unexpected action {other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_mines_on_pivot_tip_and_references_other_tips() {
        let mut miner = HonestMiner::new(0, true);
        miner.setup(genesis());
        miner.receive_block(block_by(1, 1, 0, &[], 0.9), Duration::ZERO);
        miner.receive_block(block_by(2, 2, 0, &[], 0.1), Duration::ZERO);

        let mined = miner.generate_block(slot(3, 0), Duration::from_secs(3));
        assert_eq!(mined.block.parent, Some(BlockIndex(1)));
        assert_eq!(mined.block.references, vec![BlockIndex(2)]);
        assert_eq!(mined.block.height, 2);
        assert_eq!(mined.block.ancestor_count, 3);
        assert!(matches!(mined.actions.as_slice(), [Action::Broadcast { .. }]));
        assert_eq!(miner.ledger().pivot_tip(), Some(BlockIndex(3)));
    }

    #[test]
    fn test_out_of_order_blocks_are_buffered_then_relayed() {
        let mut miner = HonestMiner::new(0, true);
        miner.setup(genesis());

        let actions = miner.receive_block(block_by(2, 1, 1, &[], 0.5), Duration::ZERO);
        assert!(actions.is_empty());
        assert_eq!(miner.pending(), 1);

        let actions = miner.receive_block(block_by(1, 1, 0, &[], 0.5), Duration::ZERO);
        assert_eq!(relayed(&actions), vec![1, 2]);
        assert_eq!(miner.pending(), 0);
        assert_eq!(miner.ledger().pivot_tip(), Some(BlockIndex(2)));
    }

    #[test]
    fn test_duplicate_delivery_is_silent() {
        let mut miner = HonestMiner::new(0, false);
        miner.setup(genesis());
        let block = block_by(1, 1, 0, &[], 0.5);
        assert_eq!(relayed(&miner.receive_block(Arc::clone(&block), Duration::ZERO)), vec![1]);
        assert!(miner.receive_block(block, Duration::ZERO).is_empty());
    }
}
