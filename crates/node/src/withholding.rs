//! Block-withholding strategies.
//!
//! A withholding miner keeps two views of the DAG:
//!
//! ```text
//!   public:  everything the rest of the network can see (received + released)
//!   private: public blocks (possibly late) + this miner's withheld blocks
//! ```
//!
//! It mines on its private view and holds every new block back. Held blocks
//! are released oldest first, one at a time, for as long as the public pivot
//! tip was mined by someone else. The check runs after mining and after every
//! block that lands in the public view.

use crate::{build_block, template_or_genesis};
use pivotsim_core::{Action, MinedBlock, Miner};
use pivotsim_ledger::{BlockTemplate, InsertOutcome, Ledger, PendingBlocks};
use pivotsim_types::{Block, MiningSlot, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// How a withholding miner builds blocks and learns about others' blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WithholdStrategy {
    /// Extend the private pivot tip with no references.
    #[default]
    Selfish,
    /// Use the private view's full template, but let blocks from other
    /// miners into the private view only `reference_delay` after they arrive.
    DelayedReference { reference_delay: Duration },
}

#[derive(Debug)]
pub struct WithholdingMiner {
    id: NodeIndex,
    strategy: WithholdStrategy,
    public: Ledger,
    public_pending: PendingBlocks,
    private: Ledger,
    private_pending: PendingBlocks,
    /// Mined but not yet released, oldest first.
    held: VecDeque<Arc<Block>>,
    released: u64,
}

impl WithholdingMiner {
    pub fn new(id: NodeIndex, strategy: WithholdStrategy, consistency_checks: bool) -> Self {
        let mut public = Ledger::new();
        public.set_consistency_checks(consistency_checks);
        let mut private = Ledger::new();
        private.set_consistency_checks(consistency_checks);
        Self {
            id,
            strategy,
            public,
            public_pending: PendingBlocks::new(),
            private,
            private_pending: PendingBlocks::new(),
            held: VecDeque::new(),
            released: 0,
        }
    }

    pub fn strategy(&self) -> WithholdStrategy {
        self.strategy
    }

    /// The view including withheld blocks.
    pub fn private_ledger(&self) -> &Ledger {
        &self.private
    }

    /// Blocks mined but not yet published.
    pub fn held(&self) -> usize {
        self.held.len()
    }

    /// Blocks published so far.
    pub fn released(&self) -> u64 {
        self.released
    }

    fn template(&self) -> BlockTemplate {
        let template = template_or_genesis(&self.private);
        match self.strategy {
            WithholdStrategy::Selfish => BlockTemplate {
                references: Vec::new(),
                ..template
            },
            WithholdStrategy::DelayedReference { .. } => template,
        }
    }

    fn insert_private(&mut self, block: Arc<Block>) {
        match self.private.insert(Arc::clone(&block)) {
            InsertOutcome::Success => {
                self.private_pending.drain_into(&mut self.private);
            }
            InsertOutcome::Existing => {}
            InsertOutcome::NeedsAncestors => self.private_pending.push(block),
        }
    }

    fn public_tip_is_ours(&self) -> bool {
        self.public
            .pivot_tip_block()
            .is_some_and(|tip| tip.is_mined_by(self.id))
    }

    /// Publish held blocks while someone else owns the public pivot tip.
    fn release_held(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        while !self.public_tip_is_ours() {
            let Some(block) = self.held.pop_front() else {
                break;
            };
            if self.public.insert(Arc::clone(&block)) == InsertOutcome::NeedsAncestors {
                self.public_pending.push(Arc::clone(&block));
            }
            self.released += 1;
            debug!(
                miner = self.id,
                block = %block.index,
                still_held = self.held.len(),
                "Releasing withheld block"
            );
            actions.push(Action::Broadcast { block });
        }
        actions
    }
}

impl Miner for WithholdingMiner {
    fn id(&self) -> NodeIndex {
        self.id
    }

    fn setup(&mut self, genesis: Arc<Block>) {
        self.public.insert(Arc::clone(&genesis));
        self.private.insert(genesis);
    }

    fn generate_block(&mut self, slot: MiningSlot, _now: Duration) -> MinedBlock {
        let block = build_block(slot, self.template());
        self.insert_private(Arc::clone(&block));
        self.held.push_back(Arc::clone(&block));
        debug!(
            miner = self.id,
            block = %block.index,
            parent = ?block.parent,
            held = self.held.len(),
            "Mined withheld block"
        );
        MinedBlock {
            actions: self.release_held(),
            block,
        }
    }

    fn receive_block(&mut self, block: Arc<Block>, now: Duration) -> Vec<Action> {
        match self.public.insert(Arc::clone(&block)) {
            InsertOutcome::Success => {}
            InsertOutcome::Existing => return Vec::new(),
            InsertOutcome::NeedsAncestors => {
                trace!(miner = self.id, block = %block.index, "Buffering block until ancestors arrive");
                self.public_pending.push(block);
                return Vec::new();
            }
        }

        let unblocked = self.public_pending.drain_into(&mut self.public);
        let mut actions = Vec::new();
        for block in std::iter::once(block).chain(unblocked) {
            match self.strategy {
                WithholdStrategy::Selfish => self.insert_private(block),
                WithholdStrategy::DelayedReference { reference_delay } => {
                    actions.push(Action::WakeAt {
                        at: now + reference_delay,
                        block,
                    });
                }
            }
        }
        actions.extend(self.release_held());
        actions
    }

    fn wake(&mut self, block: Arc<Block>, _now: Duration) -> Vec<Action> {
        trace!(miner = self.id, block = %block.index, "Admitting delayed block to private view");
        self.insert_private(block);
        Vec::new()
    }

    fn ledger(&self) -> &Ledger {
        &self.public
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pivotsim_types::test_utils::{block_by, genesis};
    use pivotsim_types::BlockIndex;

    const ATTACKER: NodeIndex = 0;

    fn slot(index: u64) -> MiningSlot {
        MiningSlot {
            index: BlockIndex(index),
            miner: ATTACKER,
            residual: 0.5,
            time: Duration::from_secs(index),
        }
    }

    fn selfish() -> WithholdingMiner {
        let mut miner = WithholdingMiner::new(ATTACKER, WithholdStrategy::Selfish, true);
        miner.setup(genesis());
        miner
    }

    fn broadcasts(actions: &[Action]) -> Vec<u64> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Broadcast { block } => Some(block.index.0),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_first_block_is_released_over_genesis() {
        let mut miner = selfish();
        let mined = miner.generate_block(slot(1), Duration::ZERO);
        assert_eq!(broadcasts(&mined.actions), vec![1]);
        assert_eq!(miner.held(), 0);
        assert_eq!(miner.ledger().pivot_tip(), Some(BlockIndex(1)));
    }

    #[test]
    fn test_lead_is_withheld_until_public_tip_changes_hands() {
        let mut miner = selfish();
        miner.generate_block(slot(1), Duration::ZERO);

        // Public tip is ours: the next two blocks stay private.
        let mined = miner.generate_block(slot(2), Duration::ZERO);
        assert!(mined.actions.is_empty());
        assert_eq!(mined.block.parent, Some(BlockIndex(1)));
        assert!(mined.block.references.is_empty());
        miner.generate_block(slot(3), Duration::ZERO);
        assert_eq!(miner.held(), 2);
        assert_eq!(miner.private_ledger().pivot_tip(), Some(BlockIndex(3)));
        assert!(!miner.ledger().contains(BlockIndex(2)));

        // An honest block on top of 1 takes the public tip. One held block is
        // released and wins it back on residual.
        let actions = miner.receive_block(block_by(4, 1, 1, &[], 0.1), Duration::ZERO);
        assert_eq!(broadcasts(&actions), vec![2]);
        assert_eq!(miner.held(), 1);
        assert_eq!(miner.ledger().pivot_tip(), Some(BlockIndex(2)));
        assert_eq!(miner.released(), 2);
    }

    #[test]
    fn test_selfish_private_view_sees_honest_blocks_immediately() {
        let mut miner = selfish();
        let actions = miner.receive_block(block_by(1, 1, 0, &[], 0.5), Duration::ZERO);
        assert!(broadcasts(&actions).is_empty());
        assert!(miner.private_ledger().contains(BlockIndex(1)));

        let mined = miner.generate_block(slot(2), Duration::ZERO);
        assert_eq!(mined.block.parent, Some(BlockIndex(1)));
    }

    #[test]
    fn test_delayed_reference_admits_blocks_after_delay() {
        let delay = Duration::from_secs(5);
        let strategy = WithholdStrategy::DelayedReference {
            reference_delay: delay,
        };
        let mut miner = WithholdingMiner::new(ATTACKER, strategy, true);
        miner.setup(genesis());

        let honest = block_by(1, 1, 0, &[], 0.1);
        let actions = miner.receive_block(Arc::clone(&honest), Duration::from_secs(1));
        let wake = actions.iter().find_map(|a| match a {
            Action::WakeAt { at, block } => Some((*at, block.index)),
            _ => None,
        });
        assert_eq!(wake, Some((Duration::from_secs(6), BlockIndex(1))));
        assert!(miner.ledger().contains(BlockIndex(1)));
        assert!(!miner.private_ledger().contains(BlockIndex(1)));

        // Mining before the wake-up ignores block 1 entirely.
        let mined = miner.generate_block(slot(2), Duration::from_secs(2));
        assert_eq!(mined.block.parent, Some(BlockIndex(0)));
        assert!(mined.block.references.is_empty());

        miner.wake(honest, Duration::from_secs(6));
        assert!(miner.private_ledger().contains(BlockIndex(1)));
        let mined = miner.generate_block(slot(3), Duration::from_secs(7));
        assert_eq!(mined.block.parent, Some(BlockIndex(2)));
        assert_eq!(mined.block.references, vec![BlockIndex(1)]);
    }
}
