//! Blocks waiting for their ancestors.

use crate::ledger::{InsertOutcome, Ledger};
use pivotsim_types::Block;
use std::collections::VecDeque;
use std::sync::Arc;

/// Buffer for blocks whose parent or references have not arrived yet.
///
/// Blocks are kept in arrival order. [`drain_into`](Self::drain_into) retries
/// all of them until no further block can be inserted.
#[derive(Debug, Clone, Default)]
pub struct PendingBlocks {
    blocks: VecDeque<Arc<Block>>,
}

impl PendingBlocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a block. Duplicates are ignored.
    pub fn push(&mut self, block: Arc<Block>) {
        if !self.contains(&block) {
            self.blocks.push_back(block);
        }
    }

    fn contains(&self, block: &Block) -> bool {
        self.blocks.iter().any(|b| b.index == block.index)
    }

    /// Insert every buffered block whose ancestors are now present, repeating
    /// until nothing changes. Returns the newly inserted blocks in insert
    /// order.
    pub fn drain_into(&mut self, ledger: &mut Ledger) -> Vec<Arc<Block>> {
        let mut inserted = Vec::new();
        loop {
            let before = inserted.len();
            let mut still_pending = VecDeque::with_capacity(self.blocks.len());
            while let Some(block) = self.blocks.pop_front() {
                match ledger.insert(block.clone()) {
                    InsertOutcome::Success => inserted.push(block),
                    InsertOutcome::Existing => {}
                    InsertOutcome::NeedsAncestors => still_pending.push_back(block),
                }
            }
            self.blocks = still_pending;
            if inserted.len() == before || self.blocks.is_empty() {
                return inserted;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
