//! Global record of every mined block and when each node first saw it.

use pivotsim_types::{Block, BlockIndex, NodeIndex};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// What the registry knows about one block, in a serializable form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockRecord {
    pub index: BlockIndex,
    pub miner: Option<NodeIndex>,
    pub height: u64,
    pub parent: Option<BlockIndex>,
    pub references: Vec<BlockIndex>,
    pub mined_at: Duration,
    /// First time each node held the block.
    pub receipts: BTreeMap<NodeIndex, Duration>,
}

/// All blocks in mining order. Receipt times are kept here rather than on
/// the immutable blocks.
#[derive(Debug, Clone)]
pub struct BlockRegistry {
    blocks: Vec<Arc<Block>>,
    receipts: Vec<BTreeMap<NodeIndex, Duration>>,
    nodes: usize,
}

impl BlockRegistry {
    /// Start with genesis, held by every node from time zero.
    pub fn new(genesis: Arc<Block>, nodes: usize) -> Self {
        let held = (0..nodes as NodeIndex).map(|n| (n, Duration::ZERO)).collect();
        Self {
            blocks: vec![genesis],
            receipts: vec![held],
            nodes,
        }
    }

    /// Record a freshly mined block; its miner holds it at `mined_at`.
    ///
    /// Blocks arrive in index order. Anything else is ignored.
    pub fn record_mined(&mut self, block: &Arc<Block>) {
        if block.index.0 as usize != self.blocks.len() {
            return;
        }
        let mut receipts = BTreeMap::new();
        if let Some(miner) = block.miner {
            receipts.insert(miner, block.mined_at);
        }
        self.blocks.push(Arc::clone(block));
        self.receipts.push(receipts);
    }

    /// Note that `node` got `index` at `at`. Later receipts are ignored.
    pub fn record_receipt(&mut self, index: BlockIndex, node: NodeIndex, at: Duration) {
        if let Some(receipts) = self.receipts.get_mut(index.0 as usize) {
            receipts.entry(node).or_insert(at);
        }
    }

    pub fn get(&self, index: BlockIndex) -> Option<&Arc<Block>> {
        self.blocks.get(index.0 as usize)
    }

    pub fn receipt(&self, index: BlockIndex, node: NodeIndex) -> Option<Duration> {
        self.receipts.get(index.0 as usize)?.get(&node).copied()
    }

    /// Number of blocks, genesis included.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Time from mining until the last node received the block, if every
    /// node has it.
    pub fn full_propagation(&self, index: BlockIndex) -> Option<Duration> {
        let block = self.get(index)?;
        let receipts = &self.receipts[index.0 as usize];
        if receipts.len() < self.nodes {
            return None;
        }
        let last = receipts.values().max()?;
        Some(last.saturating_sub(block.mined_at))
    }

    /// Mean [`full_propagation`](Self::full_propagation) over every mined
    /// block that reached all nodes.
    pub fn mean_propagation(&self) -> Option<Duration> {
        let times: Vec<Duration> = (1..self.blocks.len() as u64)
            .filter_map(|i| self.full_propagation(BlockIndex(i)))
            .collect();
        if times.is_empty() {
            return None;
        }
        Some(times.iter().sum::<Duration>() / times.len() as u32)
    }

    /// Serializable view of one block.
    pub fn record(&self, index: BlockIndex) -> Option<BlockRecord> {
        let block = self.get(index)?;
        Some(BlockRecord {
            index: block.index,
            miner: block.miner,
            height: block.height,
            parent: block.parent,
            references: block.references.clone(),
            mined_at: block.mined_at,
            receipts: self.receipts[index.0 as usize].clone(),
        })
    }

    pub fn records(&self) -> impl Iterator<Item = BlockRecord> + '_ {
        (0..self.blocks.len() as u64).filter_map(|i| self.record(BlockIndex(i)))
    }
}
