//! The per-node ledger and its incremental insert.

use crate::consistency::ConsistencyError;
use pivotsim_types::{Block, BlockIndex, CountMap, NodeIndex};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, trace};

/// Result of [`Ledger::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The block was added.
    Success,
    /// The block was already present; nothing changed.
    Existing,
    /// The parent or a reference is not known locally yet; nothing changed.
    /// The caller should buffer the block and retry later.
    NeedsAncestors,
}

/// Local bookkeeping for one block.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub(crate) block: Arc<Block>,
    pub(crate) parent: Option<BlockIndex>,
    pub(crate) max_child: Option<BlockIndex>,
    /// Delta-encoded subtree weight, see the crate docs.
    pub(crate) weight: i64,
    pub(crate) children: Vec<BlockIndex>,
    pub(crate) ref_children: Vec<BlockIndex>,
}

impl LedgerEntry {
    fn new(block: Arc<Block>, weight: i64) -> Self {
        Self {
            parent: block.parent,
            block,
            max_child: None,
            weight,
            children: Vec::new(),
            ref_children: Vec::new(),
        }
    }

    /// Whether the block currently lies on the pivot chain.
    pub fn is_pivot(&self) -> bool {
        self.weight <= 0
    }

    pub fn block(&self) -> &Arc<Block> {
        &self.block
    }

    pub fn parent(&self) -> Option<BlockIndex> {
        self.parent
    }

    /// The child currently believed to carry the heaviest subtree.
    pub fn max_child(&self) -> Option<BlockIndex> {
        self.max_child
    }

    /// Locally known children (parent edges only).
    pub fn children(&self) -> &[BlockIndex] {
        &self.children
    }

    /// Locally known blocks referencing this one.
    pub fn ref_children(&self) -> &[BlockIndex] {
        &self.ref_children
    }
}

/// Edges a miner should give a new block, derived from its current view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTemplate {
    /// Current pivot tip.
    pub parent: BlockIndex,
    /// Every other tip, ascending.
    pub references: Vec<BlockIndex>,
    /// Height of the new block.
    pub height: u64,
    /// Blocks in the view at mining time.
    pub ancestor_count: u64,
}

/// One node's view of the block DAG.
///
/// Pure and synchronous. Only the owning node's event handlers touch it.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    entries: HashMap<BlockIndex, LedgerEntry>,
    /// Blocks with no locally known child or reference-child.
    tips: BTreeSet<BlockIndex>,
    pivot_tip: Option<BlockIndex>,
    genesis: Option<BlockIndex>,
    /// Number of blocks inserted so far.
    total_weight: i64,
    /// Run the full consistency check after every insert.
    check_consistency: bool,
}

impl Ledger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty ledger that verifies every invariant after each insert
    /// and panics on the first violation.
    ///
    /// The check walks the whole ledger, so this is meant for tests and debug
    /// runs.
    pub fn with_consistency_checks() -> Self {
        Self {
            check_consistency: true,
            ..Self::default()
        }
    }

    /// Enable or disable per-insert consistency checks.
    pub fn set_consistency_checks(&mut self, enabled: bool) {
        self.check_consistency = enabled;
    }

    // ─── Queries ───

    pub fn contains(&self, index: BlockIndex) -> bool {
        self.entries.contains_key(&index)
    }

    pub fn get(&self, index: BlockIndex) -> Option<&LedgerEntry> {
        self.entries.get(&index)
    }

    /// Number of blocks inserted.
    pub fn total_weight(&self) -> u64 {
        self.total_weight as u64
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn genesis(&self) -> Option<BlockIndex> {
        self.genesis
    }

    /// Last block of the pivot chain.
    pub fn pivot_tip(&self) -> Option<BlockIndex> {
        self.pivot_tip
    }

    /// The pivot tip's block.
    pub fn pivot_tip_block(&self) -> Option<&Arc<Block>> {
        self.pivot_tip.map(|tip| &self.entries[&tip].block)
    }

    pub fn tips(&self) -> &BTreeSet<BlockIndex> {
        &self.tips
    }

    /// Whether the ledger holds the block's parent and every reference.
    pub fn has_all_ancestors(&self, block: &Block) -> bool {
        block.predecessors().all(|p| self.contains(p))
    }

    /// True subtree size of a block (itself plus all parent-edge descendants).
    pub fn true_weight(&self, index: BlockIndex) -> Option<u64> {
        self.entries
            .get(&index)
            .map(|entry| self.weight_of(entry) as u64)
    }

    /// Pivot chain from genesis to the pivot tip.
    pub fn pivot_chain(&self) -> Vec<BlockIndex> {
        let mut chain = Vec::new();
        let mut current = self.genesis;
        while let Some(index) = current {
            chain.push(index);
            current = self.entries[&index].max_child;
        }
        chain
    }

    /// Number of pivot blocks (genesis excluded) credited to each miner.
    pub fn pivot_share(&self) -> CountMap<NodeIndex> {
        self.pivot_chain()
            .into_iter()
            .filter_map(|index| self.entries[&index].block.miner)
            .collect()
    }

    /// Edges for a block mined on top of this view: the pivot tip as parent
    /// and every other tip as a reference.
    pub fn block_template(&self) -> Option<BlockTemplate> {
        let parent = self.pivot_tip?;
        let references = self.tips.iter().copied().filter(|&t| t != parent).collect();
        Some(BlockTemplate {
            parent,
            references,
            height: self.entries[&parent].block.height + 1,
            ancestor_count: self.total_weight(),
        })
    }

    /// Assign every block to a pivot epoch.
    ///
    /// Genesis is epoch 0. The pivot block at chain position `k` defines epoch
    /// `k`, which holds every block in its past (parent and reference edges)
    /// that no earlier epoch claimed. Blocks outside the past of the pivot tip
    /// are absent from the result.
    pub fn epochs(&self) -> BTreeMap<BlockIndex, u64> {
        let mut epochs = BTreeMap::new();
        for (epoch, pivot) in self.pivot_chain().into_iter().enumerate() {
            let mut queue = VecDeque::from([pivot]);
            while let Some(index) = queue.pop_front() {
                if epochs.contains_key(&index) {
                    continue;
                }
                epochs.insert(index, epoch as u64);
                queue.extend(self.entries[&index].block.predecessors());
            }
        }
        epochs
    }

    // ─── Insert ───

    /// Insert a block, updating the pivot chain incrementally.
    ///
    /// # Panics
    ///
    /// When consistency checks are enabled and the insert leaves the ledger
    /// in a state that disagrees with a from-scratch recomputation.
    pub fn insert(&mut self, block: Arc<Block>) -> InsertOutcome {
        if self.entries.contains_key(&block.index) {
            return InsertOutcome::Existing;
        }
        if !self.has_all_ancestors(&block) {
            trace!(block = %block.index, "Missing ancestors");
            return InsertOutcome::NeedsAncestors;
        }

        self.total_weight += 1;
        let index = block.index;

        let Some(parent) = block.parent else {
            // Genesis starts on the pivot chain with delta zero.
            let entry = LedgerEntry::new(block, self.total_weight - 1);
            self.entries.insert(index, entry);
            self.genesis = Some(index);
            self.pivot_tip = Some(index);
            self.tips.insert(index);
            self.verify();
            return InsertOutcome::Success;
        };

        for &reference in &block.references {
            self.entry_mut(reference).ref_children.push(index);
            self.tips.remove(&reference);
        }
        self.entry_mut(parent).children.push(index);
        self.tips.remove(&parent);
        self.tips.insert(index);
        self.entries.insert(index, LedgerEntry::new(block, 1));

        // Climb through off-pivot ancestors; each gains one descendant.
        let mut current = parent;
        while !self.entries[&current].is_pivot() {
            self.update_max_child(current);
            let entry = self.entry_mut(current);
            entry.weight += 1;
            let Some(next) = entry.parent else {
                break;
            };
            current = next;
        }

        // The old pivot branch did not grow, but total_weight did.
        let pivot_point = current;
        let old_branch = self.entries[&pivot_point].max_child;
        self.shift_chain(old_branch, -1);

        if self.update_max_child(pivot_point) {
            let total = self.total_weight;
            self.shift_chain(old_branch, total);
            let new_branch = self.entries[&pivot_point].max_child;
            let new_tip = self.shift_chain(new_branch, -total).unwrap_or(pivot_point);

            if old_branch.is_some() {
                debug!(
                    pivot_point = %pivot_point,
                    old_tip = ?self.pivot_tip,
                    new_tip = %new_tip,
                    "Pivot chain reorganized"
                );
            }
            self.pivot_tip = Some(new_tip);
        }

        self.verify();
        InsertOutcome::Success
    }

    /// Recompute a block's heaviest child. Returns whether it changed.
    fn update_max_child(&mut self, index: BlockIndex) -> bool {
        let heaviest = self.heaviest_child(index);
        let entry = self.entry_mut(index);
        let changed = entry.max_child != heaviest;
        entry.max_child = heaviest;
        changed
    }

    /// Add `delta` to every block along a `max_child` chain. Returns the last
    /// block visited.
    fn shift_chain(&mut self, start: Option<BlockIndex>, delta: i64) -> Option<BlockIndex> {
        let mut last = None;
        let mut current = start;
        while let Some(index) = current {
            let entry = self.entry_mut(index);
            entry.weight += delta;
            current = entry.max_child;
            last = Some(index);
        }
        last
    }

    pub(crate) fn heaviest_child(&self, index: BlockIndex) -> Option<BlockIndex> {
        let mut best: Option<&LedgerEntry> = None;
        for child in &self.entries[&index].children {
            let candidate = &self.entries[child];
            if best.map_or(true, |b| self.outweighs(candidate, b)) {
                best = Some(candidate);
            }
        }
        best.map(|entry| entry.block.index)
    }

    /// Heavier subtree wins, then larger residual, then lower index.
    fn outweighs(&self, a: &LedgerEntry, b: &LedgerEntry) -> bool {
        match self.weight_of(a).cmp(&self.weight_of(b)) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => match a.block.residual.partial_cmp(&b.block.residual) {
                Some(Ordering::Greater) => true,
                Some(Ordering::Less) => false,
                _ => a.block.index < b.block.index,
            },
        }
    }

    pub(crate) fn weight_of(&self, entry: &LedgerEntry) -> i64 {
        if entry.is_pivot() {
            self.total_weight + entry.weight
        } else {
            entry.weight
        }
    }

    fn entry_mut(&mut self, index: BlockIndex) -> &mut LedgerEntry {
        self.entries
            .get_mut(&index)
            .unwrap_or_else(|| panic!("ledger entry {index} missing"))
    }

    fn verify(&self) {
        if self.check_consistency {
            if let Err(e) = self.check_consistency() {
                panic!("ledger diverged from ground truth: {e}");
            }
        }
    }

    pub(crate) fn entries(&self) -> &HashMap<BlockIndex, LedgerEntry> {
        &self.entries
    }

    pub(crate) fn raw_total_weight(&self) -> i64 {
        self.total_weight
    }

    /// Verify every ledger invariant against a from-scratch recomputation.
    pub fn check_consistency(&self) -> Result<(), ConsistencyError> {
        crate::consistency::check(self)
    }
}
