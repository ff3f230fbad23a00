//! Mining strategies.
//!
//! Both strategies implement [`pivotsim_core::Miner`]. They never touch the
//! network directly: every side effect leaves as an [`Action`] for the oracle
//! to carry out.
//!
//! - [`HonestMiner`]: mines on its pivot tip, publishes immediately and relays
//!   everything it learns.
//! - [`WithholdingMiner`]: keeps a private chain and releases held blocks only
//!   while the public pivot tip belongs to someone else.

mod honest;
mod withholding;

pub use honest::HonestMiner;
pub use withholding::{WithholdStrategy, WithholdingMiner};

use pivotsim_core::Action;
use pivotsim_ledger::{BlockTemplate, Ledger};
use pivotsim_types::{Block, MiningSlot, GENESIS_INDEX};
use std::sync::Arc;

/// Build a block from an oracle slot and a template.
fn build_block(slot: MiningSlot, template: BlockTemplate) -> Arc<Block> {
    Arc::new(Block::new(
        slot,
        template.parent,
        template.references,
        template.height,
        template.ancestor_count,
    ))
}

/// The view's template, or a bare child of genesis for a view that was never
/// set up.
fn template_or_genesis(ledger: &Ledger) -> BlockTemplate {
    ledger.block_template().unwrap_or(BlockTemplate {
        parent: GENESIS_INDEX,
        references: Vec::new(),
        height: 1,
        ancestor_count: 0,
    })
}

fn relay_all(blocks: impl IntoIterator<Item = Arc<Block>>) -> Vec<Action> {
    blocks
        .into_iter()
        .map(|block| Action::Relay { block })
        .collect()
}
