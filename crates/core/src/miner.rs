//! The miner capability trait.

use pivotsim_ledger::Ledger;
use pivotsim_types::{Block, BlockIndex, MiningSlot, NodeIndex};
use std::sync::Arc;
use std::time::Duration;

/// Something a miner asks the oracle to do on its behalf.
#[derive(Debug, Clone)]
pub enum Action {
    /// Publish a block this miner mined (or just stopped withholding).
    Broadcast { block: Arc<Block> },

    /// Forward a block received from someone else.
    Relay { block: Arc<Block> },

    /// Call [`Miner::wake`] with `block` at time `at`.
    WakeAt { at: Duration, block: Arc<Block> },
}

/// A freshly mined block and the actions that go with it.
#[derive(Debug, Clone)]
pub struct MinedBlock {
    pub block: Arc<Block>,
    pub actions: Vec<Action>,
}

/// A simulated miner.
///
/// Implementations are:
/// - **Synchronous**: every call runs to completion
/// - **Deterministic**: same state + input = same actions
/// - **I/O free**: network effects are expressed as [`Action`]s
///
/// The oracle never inspects strategy state; it only executes actions.
pub trait Miner: Send {
    /// This miner's node index.
    fn id(&self) -> NodeIndex;

    /// Seed the miner's ledgers with the genesis block.
    fn setup(&mut self, genesis: Arc<Block>);

    /// Turn an oracle slot into a block using this miner's view.
    fn generate_block(&mut self, slot: MiningSlot, now: Duration) -> MinedBlock;

    /// Handle a block delivered by the network.
    fn receive_block(&mut self, block: Arc<Block>, now: Duration) -> Vec<Action>;

    /// Handle a wake-up requested through [`Action::WakeAt`].
    fn wake(&mut self, block: Arc<Block>, now: Duration) -> Vec<Action>;

    /// The publicly observable view of this miner.
    fn ledger(&self) -> &Ledger;

    /// Whether the public view holds `index`.
    fn has_block(&self, index: BlockIndex) -> bool {
        self.ledger().contains(index)
    }
}
