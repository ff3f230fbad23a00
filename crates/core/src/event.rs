//! Event types for the simulation loop.

use pivotsim_types::{Block, MiningSlot, NodeIndex};
use std::sync::Arc;

/// What a shaped packet carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Small announcement of a block the sender holds (INV).
    Announce,
    /// The full block, sent in answer to an announcement (GET).
    Block,
}

/// A packet travelling over a sender's outbound link.
#[derive(Debug, Clone)]
pub struct Packet {
    pub sender: NodeIndex,
    pub receiver: NodeIndex,
    /// Size on the wire in bytes.
    pub size: u64,
    pub kind: PacketKind,
    pub block: Arc<Block>,
}

/// All events the oracle dispatches.
///
/// Events are **passive data**: the oracle matches on them and routes each
/// one to the miner or network model that owns the state it touches.
#[derive(Debug, Clone)]
pub enum Event {
    // ═══════════════════════════════════════════════════════════════════════
    // Mining
    // ═══════════════════════════════════════════════════════════════════════
    /// The miner named in the slot found a block.
    GenerateBlock { slot: MiningSlot },

    /// A withholding miner asked to be woken to process a block later.
    MinerWake { miner: NodeIndex, block: Arc<Block> },

    // ═══════════════════════════════════════════════════════════════════════
    // Delivery
    // ═══════════════════════════════════════════════════════════════════════
    /// A block reaches a node.
    ReceiveBlock {
        block: Arc<Block>,
        receiver: NodeIndex,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Network internals
    // ═══════════════════════════════════════════════════════════════════════
    /// Gossip model: try to push a block to the next eligible peer.
    PeerRecheck {
        sender: NodeIndex,
        block: Arc<Block>,
        /// Originator's first send. Exempt from the backlog cap.
        first: bool,
    },

    /// Relay model: an announcement is ready to be queued on the sender's
    /// link (block verified).
    Announce {
        from: NodeIndex,
        to: NodeIndex,
        block: Arc<Block>,
    },

    /// Relay model: the sender's shaper finishes its next packet.
    TrafficWakeup { sender: NodeIndex },

    /// Relay model: a packet arrives at its receiver.
    PacketDelivered { packet: Packet },
}

impl Event {
    /// Short name for logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::GenerateBlock { .. } => "GenerateBlock",
            Event::MinerWake { .. } => "MinerWake",
            Event::ReceiveBlock { .. } => "ReceiveBlock",
            Event::PeerRecheck { .. } => "PeerRecheck",
            Event::Announce { .. } => "Announce",
            Event::TrafficWakeup { .. } => "TrafficWakeup",
            Event::PacketDelivered { .. } => "PacketDelivered",
        }
    }
}
