//! Deterministic in-memory block propagation for simulation.
//!
//! Three models sit behind one [`Network`] enum:
//!
//! - [`NetworkModel::DirectBroadcast`]: fixed delays, no topology
//! - [`NetworkModel::GossipPeer`]: one push at a time per sender over a random
//!   peer graph, uplink serialized by a "next free" cursor
//! - [`NetworkModel::BandwidthFairRelay`]: announce/request relay between
//!   regions, every uplink fair-queued by the [`TrafficShaper`]
//!
//! Models never call miners. They turn broadcasts into timestamped events on
//! the shared [`EventQueue`], all randomness drawn from the caller's seeded
//! RNG.

mod config;
mod direct;
mod gossip;
mod relay;
mod topology;
mod traffic;

pub use config::{LatencyTable, NetworkConfig, NetworkModel};
pub use direct::DirectNetwork;
pub use gossip::GossipNetwork;
pub use relay::RelayNetwork;
pub use topology::Topology;
pub use traffic::{ShaperStats, TrafficShaper};

use pivotsim_core::{Event, EventQueue, Packet};
use pivotsim_types::{Block, BlockIndex, NodeIndex};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Errors raised while building a network.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NetworkError {
    #[error("peer topology is disconnected: {reachable} of {nodes} nodes reachable")]
    DisconnectedTopology { reachable: usize, nodes: usize },

    #[error("invalid network configuration: {0}")]
    InvalidConfig(String),
}

/// Which blocks each node's public view holds.
///
/// The gossip model only pushes a block to peers that already hold its
/// parent.
pub trait PeerView {
    fn has_block(&self, node: NodeIndex, block: BlockIndex) -> bool;
}

/// Mutable simulation state a model needs while handling one event.
pub struct NetContext<'a> {
    pub events: &'a mut EventQueue,
    pub rng: &'a mut ChaCha8Rng,
}

impl<'a> NetContext<'a> {
    pub fn new(events: &'a mut EventQueue, rng: &'a mut ChaCha8Rng) -> Self {
        Self { events, rng }
    }

    /// Queue an event. The queue rejects (and counts) anything in the past.
    pub fn schedule(&mut self, at: Duration, event: Event) {
        let _ = self.events.schedule(at, event);
    }

    /// Queue the arrival of `block` at `receiver`.
    pub fn deliver(&mut self, at: Duration, receiver: NodeIndex, block: &Arc<Block>) {
        self.schedule(
            at,
            Event::ReceiveBlock {
                block: Arc::clone(block),
                receiver,
            },
        );
    }
}

/// Counters shared by every model.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkStats {
    /// Block deliveries scheduled through the regular path.
    pub blocks_sent: u64,
    /// Deliveries over attacker express lanes.
    pub express_deliveries: u64,
    /// INV packets queued.
    pub announcements: u64,
    /// GET requests issued after an INV.
    pub requests: u64,
    /// Gossip sends postponed because the uplink was backed up.
    pub deferred_sends: u64,
}

/// The configured propagation model.
#[derive(Debug)]
pub enum Network {
    Direct(DirectNetwork),
    Gossip(GossipNetwork),
    Relay(RelayNetwork),
}

impl Network {
    /// Build the model selected in `config`, including its topology.
    pub fn new(
        config: &NetworkConfig,
        nodes: usize,
        attackers: BTreeSet<NodeIndex>,
        rng: &mut ChaCha8Rng,
    ) -> Result<Self, NetworkError> {
        config.validate(nodes)?;
        let network = match config.model {
            NetworkModel::DirectBroadcast => {
                Network::Direct(DirectNetwork::new(config, nodes, attackers))
            }
            NetworkModel::GossipPeer => {
                let topology = Topology::random(nodes, config.peers, rng)?;
                Network::Gossip(GossipNetwork::new(config, topology, attackers))
            }
            NetworkModel::BandwidthFairRelay => {
                let topology = Topology::regional(
                    nodes,
                    config.peers,
                    config.latency.regions(),
                    config.local_ratio,
                    rng,
                )?;
                Network::Relay(RelayNetwork::new(config, topology, attackers))
            }
        };
        info!(model = %config.model, nodes, "Network ready");
        Ok(network)
    }

    pub fn model(&self) -> NetworkModel {
        match self {
            Network::Direct(_) => NetworkModel::DirectBroadcast,
            Network::Gossip(_) => NetworkModel::GossipPeer,
            Network::Relay(_) => NetworkModel::BandwidthFairRelay,
        }
    }

    /// Peer graph, for the models that have one.
    pub fn topology(&self) -> Option<&Topology> {
        match self {
            Network::Direct(_) => None,
            Network::Gossip(gossip) => Some(gossip.topology()),
            Network::Relay(relay) => Some(relay.topology()),
        }
    }

    /// Publish a block from its miner (or a withholding miner releasing it).
    pub fn broadcast(
        &mut self,
        ctx: &mut NetContext<'_>,
        sender: NodeIndex,
        block: &Arc<Block>,
        stats: &mut NetworkStats,
    ) {
        match self {
            Network::Direct(direct) => stats.blocks_sent += direct.broadcast(ctx, block),
            Network::Gossip(gossip) => gossip.broadcast(ctx, sender, block, stats),
            Network::Relay(relay) => relay.broadcast(ctx, sender, block, stats),
        }
    }

    /// Forward a block received from elsewhere. No-op for direct broadcast.
    pub fn relay(
        &mut self,
        ctx: &mut NetContext<'_>,
        sender: NodeIndex,
        block: &Arc<Block>,
        stats: &mut NetworkStats,
    ) {
        match self {
            Network::Direct(_) => {}
            Network::Gossip(gossip) => gossip.relay(ctx, sender, block),
            Network::Relay(relay) => relay.relay(ctx, sender, block, stats),
        }
    }

    pub fn on_peer_recheck(
        &mut self,
        ctx: &mut NetContext<'_>,
        view: &dyn PeerView,
        sender: NodeIndex,
        block: &Arc<Block>,
        first: bool,
        stats: &mut NetworkStats,
    ) {
        match self {
            Network::Gossip(gossip) => gossip.on_recheck(ctx, view, sender, block, first, stats),
            other => warn!(model = %other.model(), "PeerRecheck outside the gossip model"),
        }
    }

    pub fn on_announce(
        &mut self,
        ctx: &mut NetContext<'_>,
        from: NodeIndex,
        to: NodeIndex,
        block: Arc<Block>,
    ) {
        match self {
            Network::Relay(relay) => relay.on_announce(ctx, from, to, block),
            other => warn!(model = %other.model(), "Announce outside the relay model"),
        }
    }

    pub fn on_traffic_wakeup(&mut self, ctx: &mut NetContext<'_>, sender: NodeIndex) {
        match self {
            Network::Relay(relay) => relay.on_traffic_wakeup(ctx, sender),
            other => warn!(model = %other.model(), "TrafficWakeup outside the relay model"),
        }
    }

    pub fn on_packet_delivered(
        &mut self,
        ctx: &mut NetContext<'_>,
        packet: Packet,
        stats: &mut NetworkStats,
    ) {
        match self {
            Network::Relay(relay) => relay.on_packet_delivered(ctx, packet, stats),
            other => warn!(model = %other.model(), "PacketDelivered outside the relay model"),
        }
    }

    /// Fair-queue counters, for the relay model.
    pub fn shaper_stats(&self) -> Option<&ShaperStats> {
        match self {
            Network::Relay(relay) => Some(relay.shaper().stats()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_model_selection() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for model in [
            NetworkModel::DirectBroadcast,
            NetworkModel::GossipPeer,
            NetworkModel::BandwidthFairRelay,
        ] {
            let config = NetworkConfig::default().with_model(model);
            let network = Network::new(&config, 20, BTreeSet::new(), &mut rng).unwrap();
            assert_eq!(network.model(), model);
            assert_eq!(network.topology().is_some(), model != NetworkModel::DirectBroadcast);
        }
    }

    #[test]
    fn test_invalid_config_fails_before_building_topology() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let config = NetworkConfig::default()
            .with_model(NetworkModel::BandwidthFairRelay)
            .with_bandwidth_mbps(-1.0);
        let err = Network::new(&config, 20, BTreeSet::new(), &mut rng).unwrap_err();
        assert!(matches!(err, NetworkError::InvalidConfig(_)));
    }

    #[test]
    fn test_isolated_gossip_topology_is_rejected() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let config = NetworkConfig::default()
            .with_model(NetworkModel::GossipPeer)
            .with_peers(1);
        // One link per node leaves a forest of small components.
        let result = Network::new(&config, 200, BTreeSet::new(), &mut rng);
        assert!(matches!(
            result,
            Err(NetworkError::DisconnectedTopology { nodes: 200, .. })
        ));
    }
}
