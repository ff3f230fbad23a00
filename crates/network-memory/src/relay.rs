//! Announce/request relay over fair-queued links.
//!
//! ```text
//!   holder ──(verify_time)──▶ INV queued on holder's link ──(latency)──▶ peer
//!   peer not fetching yet ──▶ GET: full block queued on holder's link ──(latency)──▶ peer
//! ```
//!
//! Both packets travel through the holder's [`TrafficShaper`], so a node
//! serving many peers at once slows every transfer proportionally.

use crate::{NetContext, NetworkConfig, NetworkStats, Topology, TrafficShaper};
use pivotsim_core::{Event, Packet, PacketKind};
use pivotsim_types::{Block, BlockIndex, NodeIndex};
use rand::Rng;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use crate::config::LatencyTable;

#[derive(Debug)]
pub struct RelayNetwork {
    topology: Topology,
    attackers: BTreeSet<NodeIndex>,
    latency: LatencyTable,
    shaper: TrafficShaper,
    /// Blocks each node holds or has already requested.
    in_flight: Vec<HashSet<BlockIndex>>,
    block_size: u64,
    announce_size: u64,
    verify_time: Duration,
    express_relay: Option<Duration>,
}

impl RelayNetwork {
    pub fn new(config: &NetworkConfig, topology: Topology, attackers: BTreeSet<NodeIndex>) -> Self {
        let nodes = topology.len();
        Self {
            topology,
            attackers,
            latency: config.latency.clone(),
            shaper: TrafficShaper::new(config.bytes_per_sec(), config.buffer_size),
            in_flight: vec![HashSet::new(); nodes],
            block_size: config.block_size,
            announce_size: config.announce_size,
            verify_time: config.verify_time,
            express_relay: config.express_relay,
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn shaper(&self) -> &TrafficShaper {
        &self.shaper
    }

    /// Publish a freshly mined or released block.
    pub fn broadcast(
        &mut self,
        ctx: &mut NetContext<'_>,
        sender: NodeIndex,
        block: &Arc<Block>,
        stats: &mut NetworkStats,
    ) {
        if let Some(delay) = self.express_relay {
            let now = ctx.events.now();
            for &attacker in &self.attackers {
                if attacker == sender {
                    continue;
                }
                self.in_flight[attacker as usize].insert(block.index);
                ctx.deliver(now + delay, attacker, block);
                stats.express_deliveries += 1;
            }
        }
        self.announce_to_peers(ctx, sender, block, stats);
    }

    pub fn relay(
        &mut self,
        ctx: &mut NetContext<'_>,
        sender: NodeIndex,
        block: &Arc<Block>,
        stats: &mut NetworkStats,
    ) {
        self.announce_to_peers(ctx, sender, block, stats);
    }

    fn announce_to_peers(
        &mut self,
        ctx: &mut NetContext<'_>,
        sender: NodeIndex,
        block: &Arc<Block>,
        stats: &mut NetworkStats,
    ) {
        self.in_flight[sender as usize].insert(block.index);
        let at = ctx.events.now() + self.verify_time;
        for &to in self.topology.peers(sender) {
            ctx.schedule(
                at,
                Event::Announce {
                    from: sender,
                    to,
                    block: Arc::clone(block),
                },
            );
            stats.announcements += 1;
        }
    }

    /// The holder finished verifying; queue the INV on its link.
    pub fn on_announce(
        &mut self,
        ctx: &mut NetContext<'_>,
        from: NodeIndex,
        to: NodeIndex,
        block: Arc<Block>,
    ) {
        let packet = Packet {
            sender: from,
            receiver: to,
            size: self.announce_size,
            kind: PacketKind::Announce,
            block,
        };
        self.shaper.enqueue(ctx.events, packet);
    }

    /// A link finished a packet; it now travels to the receiver.
    pub fn on_traffic_wakeup(&mut self, ctx: &mut NetContext<'_>, sender: NodeIndex) {
        let Some(packet) = self.shaper.on_wakeup(ctx.events, sender) else {
            return;
        };
        let delay = self.ping_delay(ctx, packet.sender, packet.receiver);
        let at = ctx.events.now() + delay;
        ctx.schedule(at, Event::PacketDelivered { packet });
    }

    /// A packet reached its receiver.
    pub fn on_packet_delivered(
        &mut self,
        ctx: &mut NetContext<'_>,
        packet: Packet,
        stats: &mut NetworkStats,
    ) {
        match packet.kind {
            PacketKind::Announce => {
                let fetching = &mut self.in_flight[packet.receiver as usize];
                if !fetching.insert(packet.block.index) {
                    return;
                }
                trace!(
                    from = packet.sender,
                    to = packet.receiver,
                    block = %packet.block.index,
                    "Requesting announced block"
                );
                stats.requests += 1;
                let get = Packet {
                    size: self.block_size,
                    kind: PacketKind::Block,
                    ..packet
                };
                self.shaper.enqueue(ctx.events, get);
            }
            PacketKind::Block => {
                let now = ctx.events.now();
                ctx.deliver(now, packet.receiver, &packet.block);
                stats.blocks_sent += 1;
            }
        }
    }

    /// Region-pair latency with jitter: `(base + 4·U) · (0.9 + 0.2·U)` ms.
    fn ping_delay(&self, ctx: &mut NetContext<'_>, from: NodeIndex, to: NodeIndex) -> Duration {
        let base = self
            .latency
            .base_ms(self.topology.region(from), self.topology.region(to));
        let millis = (base + 4.0 * ctx.rng.gen::<f64>()) * (0.9 + 0.2 * ctx.rng.gen::<f64>());
        Duration::from_secs_f64(millis / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pivotsim_core::EventQueue;
    use pivotsim_types::test_utils::block_by;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn network(nodes: usize, attackers: BTreeSet<NodeIndex>) -> (RelayNetwork, ChaCha8Rng) {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut config = NetworkConfig::default()
            .with_block_size(1_000_000)
            .with_bandwidth_mbps(8.0)
            .with_latency(LatencyTable::uniform(50.0));
        config.verify_time = Duration::from_millis(10);
        let topology = Topology::regional(nodes, 2 * (nodes - 1), 1, 1.0, &mut rng).unwrap();
        (RelayNetwork::new(&config, topology, attackers), rng)
    }

    /// Drive every network event; returns `(receiver, time)` per delivered block.
    fn run(
        network: &mut RelayNetwork,
        events: &mut EventQueue,
        rng: &mut ChaCha8Rng,
        stats: &mut NetworkStats,
    ) -> Vec<(NodeIndex, Duration)> {
        let mut delivered = Vec::new();
        while let Some((key, event)) = events.pop_earliest() {
            let mut ctx = NetContext::new(events, rng);
            match event {
                Event::Announce { from, to, block } => network.on_announce(&mut ctx, from, to, block),
                Event::TrafficWakeup { sender } => network.on_traffic_wakeup(&mut ctx, sender),
                Event::PacketDelivered { packet } => {
                    network.on_packet_delivered(&mut ctx, packet, stats)
                }
                Event::ReceiveBlock { receiver, .. } => delivered.push((receiver, key.time)),
                other => panic!("unexpected event {other:?}"),
            }
        }
        delivered
    }

    #[test]
    fn test_block_reaches_every_peer_once() {
        let (mut network, mut rng) = network(4, BTreeSet::new());
        let mut events = EventQueue::new();
        let mut stats = NetworkStats::default();
        let block = block_by(1, 0, 0, &[], 0.5);

        let mut ctx = NetContext::new(&mut events, &mut rng);
        network.broadcast(&mut ctx, 0, &block, &mut stats);
        let delivered = run(&mut network, &mut events, &mut rng, &mut stats);

        let mut receivers: Vec<_> = delivered.iter().map(|d| d.0).collect();
        receivers.sort();
        assert_eq!(receivers, vec![1, 2, 3]);
        assert_eq!(stats.announcements, 3);
        assert_eq!(stats.requests, 3);

        // Three concurrent one-second transfers share node 0's uplink.
        for &(_, at) in &delivered {
            assert!(at > Duration::from_secs(3), "delivered at {at:?}");
            assert!(at < Duration::from_millis(3200), "delivered at {at:?}");
        }
    }

    #[test]
    fn test_duplicate_announcements_trigger_one_request() {
        let (mut network, mut rng) = network(3, BTreeSet::new());
        let mut events = EventQueue::new();
        let mut stats = NetworkStats::default();
        let block = block_by(1, 0, 0, &[], 0.5);

        // Both 0 and 1 announce the block to 2.
        let mut ctx = NetContext::new(&mut events, &mut rng);
        network.relay(&mut ctx, 0, &block, &mut stats);
        network.relay(&mut ctx, 1, &block, &mut stats);
        let delivered = run(&mut network, &mut events, &mut rng, &mut stats);

        assert_eq!(delivered.iter().filter(|d| d.0 == 2).count(), 1);
        // 0 and 1 already hold the block and never ask for it.
        assert_eq!(stats.requests, 1);
    }

    #[test]
    fn test_attackers_get_express_copies() {
        let (mut network, mut rng) = network(3, BTreeSet::from([2]));
        let mut events = EventQueue::new();
        let mut stats = NetworkStats::default();
        let block = block_by(1, 0, 0, &[], 0.5);

        let mut ctx = NetContext::new(&mut events, &mut rng);
        network.broadcast(&mut ctx, 0, &block, &mut stats);
        let delivered = run(&mut network, &mut events, &mut rng, &mut stats);

        let to_attacker: Vec<_> = delivered.iter().filter(|d| d.0 == 2).collect();
        assert_eq!(to_attacker.len(), 1);
        assert_eq!(to_attacker[0].1, Duration::from_micros(10));
        assert_eq!(stats.express_deliveries, 1);
    }
}
