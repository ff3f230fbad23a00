//! Peer-by-peer gossip with a serialized uplink.
//!
//! A sender pushes a block to one peer at a time. Each push occupies the
//! sender's uplink for `block_size × 8 / bandwidth`; the next push is
//! attempted once the current one has reached its peer. Peers whose view
//! lacks the block's parent are skipped until they catch up.

use crate::{NetContext, NetworkConfig, NetworkStats, PeerView, Topology};
use pivotsim_core::Event;
use pivotsim_types::{Block, BlockIndex, NodeIndex};
use rand::Rng;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

#[derive(Debug)]
pub struct GossipNetwork {
    topology: Topology,
    attackers: BTreeSet<NodeIndex>,
    /// Per-sender time at which the uplink is free again.
    next_free: Vec<Duration>,
    /// Blocks each node has been sent (or holds).
    informed: Vec<HashSet<BlockIndex>>,
    transmission: Duration,
    global_latency: Duration,
    jitter: Duration,
    recheck_delay: Duration,
    backlog_cap: Duration,
    attacker_in: Option<Duration>,
    attacker_out: Option<Duration>,
}

impl GossipNetwork {
    pub fn new(config: &NetworkConfig, topology: Topology, attackers: BTreeSet<NodeIndex>) -> Self {
        let nodes = topology.len();
        Self {
            topology,
            attackers,
            next_free: vec![Duration::ZERO; nodes],
            informed: vec![HashSet::new(); nodes],
            transmission: config.transmission_time(),
            global_latency: config.global_latency,
            jitter: config.gossip_jitter,
            recheck_delay: config.recheck_delay,
            backlog_cap: config.backlog_cap,
            attacker_in: config.attacker_in,
            attacker_out: config.attacker_out,
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn broadcast(
        &mut self,
        ctx: &mut NetContext<'_>,
        sender: NodeIndex,
        block: &Arc<Block>,
        stats: &mut NetworkStats,
    ) {
        let now = ctx.events.now();
        self.informed[sender as usize].insert(block.index);

        let mined_by_attacker = block.miner.is_some_and(|m| self.attackers.contains(&m));
        if let (true, Some(delay)) = (mined_by_attacker, self.attacker_out) {
            for to in 0..self.topology.len() as NodeIndex {
                if block.is_mined_by(to) {
                    continue;
                }
                self.informed[to as usize].insert(block.index);
                ctx.deliver(now + delay, to, block);
                stats.express_deliveries += 1;
            }
        }
        if let Some(delay) = self.attacker_in {
            for &attacker in &self.attackers {
                if attacker == sender {
                    continue;
                }
                self.informed[attacker as usize].insert(block.index);
                ctx.deliver(now + delay, attacker, block);
                stats.express_deliveries += 1;
            }
        }

        ctx.schedule(
            now,
            Event::PeerRecheck {
                sender,
                block: Arc::clone(block),
                first: true,
            },
        );
    }

    pub fn relay(&mut self, ctx: &mut NetContext<'_>, sender: NodeIndex, block: &Arc<Block>) {
        self.informed[sender as usize].insert(block.index);
        let now = ctx.events.now();
        ctx.schedule(
            now,
            Event::PeerRecheck {
                sender,
                block: Arc::clone(block),
                first: false,
            },
        );
    }

    /// Push `block` to the next peer that can take it, then schedule the
    /// next attempt.
    pub fn on_recheck(
        &mut self,
        ctx: &mut NetContext<'_>,
        view: &dyn PeerView,
        sender: NodeIndex,
        block: &Arc<Block>,
        first: bool,
        stats: &mut NetworkStats,
    ) {
        let now = ctx.events.now();
        let mut uninformed = false;
        let mut next_attempt = None;

        for &peer in self.topology.peers(sender) {
            let informed = &mut self.informed[peer as usize];
            if informed.contains(&block.index) {
                continue;
            }
            if view.has_block(peer, block.index) {
                informed.insert(block.index);
                continue;
            }
            uninformed = true;
            if let Some(parent) = block.parent {
                if !view.has_block(peer, parent) {
                    continue;
                }
            }

            let cursor = &mut self.next_free[sender as usize];
            if *cursor <= now {
                *cursor = now + self.transmission;
            } else if *cursor - now > self.backlog_cap && !first {
                trace!(sender, block = %block.index, "Uplink backed up, deferring relay");
                stats.deferred_sends += 1;
                break;
            } else {
                *cursor += self.transmission;
            }

            informed.insert(block.index);
            let jitter = if self.jitter.is_zero() {
                Duration::ZERO
            } else {
                ctx.rng.gen_range(Duration::ZERO..self.jitter)
            };
            let arrives = *cursor + self.global_latency;
            ctx.deliver(arrives + jitter, peer, block);
            stats.blocks_sent += 1;
            next_attempt = Some(arrives);
            break;
        }

        if uninformed {
            let at = next_attempt.unwrap_or(now + self.recheck_delay);
            ctx.schedule(
                at,
                Event::PeerRecheck {
                    sender,
                    block: Arc::clone(block),
                    first: false,
                },
            );
        }
    }
}
