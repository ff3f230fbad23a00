//! The simulation root.
//!
//! The oracle owns every piece of state in a run and is the only place that
//! routes events. Miners decide what to do with blocks; network models decide
//! when blocks arrive; the oracle decides who mines next and glues the two
//! together.

use crate::mining::{MinerTable, MiningClock};
use crate::{BlockRegistry, PivotReport, SimConfig, SimError};
use pivotsim_core::{Action, Event, EventKey, EventQueue, Miner};
use pivotsim_ledger::Ledger;
use pivotsim_network_memory::{NetContext, Network, NetworkStats, PeerView};
use pivotsim_node::{HonestMiner, WithholdingMiner};
use pivotsim_types::{Block, BlockIndex, MiningSlot, NodeIndex};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

/// Deterministic driver for one simulation run.
///
/// Given the same [`SimConfig`] (seed included) two oracles process the same
/// events in the same order and produce identical reports.
pub struct Oracle {
    config: SimConfig,

    /// Global event queue and simulated clock.
    events: EventQueue,

    /// All miners, indexed by `NodeIndex`.
    miners: Vec<Box<dyn Miner>>,

    attackers: BTreeSet<NodeIndex>,

    table: MinerTable,
    clock: MiningClock,

    /// Absolute tick of the latest scheduled discovery.
    mining_ticks: u64,

    /// Index the next discovered block will carry.
    next_index: u64,

    network: Network,
    network_stats: NetworkStats,

    registry: BlockRegistry,

    /// Single source of randomness for the whole run.
    rng: ChaCha8Rng,

    prepared: bool,
    blocks_mined: u64,
}

impl std::fmt::Debug for Oracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Oracle")
            .field("miners", &self.miners.len())
            .field("attackers", &self.attackers)
            .field("model", &self.network.model())
            .field("now", &self.events.now())
            .field("blocks_mined", &self.blocks_mined)
            .finish()
    }
}

/// Public views of all miners, as seen by the gossip model.
struct MinerViews<'a>(&'a [Box<dyn Miner>]);

impl PeerView for MinerViews<'_> {
    fn has_block(&self, node: NodeIndex, block: BlockIndex) -> bool {
        self.0[node as usize].has_block(block)
    }
}

impl Oracle {
    /// Validate `config`, build miners and network, and seed every ledger
    /// with genesis.
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        config.validate()?;
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

        let nodes = config.miner_count();
        let attackers: BTreeSet<NodeIndex> = (0..config.attackers as NodeIndex).collect();
        let genesis = Arc::new(Block::genesis());

        let mut miners: Vec<Box<dyn Miner>> = Vec::with_capacity(nodes);
        for id in 0..nodes as NodeIndex {
            let mut miner: Box<dyn Miner> = if attackers.contains(&id) {
                Box::new(WithholdingMiner::new(
                    id,
                    config.attacker_strategy,
                    config.consistency_checks,
                ))
            } else {
                Box::new(HonestMiner::new(id, config.consistency_checks))
            };
            miner.setup(Arc::clone(&genesis));
            miners.push(miner);
        }

        let network = Network::new(&config.network, nodes, attackers.clone(), &mut rng)?;
        let table = MinerTable::new(&config.miner_weights)?;
        let clock = MiningClock::new(config.block_interval_secs, config.time_precision);

        info!(
            nodes,
            attackers = attackers.len(),
            model = %config.network.model,
            seed = config.seed,
            interval_secs = config.block_interval_secs,
            "Created oracle"
        );

        Ok(Self {
            registry: BlockRegistry::new(genesis, nodes),
            events: EventQueue::new(),
            miners,
            attackers,
            table,
            clock,
            mining_ticks: 0,
            next_index: 1,
            network,
            network_stats: NetworkStats::default(),
            rng,
            prepared: false,
            blocks_mined: 0,
            config,
        })
    }

    // ─── Accessors ───

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn now(&self) -> Duration {
        self.events.now()
    }

    pub fn events(&self) -> &EventQueue {
        &self.events
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn network_stats(&self) -> &NetworkStats {
        &self.network_stats
    }

    pub fn registry(&self) -> &BlockRegistry {
        &self.registry
    }

    pub fn miner(&self, node: NodeIndex) -> Option<&dyn Miner> {
        self.miners.get(node as usize).map(|m| m.as_ref())
    }

    /// Public view of `node`.
    pub fn ledger(&self, node: NodeIndex) -> Option<&Ledger> {
        self.miner(node).map(|m| m.ledger())
    }

    pub fn attackers(&self) -> &BTreeSet<NodeIndex> {
        &self.attackers
    }

    pub fn blocks_mined(&self) -> u64 {
        self.blocks_mined
    }

    // ─── Running ───

    /// Schedule the first block discovery. Idempotent.
    pub fn prepare(&mut self) {
        if self.prepared {
            return;
        }
        self.prepared = true;
        self.schedule_next_block();
    }

    /// Process every event up to and including `horizon`, then move the clock
    /// to `horizon`.
    pub fn run_until(&mut self, horizon: Duration) {
        self.prepare();
        trace!(horizon_secs = horizon.as_secs_f64(), "Running simulation step");

        while let Some((key, event)) = self.events.pop_until(horizon) {
            self.dispatch(key, event);
        }
        self.events.advance_to(horizon);

        debug!(
            now = ?self.events.now(),
            processed = self.events.stats().processed,
            pending = self.events.len(),
            blocks_mined = self.blocks_mined,
            "Simulation step complete"
        );
    }

    /// Run to the configured horizon and report.
    pub fn run(&mut self) -> PivotReport {
        self.run_until(self.config.horizon);
        let report = self.report();
        info!(
            seed = report.seed,
            pivot = report.pivot_length(),
            total_weight = report.total_weight,
            attacker_ratio = report.attacker_pivot_ratio,
            "Simulation complete"
        );
        report
    }

    /// Summarize the observer's public view.
    pub fn report(&self) -> PivotReport {
        let observer = self.config.observer();
        let ledger = self.miners[observer as usize].ledger();
        PivotReport {
            seed: self.config.seed,
            sim_time: self.events.now(),
            observer,
            blocks_mined: self.blocks_mined,
            mean_propagation: self.registry.mean_propagation(),
            events_processed: self.events.stats().processed,
            stale_events: self.events.stats().stale_dropped,
            network: self.network_stats.clone(),
            shaper: self.network.shaper_stats().cloned(),
            ..PivotReport::from_ledger(ledger, &self.attackers)
        }
    }

    // ─── Dispatch ───

    fn dispatch(&mut self, key: EventKey, event: Event) {
        let now = key.time;
        trace!(time = ?now, event = event.type_name(), "Processing event");

        match event {
            Event::GenerateBlock { slot } => self.on_generate_block(slot, now),

            Event::ReceiveBlock { block, receiver } => {
                self.registry.record_receipt(block.index, receiver, now);
                let actions = self.miners[receiver as usize].receive_block(block, now);
                self.execute(receiver, actions);
            }

            Event::MinerWake { miner, block } => {
                let actions = self.miners[miner as usize].wake(block, now);
                self.execute(miner, actions);
            }

            Event::PeerRecheck {
                sender,
                block,
                first,
            } => {
                let view = MinerViews(&self.miners);
                let mut ctx = NetContext::new(&mut self.events, &mut self.rng);
                self.network.on_peer_recheck(
                    &mut ctx,
                    &view,
                    sender,
                    &block,
                    first,
                    &mut self.network_stats,
                );
            }

            Event::Announce { from, to, block } => {
                let mut ctx = NetContext::new(&mut self.events, &mut self.rng);
                self.network.on_announce(&mut ctx, from, to, block);
            }

            Event::TrafficWakeup { sender } => {
                let mut ctx = NetContext::new(&mut self.events, &mut self.rng);
                self.network.on_traffic_wakeup(&mut ctx, sender);
            }

            Event::PacketDelivered { packet } => {
                let mut ctx = NetContext::new(&mut self.events, &mut self.rng);
                self.network
                    .on_packet_delivered(&mut ctx, packet, &mut self.network_stats);
            }
        }
    }

    fn on_generate_block(&mut self, slot: MiningSlot, now: Duration) {
        let mined = self.miners[slot.miner as usize].generate_block(slot, now);
        self.registry.record_mined(&mined.block);
        self.blocks_mined += 1;

        let interval = self.config.progress_interval;
        if interval > 0 && self.blocks_mined % interval == 0 {
            let view = self.miners[self.config.observer() as usize].ledger();
            info!(
                time_secs = now.as_secs_f64(),
                blocks = self.blocks_mined,
                pivot_tip = ?view.pivot_tip(),
                total_weight = view.total_weight(),
                "Progress"
            );
        }

        self.execute(slot.miner, mined.actions);
        self.schedule_next_block();
    }

    /// Carry out a miner's requests.
    fn execute(&mut self, from: NodeIndex, actions: Vec<Action>) {
        for action in actions {
            let mut ctx = NetContext::new(&mut self.events, &mut self.rng);
            match action {
                Action::Broadcast { block } => {
                    self.network
                        .broadcast(&mut ctx, from, &block, &mut self.network_stats);
                }
                Action::Relay { block } => {
                    self.network
                        .relay(&mut ctx, from, &block, &mut self.network_stats);
                }
                Action::WakeAt { at, block } => {
                    ctx.schedule(at, Event::MinerWake { miner: from, block });
                }
            }
        }
    }

    /// Draw the next discovery and queue it.
    fn schedule_next_block(&mut self) {
        let (gap, residual) = self.clock.sample_gap(&mut self.rng);
        self.mining_ticks += gap;
        let slot = MiningSlot {
            index: BlockIndex(self.next_index),
            miner: self.table.pick(&mut self.rng),
            residual,
            time: self.clock.ticks_to_duration(self.mining_ticks),
        };
        self.next_index += 1;
        trace!(
            block = %slot.index,
            miner = slot.miner,
            at = ?slot.time,
            "Scheduled discovery"
        );
        self.events.schedule(slot.time, Event::GenerateBlock { slot });
    }
}
