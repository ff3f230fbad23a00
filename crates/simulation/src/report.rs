//! End-of-run summary of one node's pivot chain.

use pivotsim_ledger::Ledger;
use pivotsim_network_memory::{NetworkStats, ShaperStats};
use pivotsim_types::{BlockIndex, CountMap, NodeIndex};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Pivot-chain statistics as seen by the observer node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PivotReport {
    pub seed: u64,
    /// Simulated time at which the report was taken.
    pub sim_time: Duration,
    pub observer: NodeIndex,
    /// Blocks mined network-wide (genesis excluded).
    pub blocks_mined: u64,
    /// Blocks in the observer's view (genesis included).
    pub total_weight: u64,
    /// Pivot chain from genesis to tip.
    pub pivot_path: Vec<BlockIndex>,
    /// Pivot blocks per miner (genesis excluded).
    pub pivot_share: CountMap<NodeIndex>,
    /// Pivot blocks mined by withholding miners.
    pub attacker_pivot_blocks: u64,
    /// `attacker_pivot_blocks / pivot_length`.
    pub attacker_pivot_ratio: f64,
    /// `pivot_length / total_weight`: how much of the DAG made it onto the
    /// chain.
    pub pivot_ratio: f64,
    /// Mean time for a block to reach every node.
    pub mean_propagation: Option<Duration>,
    pub events_processed: u64,
    pub stale_events: u64,
    pub network: NetworkStats,
    pub shaper: Option<ShaperStats>,
}

impl PivotReport {
    /// Summarize `ledger` against the set of withholding miners.
    pub fn from_ledger(ledger: &Ledger, attackers: &BTreeSet<NodeIndex>) -> Self {
        let pivot_path = ledger.pivot_chain();
        let pivot_share = ledger.pivot_share();
        let attacker_pivot_blocks: u64 = attackers.iter().map(|a| pivot_share.get(a)).sum();
        let pivot_length = pivot_share.total();
        let total_weight = ledger.total_weight();

        Self {
            seed: 0,
            sim_time: Duration::ZERO,
            observer: 0,
            blocks_mined: 0,
            total_weight,
            pivot_path,
            pivot_share,
            attacker_pivot_blocks,
            attacker_pivot_ratio: ratio(attacker_pivot_blocks, pivot_length),
            pivot_ratio: ratio(pivot_length, total_weight),
            mean_propagation: None,
            events_processed: 0,
            stale_events: 0,
            network: NetworkStats::default(),
            shaper: None,
        }
    }

    /// Pivot blocks after genesis.
    pub fn pivot_length(&self) -> u64 {
        self.pivot_share.total()
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

impl fmt::Display for PivotReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "seed {} | t = {:.1}s | observer {}",
            self.seed,
            self.sim_time.as_secs_f64(),
            self.observer
        )?;
        writeln!(
            f,
            "  {} pivot / {} blocks ({} mined), ratio {:.3}",
            self.pivot_length(),
            self.total_weight,
            self.blocks_mined,
            self.pivot_ratio
        )?;
        writeln!(
            f,
            "  attacker pivot blocks {}, ratio {:.3}",
            self.attacker_pivot_blocks, self.attacker_pivot_ratio
        )?;
        let share: Vec<String> = self
            .pivot_share
            .iter()
            .map(|(miner, n)| format!("{miner}:{n}"))
            .collect();
        writeln!(f, "  pivot share [{}]", share.join(" "))?;
        if let Some(propagation) = self.mean_propagation {
            writeln!(
                f,
                "  mean full propagation {:.3}s",
                propagation.as_secs_f64()
            )?;
        }
        write!(
            f,
            "  {} events, {} stale | {} block sends, {} express, {} deferred",
            self.events_processed,
            self.stale_events,
            self.network.blocks_sent,
            self.network.express_deliveries,
            self.network.deferred_sends
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pivotsim_types::{Block, MiningSlot};
    use std::sync::Arc;

    fn block(index: u64, miner: NodeIndex, parent: u64, residual: f64) -> Arc<Block> {
        let slot = MiningSlot {
            index: BlockIndex(index),
            miner,
            residual,
            time: Duration::from_secs(index),
        };
        Arc::new(Block::new(slot, BlockIndex(parent), vec![], index, 0))
    }

    #[test]
    fn test_attacker_share_of_pivot_chain() {
        let mut ledger = Ledger::new();
        ledger.insert(Arc::new(Block::genesis()));
        ledger.insert(block(1, 0, 0, 0.5));
        ledger.insert(block(2, 1, 1, 0.5));
        ledger.insert(block(3, 0, 2, 0.5));
        // Off-pivot fork.
        ledger.insert(block(4, 1, 0, 0.5));

        let report = PivotReport::from_ledger(&ledger, &BTreeSet::from([0]));
        assert_eq!(report.pivot_length(), 3);
        assert_eq!(report.total_weight, 5);
        assert_eq!(report.attacker_pivot_blocks, 2);
        assert!((report.attacker_pivot_ratio - 2.0 / 3.0).abs() < 1e-12);
        assert!((report.pivot_ratio - 0.6).abs() < 1e-12);
        assert_eq!(
            report.pivot_path,
            vec![BlockIndex(0), BlockIndex(1), BlockIndex(2), BlockIndex(3)]
        );
    }

    #[test]
    fn test_empty_chain_has_zero_ratios() {
        let mut ledger = Ledger::new();
        ledger.insert(Arc::new(Block::genesis()));
        let report = PivotReport::from_ledger(&ledger, &BTreeSet::new());
        assert_eq!(report.pivot_length(), 0);
        assert_eq!(report.attacker_pivot_ratio, 0.0);
        assert!(report.to_string().contains("0 pivot / 1 blocks"));
    }
}
