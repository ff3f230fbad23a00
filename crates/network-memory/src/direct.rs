//! Fixed-delay broadcast.

use crate::{NetContext, NetworkConfig};
use pivotsim_core::Event;
use pivotsim_types::{Block, NodeIndex};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Every broadcast reaches every other node after a delay that depends only on
/// whether an attacker is involved.
#[derive(Debug)]
pub struct DirectNetwork {
    nodes: usize,
    attackers: BTreeSet<NodeIndex>,
    honest_delay: Duration,
    attacker_in: Duration,
    attacker_out: Duration,
}

impl DirectNetwork {
    pub fn new(config: &NetworkConfig, nodes: usize, attackers: BTreeSet<NodeIndex>) -> Self {
        Self {
            nodes,
            attackers,
            honest_delay: config.honest_delay,
            attacker_in: config.attacker_in.unwrap_or(config.honest_delay),
            attacker_out: config.attacker_out.unwrap_or(config.honest_delay),
        }
    }

    fn delay(&self, to: NodeIndex, block: &Block) -> Duration {
        match block.miner {
            None => Duration::ZERO,
            Some(miner) if self.attackers.contains(&miner) => self.attacker_out,
            Some(_) if self.attackers.contains(&to) => self.attacker_in,
            Some(_) => self.honest_delay,
        }
    }

    /// Schedule delivery to every node except the block's miner.
    pub fn broadcast(&mut self, ctx: &mut NetContext<'_>, block: &Arc<Block>) -> u64 {
        let now = ctx.events.now();
        let mut sent = 0;
        for to in 0..self.nodes as NodeIndex {
            if block.is_mined_by(to) {
                continue;
            }
            let at = now + self.delay(to, block);
            ctx.deliver(at, to, block);
            sent += 1;
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pivotsim_core::EventQueue;
    use pivotsim_types::test_utils::block_by;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn arrivals(events: &mut EventQueue) -> Vec<(NodeIndex, Duration)> {
        std::iter::from_fn(|| events.pop_earliest())
            .map(|(key, event)| match event {
                Event::ReceiveBlock { receiver, .. } => (receiver, key.time),
                other => panic!("unexpected event {other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_attacker_delays_apply_by_direction() {
        let config = NetworkConfig::default()
            .with_honest_delay(Duration::from_secs(2))
            .with_attacker_delays(Some(Duration::from_millis(100)), Some(Duration::ZERO));
        let mut network = DirectNetwork::new(&config, 3, BTreeSet::from([0]));
        let mut events = EventQueue::new();
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        // Honest block from node 1.
        let honest = block_by(1, 1, 0, &[], 0.5);
        let mut ctx = NetContext::new(&mut events, &mut rng);
        assert_eq!(network.broadcast(&mut ctx, &honest), 2);
        let mut got = arrivals(&mut events);
        got.sort();
        assert_eq!(
            got,
            vec![(0, Duration::from_millis(100)), (2, Duration::from_secs(2))]
        );

        // Attacker block goes out immediately (the clock is now at 2s).
        let selfish = block_by(2, 0, 0, &[], 0.5);
        let mut ctx = NetContext::new(&mut events, &mut rng);
        network.broadcast(&mut ctx, &selfish);
        let got = arrivals(&mut events);
        assert!(got.iter().all(|&(to, _)| to != 0));
        assert!(got.iter().all(|&(_, at)| at == Duration::from_secs(2)));
    }
}
