//! Random peer graphs.

use crate::NetworkError;
use pivotsim_types::NodeIndex;
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeSet, VecDeque};
use tracing::debug;

/// A fixed, undirected peer graph with a region per node.
///
/// Built once at setup from the simulation RNG, so a seed always yields the
/// same graph and the same per-node peer order.
#[derive(Debug, Clone)]
pub struct Topology {
    peers: Vec<Vec<NodeIndex>>,
    regions: Vec<usize>,
}

impl Topology {
    /// Every node links to random peers until it has at least `peers` of them.
    pub fn random(nodes: usize, peers: usize, rng: &mut ChaCha8Rng) -> Result<Self, NetworkError> {
        let mut adjacency = vec![BTreeSet::new(); nodes];
        for node in 0..nodes {
            let wanted = peers.saturating_sub(adjacency[node].len());
            for _ in 0..wanted {
                if adjacency[node].len() + 1 >= nodes {
                    break;
                }
                let other = pick_new_peer(node, nodes, &adjacency[node], rng, |_| true, 1.0);
                link(&mut adjacency, node, other);
            }
        }
        Self::finish(adjacency, vec![0; nodes], rng)
    }

    /// Each node places `peers / 2` links, preferring peers in its own region.
    ///
    /// A candidate in another region is accepted with probability
    /// `(p · (1 − r) / r) / (1 − p)` where `p = 1 / regions` and `r` is
    /// `local_ratio`, so roughly a fraction `r` of the links stay local.
    pub fn regional(
        nodes: usize,
        peers: usize,
        regions: usize,
        local_ratio: f64,
        rng: &mut ChaCha8Rng,
    ) -> Result<Self, NetworkError> {
        let region_of: Vec<usize> = (0..nodes).map(|_| rng.gen_range(0..regions)).collect();
        let cross_accept = if regions > 1 {
            let p = 1.0 / regions as f64;
            (p * (1.0 - local_ratio) / local_ratio) / (1.0 - p)
        } else {
            1.0
        };

        let mut adjacency = vec![BTreeSet::new(); nodes];
        for node in 0..nodes {
            for _ in 0..peers / 2 {
                if adjacency[node].len() + 1 >= nodes {
                    break;
                }
                let same_region = |other: usize| region_of[other] == region_of[node];
                let other =
                    pick_new_peer(node, nodes, &adjacency[node], rng, same_region, cross_accept);
                link(&mut adjacency, node, other);
            }
        }
        Self::finish(adjacency, region_of, rng)
    }

    fn finish(
        adjacency: Vec<BTreeSet<NodeIndex>>,
        regions: Vec<usize>,
        rng: &mut ChaCha8Rng,
    ) -> Result<Self, NetworkError> {
        let peers = adjacency
            .into_iter()
            .map(|set| {
                let mut list: Vec<NodeIndex> = set.into_iter().collect();
                list.shuffle(rng);
                list
            })
            .collect();
        let topology = Self { peers, regions };

        let reachable = topology.reachable_from(0);
        if reachable < topology.len() {
            return Err(NetworkError::DisconnectedTopology {
                reachable,
                nodes: topology.len(),
            });
        }
        debug!(
            nodes = topology.len(),
            links = topology.link_count(),
            "Built peer topology"
        );
        Ok(topology)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Peers of `node` in their fixed, shuffled order.
    pub fn peers(&self, node: NodeIndex) -> &[NodeIndex] {
        &self.peers[node as usize]
    }

    pub fn region(&self, node: NodeIndex) -> usize {
        self.regions[node as usize]
    }

    /// Number of undirected links.
    pub fn link_count(&self) -> usize {
        self.peers.iter().map(Vec::len).sum::<usize>() / 2
    }

    /// Whether every node can reach every other.
    pub fn is_connected(&self) -> bool {
        self.reachable_from(0) == self.len()
    }

    fn reachable_from(&self, start: NodeIndex) -> usize {
        if self.is_empty() {
            return 0;
        }
        let mut seen = vec![false; self.len()];
        let mut queue = VecDeque::from([start]);
        seen[start as usize] = true;
        let mut count = 1;
        while let Some(node) = queue.pop_front() {
            for &peer in self.peers(node) {
                if !seen[peer as usize] {
                    seen[peer as usize] = true;
                    count += 1;
                    queue.push_back(peer);
                }
            }
        }
        count
    }
}

/// Draw a node that is neither `node` nor already linked to it.
///
/// Candidates outside `node`'s region are accepted with probability
/// `cross_accept`. The caller guarantees at least one free candidate exists.
fn pick_new_peer(
    node: usize,
    nodes: usize,
    linked: &BTreeSet<NodeIndex>,
    rng: &mut ChaCha8Rng,
    same_region: impl Fn(usize) -> bool,
    cross_accept: f64,
) -> NodeIndex {
    loop {
        let other = rng.gen_range(0..nodes);
        if other == node || linked.contains(&(other as NodeIndex)) {
            continue;
        }
        if same_region(other) || rng.gen::<f64>() < cross_accept {
            return other as NodeIndex;
        }
    }
}

fn link(adjacency: &mut [BTreeSet<NodeIndex>], a: usize, b: NodeIndex) {
    adjacency[a].insert(b);
    adjacency[b as usize].insert(a as NodeIndex);
}
