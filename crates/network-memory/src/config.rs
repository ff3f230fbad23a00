//! Network model selection and parameters.

use crate::NetworkError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Which propagation model to simulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkModel {
    /// Every broadcast reaches every node after a fixed delay.
    #[default]
    DirectBroadcast,
    /// Peer-by-peer pushes serialized on a per-sender uplink cursor.
    GossipPeer,
    /// Announce/request relay over fair-queued links between regions.
    BandwidthFairRelay,
}

impl fmt::Display for NetworkModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NetworkModel::DirectBroadcast => "direct-broadcast",
            NetworkModel::GossipPeer => "gossip-peer",
            NetworkModel::BandwidthFairRelay => "bandwidth-fair-relay",
        };
        f.write_str(name)
    }
}

impl FromStr for NetworkModel {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" | "direct-broadcast" => Ok(NetworkModel::DirectBroadcast),
            "gossip" | "gossip-peer" => Ok(NetworkModel::GossipPeer),
            "relay" | "bandwidth-fair-relay" => Ok(NetworkModel::BandwidthFairRelay),
            other => Err(NetworkError::InvalidConfig(format!(
                "unknown network model `{other}`"
            ))),
        }
    }
}

/// One-way base latency between regions, in milliseconds.
///
/// Square and symmetric in practice; `base_ms(a, b)` reads row `a`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyTable {
    pub millis: Vec<Vec<f64>>,
}

impl Default for LatencyTable {
    /// Four regions, roughly NA / EU / EA / OC.
    fn default() -> Self {
        Self {
            millis: vec![
                vec![20.0, 90.0, 150.0, 200.0],
                vec![90.0, 20.0, 120.0, 180.0],
                vec![150.0, 120.0, 20.0, 110.0],
                vec![200.0, 180.0, 110.0, 20.0],
            ],
        }
    }
}

impl LatencyTable {
    /// A single region with the given latency.
    pub fn uniform(millis: f64) -> Self {
        Self {
            millis: vec![vec![millis]],
        }
    }

    pub fn regions(&self) -> usize {
        self.millis.len()
    }

    pub fn base_ms(&self, from: usize, to: usize) -> f64 {
        self.millis[from][to]
    }

    pub fn validate(&self) -> Result<(), NetworkError> {
        let n = self.millis.len();
        if n == 0 {
            return Err(NetworkError::InvalidConfig(
                "latency table has no regions".into(),
            ));
        }
        for (i, row) in self.millis.iter().enumerate() {
            if row.len() != n {
                return Err(NetworkError::InvalidConfig(format!(
                    "latency table row {i} has {} entries, expected {n}",
                    row.len()
                )));
            }
            if let Some(bad) = row.iter().find(|v| !v.is_finite() || **v < 0.0) {
                return Err(NetworkError::InvalidConfig(format!(
                    "latency table row {i} contains invalid latency {bad}"
                )));
            }
        }
        Ok(())
    }
}

/// Configuration for the simulated network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Propagation model.
    pub model: NetworkModel,

    // ─── Direct broadcast ───
    /// Delay between honest nodes.
    pub honest_delay: Duration,
    /// Delay for blocks sent to an attacker. In the gossip model this is an
    /// express lane; `None` disables it.
    pub attacker_in: Option<Duration>,
    /// Delay for blocks mined by an attacker. In the gossip model this is an
    /// express lane; `None` disables it.
    pub attacker_out: Option<Duration>,

    // ─── Shared by the peer models ───
    /// Full block size in bytes.
    pub block_size: u64,
    /// Per-node uplink bandwidth in megabits per second.
    pub bandwidth_mbps: f64,
    /// Target number of peers per node.
    pub peers: usize,

    // ─── Gossip ───
    /// Propagation latency added after transmission.
    pub global_latency: Duration,
    /// Upper bound of the uniform jitter added to each delivery.
    pub gossip_jitter: Duration,
    /// Retry interval when no peer can take the block yet.
    pub recheck_delay: Duration,
    /// A relay whose uplink is backed up further than this is not sent now
    /// but retried after `recheck_delay`.
    pub backlog_cap: Duration,

    // ─── Bandwidth-fair relay ───
    /// Region-pair base latency.
    pub latency: LatencyTable,
    /// Probability weight for same-region links, in `(0, 1]`.
    pub local_ratio: f64,
    /// Announcement (INV) size in bytes.
    pub announce_size: u64,
    /// Time to verify a block before announcing it.
    pub verify_time: Duration,
    /// Outbound buffer per node in bytes.
    pub buffer_size: u64,
    /// Attackers receive every broadcast block after this delay; `None`
    /// disables the express lane.
    pub express_relay: Option<Duration>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            model: NetworkModel::DirectBroadcast,
            honest_delay: Duration::from_secs(1),
            attacker_in: Some(Duration::ZERO),
            attacker_out: Some(Duration::ZERO),
            block_size: 1_000_000,
            bandwidth_mbps: 20.0,
            peers: 8,
            global_latency: Duration::from_millis(300),
            gossip_jitter: Duration::from_millis(10),
            recheck_delay: Duration::from_millis(100),
            backlog_cap: Duration::from_secs(5),
            latency: LatencyTable::default(),
            local_ratio: 0.7,
            announce_size: 32,
            verify_time: Duration::from_millis(10),
            buffer_size: 32_000_000,
            express_relay: Some(Duration::from_micros(10)),
        }
    }
}

impl NetworkConfig {
    pub fn with_model(mut self, model: NetworkModel) -> Self {
        self.model = model;
        self
    }

    pub fn with_bandwidth_mbps(mut self, mbps: f64) -> Self {
        self.bandwidth_mbps = mbps;
        self
    }

    pub fn with_block_size(mut self, bytes: u64) -> Self {
        self.block_size = bytes;
        self
    }

    pub fn with_peers(mut self, peers: usize) -> Self {
        self.peers = peers;
        self
    }

    pub fn with_honest_delay(mut self, delay: Duration) -> Self {
        self.honest_delay = delay;
        self
    }

    pub fn with_attacker_delays(mut self, inbound: Option<Duration>, outbound: Option<Duration>) -> Self {
        self.attacker_in = inbound;
        self.attacker_out = outbound;
        self
    }

    pub fn with_latency(mut self, latency: LatencyTable) -> Self {
        self.latency = latency;
        self
    }

    /// Uplink bandwidth in bytes per second.
    pub fn bytes_per_sec(&self) -> f64 {
        self.bandwidth_mbps * 1_000_000.0 / 8.0
    }

    /// Time to push one full block through an idle uplink.
    pub fn transmission_time(&self) -> Duration {
        Duration::from_secs_f64(self.block_size as f64 / self.bytes_per_sec())
    }

    /// Check the parameters the selected model depends on.
    pub fn validate(&self, nodes: usize) -> Result<(), NetworkError> {
        if self.model == NetworkModel::DirectBroadcast {
            return Ok(());
        }
        if !(self.bandwidth_mbps.is_finite() && self.bandwidth_mbps > 0.0) {
            return Err(NetworkError::InvalidConfig(format!(
                "bandwidth must be positive, got {} Mbps",
                self.bandwidth_mbps
            )));
        }
        if self.block_size == 0 {
            return Err(NetworkError::InvalidConfig("block size must be positive".into()));
        }
        if self.peers == 0 && nodes > 1 {
            return Err(NetworkError::InvalidConfig("peer count must be positive".into()));
        }
        if self.model == NetworkModel::BandwidthFairRelay {
            self.latency.validate()?;
            if !(self.local_ratio > 0.0 && self.local_ratio <= 1.0) {
                return Err(NetworkError::InvalidConfig(format!(
                    "local ratio must be in (0, 1], got {}",
                    self.local_ratio
                )));
            }
            if self.local_ratio >= 1.0 && self.latency.regions() > 1 {
                return Err(NetworkError::InvalidConfig(
                    "local ratio 1 forbids cross-region links and cannot connect several regions"
                        .into(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_latency_table_is_valid() {
        assert!(LatencyTable::default().validate().is_ok());
        assert_eq!(LatencyTable::default().regions(), 4);
    }

    #[test]
    fn test_ragged_latency_table_is_rejected() {
        let table = LatencyTable {
            millis: vec![vec![1.0, 2.0], vec![1.0]],
        };
        assert!(matches!(table.validate(), Err(NetworkError::InvalidConfig(_))));
    }

    #[test]
    fn test_non_positive_bandwidth_is_rejected() {
        let config = NetworkConfig::default()
            .with_model(NetworkModel::GossipPeer)
            .with_bandwidth_mbps(0.0);
        assert!(config.validate(10).is_err());

        // The direct model ignores bandwidth.
        let config = config.with_model(NetworkModel::DirectBroadcast);
        assert!(config.validate(10).is_ok());
    }

    #[test]
    fn test_transmission_time() {
        let config = NetworkConfig::default()
            .with_block_size(1_000_000)
            .with_bandwidth_mbps(8.0);
        assert_eq!(config.transmission_time(), Duration::from_secs(1));
    }

    #[test]
    fn test_model_parses_short_and_long_names() {
        assert_eq!("gossip".parse::<NetworkModel>().unwrap(), NetworkModel::GossipPeer);
        assert_eq!(
            "bandwidth-fair-relay".parse::<NetworkModel>().unwrap(),
            NetworkModel::BandwidthFairRelay
        );
        assert!("carrier-pigeon".parse::<NetworkModel>().is_err());
        assert_eq!(NetworkModel::DirectBroadcast.to_string(), "direct-broadcast");
    }
}
