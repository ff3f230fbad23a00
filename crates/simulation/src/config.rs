//! Simulation configuration.

use pivotsim_network_memory::{NetworkConfig, NetworkError};
use pivotsim_node::WithholdStrategy;
use pivotsim_types::NodeIndex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while setting up a simulation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    #[error("no miners configured")]
    NoMiners,

    #[error("miner {node} has invalid hash-power weight {weight}")]
    InvalidWeight { node: NodeIndex, weight: f64 },

    #[error("total hash-power weight is zero")]
    ZeroTotalWeight,

    #[error("{attackers} attackers requested but only {miners} miners configured")]
    TooManyAttackers { attackers: usize, miners: usize },

    #[error("block interval must span more than one tick, got {interval_secs}s at {precision} ticks/s")]
    InvalidInterval { interval_secs: f64, precision: f64 },

    #[error("time precision must be positive, got {0}")]
    InvalidPrecision(f64),

    #[error("observer {observer} is not one of the {miners} miners")]
    InvalidObserver { observer: NodeIndex, miners: usize },

    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// Everything a run depends on.
///
/// Miners `0..attackers` run the withholding strategy, the rest are honest.
/// Hash power is given per miner as a relative weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Relative hash power of each miner.
    pub miner_weights: Vec<f64>,
    /// Number of withholding miners, taken from the front of the list.
    pub attackers: usize,
    pub attacker_strategy: WithholdStrategy,
    /// Mean time between blocks, network-wide.
    pub block_interval_secs: f64,
    /// Scheduler ticks per simulated second.
    pub time_precision: f64,
    /// Simulated time to run for.
    pub horizon: Duration,
    pub seed: u64,
    /// Verify every ledger invariant after each insert (slow).
    pub consistency_checks: bool,
    /// Node whose public view the report describes. Defaults to the first
    /// honest miner.
    pub observer: Option<NodeIndex>,
    /// Log a progress line every this many mined blocks (0 disables).
    pub progress_interval: u64,
    pub network: NetworkConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            miner_weights: vec![1.0, 2.0, 3.0, 4.0, 5.0],
            attackers: 0,
            attacker_strategy: WithholdStrategy::Selfish,
            block_interval_secs: 5.0,
            time_precision: 1e5,
            horizon: Duration::from_secs(600),
            seed: 0,
            consistency_checks: false,
            observer: None,
            progress_interval: 100,
            network: NetworkConfig::default(),
        }
    }
}

impl SimConfig {
    /// `count` miners of equal hash power.
    pub fn with_uniform_miners(mut self, count: usize) -> Self {
        self.miner_weights = vec![1.0; count];
        self
    }

    pub fn with_miner_weights(mut self, weights: Vec<f64>) -> Self {
        self.miner_weights = weights;
        self
    }

    pub fn with_attackers(mut self, attackers: usize, strategy: WithholdStrategy) -> Self {
        self.attackers = attackers;
        self.attacker_strategy = strategy;
        self
    }

    pub fn with_block_interval(mut self, secs: f64) -> Self {
        self.block_interval_secs = secs;
        self
    }

    pub fn with_horizon(mut self, horizon: Duration) -> Self {
        self.horizon = horizon;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_consistency_checks(mut self, enabled: bool) -> Self {
        self.consistency_checks = enabled;
        self
    }

    pub fn with_observer(mut self, observer: NodeIndex) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_network(mut self, network: NetworkConfig) -> Self {
        self.network = network;
        self
    }

    pub fn miner_count(&self) -> usize {
        self.miner_weights.len()
    }

    /// Default observer: the first honest miner, or miner 0 if every miner
    /// withholds.
    pub fn observer(&self) -> NodeIndex {
        self.observer.unwrap_or_else(|| {
            if self.attackers < self.miner_count() {
                self.attackers as NodeIndex
            } else {
                0
            }
        })
    }

    /// Check every parameter that does not need a topology.
    pub fn validate(&self) -> Result<(), SimError> {
        let miners = self.miner_count();
        if miners == 0 {
            return Err(SimError::NoMiners);
        }
        for (node, &weight) in self.miner_weights.iter().enumerate() {
            if !(weight.is_finite() && weight >= 0.0) {
                return Err(SimError::InvalidWeight {
                    node: node as NodeIndex,
                    weight,
                });
            }
        }
        if self.miner_weights.iter().sum::<f64>() <= 0.0 {
            return Err(SimError::ZeroTotalWeight);
        }
        if self.attackers > miners {
            return Err(SimError::TooManyAttackers {
                attackers: self.attackers,
                miners,
            });
        }
        if !(self.time_precision.is_finite() && self.time_precision > 0.0) {
            return Err(SimError::InvalidPrecision(self.time_precision));
        }
        let difficulty = self.block_interval_secs * self.time_precision;
        if !(difficulty.is_finite() && difficulty > 1.0) {
            return Err(SimError::InvalidInterval {
                interval_secs: self.block_interval_secs,
                precision: self.time_precision,
            });
        }
        let observer = self.observer();
        if observer as usize >= miners {
            return Err(SimError::InvalidObserver { observer, miners });
        }
        self.network.validate(miners)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(SimConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_rejects_empty_and_weightless_miner_sets() {
        let config = SimConfig::default().with_miner_weights(vec![]);
        assert_eq!(config.validate(), Err(SimError::NoMiners));

        let config = SimConfig::default().with_miner_weights(vec![0.0, 0.0]);
        assert_eq!(config.validate(), Err(SimError::ZeroTotalWeight));

        let config = SimConfig::default().with_miner_weights(vec![1.0, -2.0]);
        assert!(matches!(
            config.validate(),
            Err(SimError::InvalidWeight { node: 1, .. })
        ));
    }

    #[test]
    fn test_rejects_more_attackers_than_miners() {
        let config = SimConfig::default()
            .with_uniform_miners(2)
            .with_attackers(3, WithholdStrategy::Selfish);
        assert_eq!(
            config.validate(),
            Err(SimError::TooManyAttackers {
                attackers: 3,
                miners: 2
            })
        );
    }

    #[test]
    fn test_rejects_sub_tick_interval() {
        let mut config = SimConfig::default().with_block_interval(0.0);
        assert!(matches!(config.validate(), Err(SimError::InvalidInterval { .. })));

        config.block_interval_secs = 5.0;
        config.time_precision = 0.0;
        assert_eq!(config.validate(), Err(SimError::InvalidPrecision(0.0)));
    }

    #[test]
    fn test_observer_defaults_to_first_honest_miner() {
        let config = SimConfig::default().with_attackers(2, WithholdStrategy::Selfish);
        assert_eq!(config.observer(), 2);

        let config = SimConfig::default().with_observer(9);
        assert!(matches!(
            config.validate(),
            Err(SimError::InvalidObserver { observer: 9, .. })
        ));
    }
}
