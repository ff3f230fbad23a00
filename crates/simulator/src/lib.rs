//! Pivot-chain simulator
//!
//! Runs the same configuration over consecutive seeds and summarizes the
//! results. Each run is an independent [`Oracle`]; nothing is shared between
//! runs but the configuration.
//!
//! # Example
//!
//! ```ignore
//! use pivotsim_simulator::run_batch;
//! use pivotsim_simulation::SimConfig;
//!
//! let summary = run_batch(&SimConfig::default().with_seed(7), 5)?;
//! summary.print_summary();
//! ```

use pivotsim_simulation::{Oracle, PivotReport, SimConfig, SimError};
use serde::Serialize;
use tracing::info;

/// Reports from a batch of runs plus their averages.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub reports: Vec<PivotReport>,
    pub mean_attacker_ratio: f64,
    pub mean_pivot_ratio: f64,
    pub mean_propagation_secs: Option<f64>,
}

impl BatchSummary {
    fn from_reports(reports: Vec<PivotReport>) -> Self {
        let n = reports.len().max(1) as f64;
        let mean_attacker_ratio = reports.iter().map(|r| r.attacker_pivot_ratio).sum::<f64>() / n;
        let mean_pivot_ratio = reports.iter().map(|r| r.pivot_ratio).sum::<f64>() / n;
        let propagations: Vec<f64> = reports
            .iter()
            .filter_map(|r| r.mean_propagation)
            .map(|d| d.as_secs_f64())
            .collect();
        let mean_propagation_secs = (!propagations.is_empty())
            .then(|| propagations.iter().sum::<f64>() / propagations.len() as f64);
        Self {
            reports,
            mean_attacker_ratio,
            mean_pivot_ratio,
            mean_propagation_secs,
        }
    }

    pub fn print_summary(&self) {
        for report in &self.reports {
            println!("{report}");
        }
        if self.reports.len() > 1 {
            println!("\n=== {} runs ===", self.reports.len());
            println!("Mean pivot ratio:    {:.3}", self.mean_pivot_ratio);
            println!("Mean attacker ratio: {:.3}", self.mean_attacker_ratio);
            if let Some(secs) = self.mean_propagation_secs {
                println!("Mean propagation:    {secs:.3}s");
            }
        }
    }
}

/// Run `config` with seeds `config.seed, config.seed + 1, ...`.
pub fn run_batch(config: &SimConfig, runs: u32) -> Result<BatchSummary, SimError> {
    let mut reports = Vec::with_capacity(runs as usize);
    for run in 0..runs {
        let seed = config.seed.wrapping_add(u64::from(run));
        let mut oracle = Oracle::new(config.clone().with_seed(seed))?;
        let report = oracle.run();
        info!(
            run,
            seed,
            attacker_ratio = report.attacker_pivot_ratio,
            "Run finished"
        );
        reports.push(report);
    }
    Ok(BatchSummary::from_reports(reports))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_batch_uses_consecutive_seeds() {
        let config = SimConfig::default()
            .with_uniform_miners(3)
            .with_horizon(Duration::from_secs(60))
            .with_seed(40);
        let summary = run_batch(&config, 3).unwrap();
        let seeds: Vec<u64> = summary.reports.iter().map(|r| r.seed).collect();
        assert_eq!(seeds, vec![40, 41, 42]);
        assert!(summary.mean_pivot_ratio > 0.0);
    }

    #[test]
    fn test_batch_propagates_config_errors() {
        let config = SimConfig::default().with_miner_weights(vec![]);
        assert_eq!(run_batch(&config, 2).unwrap_err(), SimError::NoMiners);
    }
}
