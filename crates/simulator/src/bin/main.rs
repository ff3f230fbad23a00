//! Pivot-chain simulator CLI
//!
//! Run deterministic DAG-consensus simulations with configurable miners,
//! attackers and network model.
//!
//! # Example
//!
//! ```bash
//! # Ten equal miners, direct broadcast, fixed seed
//! pivotsim -n 10 --seed 42
//!
//! # One selfish miner with 30% of the hash power over the relay model
//! pivotsim -n 8 --attackers 1 --attacker-power 0.3 --model relay -d 1200
//!
//! # Delayed-reference attacker, five seeds, JSON output
//! pivotsim --attackers 1 --strategy delayed-reference --reference-delay 5 --runs 5 --json
//! ```

use clap::{Parser, ValueEnum};
use pivotsim_simulation::{NetworkConfig, NetworkModel, SimConfig, WithholdStrategy};
use pivotsim_simulator::run_batch;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Strategy {
    Selfish,
    DelayedReference,
}

/// Pivot-chain simulator
///
/// Runs deterministic discrete-event simulations of a DAG blockchain.
/// Single-threaded, reproducible when the same seed is used.
#[derive(Parser, Debug)]
#[command(name = "pivotsim")]
#[command(version, about, long_about = None)]
struct Args {
    /// Number of miners
    #[arg(short = 'n', long, default_value = "10")]
    nodes: usize,

    /// Number of withholding miners (taken from the front)
    #[arg(long, default_value = "0")]
    attackers: usize,

    /// Combined hash-power fraction of the attackers (0.0-1.0). When omitted
    /// every miner has equal power.
    #[arg(long)]
    attacker_power: Option<f64>,

    /// Withholding strategy
    #[arg(long, value_enum, default_value = "selfish")]
    strategy: Strategy,

    /// Reference delay in seconds for the delayed-reference strategy
    #[arg(long, default_value = "5")]
    reference_delay: f64,

    /// Mean block interval in seconds
    #[arg(short = 'i', long, default_value = "5")]
    interval: f64,

    /// Simulated duration in seconds
    #[arg(short = 'd', long, default_value = "600")]
    duration: u64,

    /// Random seed for reproducible results. When omitted, a random seed is used.
    #[arg(long)]
    seed: Option<u64>,

    /// Network model: direct, gossip or relay
    #[arg(short = 'm', long, default_value = "direct")]
    model: NetworkModel,

    /// Uplink bandwidth in Mbps (gossip and relay)
    #[arg(long, default_value = "20")]
    bandwidth: f64,

    /// Peers per node (gossip and relay)
    #[arg(long, default_value = "8")]
    peers: usize,

    /// Honest propagation delay in seconds (direct)
    #[arg(long, default_value = "1")]
    honest_delay: f64,

    /// Number of consecutive seeds to run
    #[arg(long, default_value = "1")]
    runs: u32,

    /// Verify every ledger invariant after each insert (slow)
    #[arg(long)]
    check: bool,

    /// Print reports as JSON
    #[arg(long)]
    json: bool,
}

impl Args {
    fn miner_weights(&self) -> Vec<f64> {
        match self.attacker_power {
            Some(power) if self.attackers > 0 && self.attackers < self.nodes => {
                let attacker = power / self.attackers as f64;
                let honest = (1.0 - power) / (self.nodes - self.attackers) as f64;
                (0..self.nodes)
                    .map(|i| if i < self.attackers { attacker } else { honest })
                    .collect()
            }
            _ => vec![1.0; self.nodes],
        }
    }

    fn strategy(&self) -> WithholdStrategy {
        match self.strategy {
            Strategy::Selfish => WithholdStrategy::Selfish,
            Strategy::DelayedReference => WithholdStrategy::DelayedReference {
                reference_delay: Duration::from_secs_f64(self.reference_delay),
            },
        }
    }

    fn config(&self, seed: u64) -> SimConfig {
        let network = NetworkConfig::default()
            .with_model(self.model)
            .with_bandwidth_mbps(self.bandwidth)
            .with_peers(self.peers)
            .with_honest_delay(Duration::from_secs_f64(self.honest_delay));
        SimConfig::default()
            .with_miner_weights(self.miner_weights())
            .with_attackers(self.attackers, self.strategy())
            .with_block_interval(self.interval)
            .with_horizon(Duration::from_secs(self.duration))
            .with_consistency_checks(self.check)
            .with_network(network)
            .with_seed(seed)
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,pivotsim_simulation=info")),
        )
        .init();

    let args = Args::parse();
    let seed = args.seed.unwrap_or_else(rand::random);

    info!(
        nodes = args.nodes,
        attackers = args.attackers,
        model = %args.model,
        duration_secs = args.duration,
        seed,
        runs = args.runs,
        "Starting simulation"
    );

    let config = args.config(seed);
    let summary = match run_batch(&config, args.runs) {
        Ok(summary) => summary,
        Err(e) => {
            error!(error = %e, "Invalid simulation setup");
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    if args.json {
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("error: failed to serialize report: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        summary.print_summary();
    }
    ExitCode::SUCCESS
}
