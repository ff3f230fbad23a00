//! Deterministic simulation runner.
//!
//! Given the same seed, a run produces identical results every time.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                        Oracle                           │
//! │                                                         │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │     EventQueue (BTreeMap<EventKey, Event>)         │ │
//! │  │     Ordered by: time, sequence                     │ │
//! │  └────────────────────────┬───────────────────────────┘ │
//! │                           │ dispatch                    │
//! │              ┌────────────┴─────────────┐               │
//! │              ▼                          ▼               │
//! │  ┌──────────────────────┐   ┌──────────────────────────┐│
//! │  │ miners: Vec<dyn Miner>│   │ Network (direct/gossip/ ││
//! │  │ one Ledger each      │   │ relay)                   ││
//! │  └──────────┬───────────┘   └────────────┬─────────────┘│
//! │             │ Actions                    │ Events       │
//! │             └──────────► EventQueue ◄────┘              │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Block discovery is a Poisson process on a tick grid (see [`mining`]); the
//! winning miner is drawn by hash power.

mod config;
pub mod mining;
mod oracle;
mod registry;
mod report;

pub use config::{SimConfig, SimError};
pub use oracle::Oracle;
pub use registry::{BlockRecord, BlockRegistry};
pub use report::PivotReport;

pub use pivotsim_network_memory::{LatencyTable, NetworkConfig, NetworkModel};
pub use pivotsim_node::WithholdStrategy;
