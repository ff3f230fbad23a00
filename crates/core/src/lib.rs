//! Core types for the pivot-chain simulator.
//!
//! This crate provides the pieces every runner is built from:
//!
//! - [`Event`]: all events the oracle dispatches
//! - [`EventQueue`]: the deterministic scheduler and simulated clock
//! - [`Miner`]: the trait every mining strategy implements
//! - [`Action`]: what a miner asks the oracle to do
//!
//! # Architecture
//!
//! ```text
//! EventQueue::pop → Oracle::dispatch(Event) → Miner / Network → Actions / Events → EventQueue
//! ```
//!
//! Miners are:
//! - **Synchronous**: No async, no .await
//! - **Deterministic**: Same state + input = same actions
//! - **Pure-ish**: Mutate self, but perform no I/O

mod event;
mod event_queue;
mod miner;

pub use event::{Event, Packet, PacketKind};
pub use event_queue::{EventKey, EventQueue, SchedulerStats};
pub use miner::{Action, MinedBlock, Miner};
