//! Per-node DAG ledger with an incrementally maintained pivot chain.
//!
//! Every simulated node owns one [`Ledger`]: its local view of the block DAG.
//! Blocks arrive in any causally valid order and the ledger keeps track of the
//! GHOST-style pivot chain (at every step follow the child with the heaviest
//! subtree) without recomputing subtree weights from scratch.
//!
//! # Weight encoding
//!
//! ```text
//!   on-pivot  (weight <= 0): true subtree size = total_weight + weight
//!   off-pivot (weight >  0): true subtree size = weight
//! ```
//!
//! Inserting a block only touches its off-pivot ancestors plus the two
//! branches hanging off the deepest on-pivot ancestor. Pivot blocks above that
//! point grow with `total_weight` for free.
//!
//! # Tie-break
//!
//! Children are ordered by true weight, then by the block's `residual`
//! (larger wins), then by lower block index. Arrival order never matters, so
//! two ledgers holding the same blocks agree on the pivot chain.

mod consistency;
mod ledger;
mod pending;

pub use consistency::ConsistencyError;
pub use ledger::{BlockTemplate, InsertOutcome, Ledger, LedgerEntry};
pub use pending::PendingBlocks;
