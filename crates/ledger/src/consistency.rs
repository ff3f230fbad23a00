//! Full recomputation of ledger invariants.
//!
//! Slow: visits every block and every child. Used by tests and by simulations
//! run with consistency checks enabled.

use crate::ledger::Ledger;
use pivotsim_types::BlockIndex;
use std::collections::BTreeSet;
use thiserror::Error;

/// A ledger invariant that failed to hold.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsistencyError {
    #[error("genesis missing or carrying weight {0}")]
    GenesisWeight(i64),

    #[error("block {block}: stored weight gives {stored}, children sum to {computed}")]
    WeightMismatch {
        block: BlockIndex,
        stored: i64,
        computed: i64,
    },

    #[error("block {block}: max child is {stored:?}, heaviest child is {computed:?}")]
    MaxChildMismatch {
        block: BlockIndex,
        stored: Option<BlockIndex>,
        computed: Option<BlockIndex>,
    },

    #[error("block {block}: pivot flag disagrees with parent's max child")]
    PivotFlagMismatch { block: BlockIndex },

    #[error("block {block}: tip set membership is {in_set}, expected {expected}")]
    TipMismatch {
        block: BlockIndex,
        in_set: bool,
        expected: bool,
    },

    #[error("pivot tip {0:?} is not the end of the pivot chain")]
    PivotTipInvalid(Option<BlockIndex>),

    #[error("ledger holds {entries} blocks but total weight is {total_weight}")]
    CountMismatch { entries: usize, total_weight: i64 },

    #[error("block {block}: child {child} does not point back at it")]
    ChildParentMismatch { block: BlockIndex, child: BlockIndex },
}

pub(crate) fn check(ledger: &Ledger) -> Result<(), ConsistencyError> {
    let entries = ledger.entries();
    let total_weight = ledger.raw_total_weight();

    if entries.is_empty() {
        return if total_weight == 0 && ledger.pivot_tip().is_none() {
            Ok(())
        } else {
            Err(ConsistencyError::PivotTipInvalid(ledger.pivot_tip()))
        };
    }

    let genesis = ledger
        .genesis()
        .and_then(|g| entries.get(&g))
        .ok_or(ConsistencyError::GenesisWeight(i64::MIN))?;
    if genesis.weight != 0 {
        return Err(ConsistencyError::GenesisWeight(genesis.weight));
    }

    if entries.len() as i64 != total_weight {
        return Err(ConsistencyError::CountMismatch {
            entries: entries.len(),
            total_weight,
        });
    }

    let mut referenced = BTreeSet::new();
    for (&index, entry) in entries {
        referenced.extend(entry.block.predecessors());

        let mut computed = 1;
        for &child_index in &entry.children {
            let child = &entries[&child_index];
            if child.parent != Some(index) {
                return Err(ConsistencyError::ChildParentMismatch {
                    block: index,
                    child: child_index,
                });
            }
            let on_max = entry.max_child == Some(child_index);
            if child.is_pivot() != (entry.is_pivot() && on_max) {
                return Err(ConsistencyError::PivotFlagMismatch { block: child_index });
            }
            computed += ledger.weight_of(child);
        }

        let stored = ledger.weight_of(entry);
        if stored != computed {
            return Err(ConsistencyError::WeightMismatch {
                block: index,
                stored,
                computed,
            });
        }

        let heaviest = ledger.heaviest_child(index);
        if entry.max_child != heaviest {
            return Err(ConsistencyError::MaxChildMismatch {
                block: index,
                stored: entry.max_child,
                computed: heaviest,
            });
        }
    }

    for &index in entries.keys() {
        let expected = !referenced.contains(&index);
        let in_set = ledger.tips().contains(&index);
        if in_set != expected {
            return Err(ConsistencyError::TipMismatch {
                block: index,
                in_set,
                expected,
            });
        }
    }

    let tip = ledger.pivot_tip();
    let valid_tip = tip
        .and_then(|t| entries.get(&t))
        .is_some_and(|entry| entry.is_pivot() && entry.max_child.is_none());
    if !valid_tip || ledger.pivot_chain().last().copied() != tip {
        return Err(ConsistencyError::PivotTipInvalid(tip));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pivotsim_types::test_utils::{block, genesis};

    #[test]
    fn test_empty_ledger_is_consistent() {
        assert_eq!(Ledger::new().check_consistency(), Ok(()));
    }

    #[test]
    fn test_forked_ledger_is_consistent() {
        let mut ledger = Ledger::new();
        ledger.insert(genesis());
        ledger.insert(block(1, 0, &[], 0.1));
        ledger.insert(block(2, 0, &[], 0.2));
        ledger.insert(block(3, 1, &[2], 0.3));
        ledger.insert(block(4, 2, &[], 0.4));
        ledger.insert(block(5, 4, &[], 0.5));

        assert_eq!(ledger.check_consistency(), Ok(()));
        assert_eq!(ledger.pivot_tip(), Some(BlockIndex(5)));
    }
}
