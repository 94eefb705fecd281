//! Uniqueness guard: each ledger state can be consumed exactly once.
//!
//! The ordering authority records, for every consumed [`StateRef`], the
//! transaction that consumed it. A second transaction naming any of those
//! inputs is refused with [`ClearingError::CommitRejected`], which is how
//! two concurrent settlements of the same record are resolved: the first
//! commit wins.
//!
//! Unlike a cache, the guard never evicts. Forgetting a consumed state
//! would let it be spent again.

use std::collections::{HashMap, HashSet};

use clearhouse_types::{ClearingError, Result, StateRef, TxId};

/// Consumed-state registry for one ordering authority.
#[derive(Debug, Default)]
pub struct UniquenessGuard {
    consumed: HashMap<StateRef, TxId>,
}

impl UniquenessGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark every reference in `inputs` consumed by `tx`. All-or-nothing:
    /// on conflict nothing is recorded.
    ///
    /// # Errors
    /// Returns [`ClearingError::CommitRejected`] if an input was already
    /// consumed by another transaction or is listed twice.
    pub fn commit<'a>(&mut self, inputs: impl IntoIterator<Item = &'a StateRef>, tx: TxId) -> Result<()> {
        let mut batch = HashSet::new();
        for input in inputs {
            if let Some(previous) = self.consumed.get(input) {
                return Err(ClearingError::CommitRejected {
                    reason: format!("input {input} already consumed by {previous}"),
                });
            }
            if !batch.insert(*input) {
                return Err(ClearingError::CommitRejected {
                    reason: format!("input {input} listed twice"),
                });
            }
        }
        self.consumed.extend(batch.into_iter().map(|input| (input, tx)));
        Ok(())
    }

    #[must_use]
    pub fn is_consumed(&self, reference: &StateRef) -> bool {
        self.consumed.contains_key(reference)
    }

    /// The transaction that consumed `reference`, if any.
    #[must_use]
    pub fn consuming_tx(&self, reference: &StateRef) -> Option<TxId> {
        self.consumed.get(reference).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.consumed.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.consumed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(seed: u8, index: u32) -> StateRef {
        StateRef::new(TxId([seed; 32]), index)
    }

    #[test]
    fn first_consume_ok() {
        let mut guard = UniquenessGuard::new();
        guard.commit(&[input(1, 0), input(1, 1)], TxId([7; 32])).unwrap();
        assert!(guard.is_consumed(&input(1, 0)));
        assert_eq!(guard.consuming_tx(&input(1, 1)), Some(TxId([7; 32])));
        assert_eq!(guard.len(), 2);
    }

    #[test]
    fn double_spend_blocked() {
        let mut guard = UniquenessGuard::new();
        guard.commit(&[input(1, 0)], TxId([7; 32])).unwrap();
        let err = guard.commit(&[input(1, 0)], TxId([8; 32])).unwrap_err();
        assert!(
            matches!(err, ClearingError::CommitRejected { ref reason } if reason.contains("already consumed")),
            "Expected CommitRejected, got: {err:?}"
        );
    }

    #[test]
    fn conflict_records_nothing() {
        let mut guard = UniquenessGuard::new();
        guard.commit(&[input(1, 0)], TxId([7; 32])).unwrap();
        assert!(guard.commit(&[input(2, 0), input(1, 0)], TxId([8; 32])).is_err());
        assert!(!guard.is_consumed(&input(2, 0)));
        assert_eq!(guard.len(), 1);
    }

    #[test]
    fn repeated_input_in_one_tx_blocked() {
        let mut guard = UniquenessGuard::new();
        let err = guard
            .commit(&[input(3, 0), input(3, 0)], TxId([9; 32]))
            .unwrap_err();
        assert!(matches!(err, ClearingError::CommitRejected { .. }));
        assert!(guard.is_empty());
    }

    #[test]
    fn no_inputs_is_fine() {
        let mut guard = UniquenessGuard::new();
        guard.commit(&[], TxId([1; 32])).unwrap();
        assert!(guard.is_empty());
    }
}
