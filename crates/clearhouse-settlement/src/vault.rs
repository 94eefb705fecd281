//! Read access to a node's unconsumed ledger states.

use clearhouse_types::{ClearingError, RecordId, Result, StateAndRef};

/// A node's view of the states it knows about and has not seen consumed.
pub trait LedgerVault: Send + Sync {
    /// Every unconsumed state, in a stable order.
    fn unconsumed_states(&self) -> Vec<StateAndRef>;

    /// The current, unconsumed version of transfer record `id`.
    ///
    /// # Errors
    /// Returns [`ClearingError::NotFound`] if no unconsumed version exists.
    fn load_transfer(&self, id: RecordId) -> Result<StateAndRef> {
        self.unconsumed_states()
            .into_iter()
            .find(|s| s.state.data.as_transfer().is_some_and(|r| r.id == id))
            .ok_or(ClearingError::NotFound(id))
    }
}
