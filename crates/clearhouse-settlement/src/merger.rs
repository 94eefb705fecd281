//! Folds counterparty fragments into the joint transaction.
//!
//! Merge order is part of the protocol: the seller's asset leg always goes
//! in before the buyer's cash leg, so every party derives the same
//! transaction id. The merger performs no validation of fragment contents;
//! the merged transaction is checked as a whole at commit time.

use std::{collections::HashSet, fmt};

use clearhouse_types::{ClearingError, Result, TransactionBuilder, TxId, UnverifiedFragment};

/// Which counterparty a fragment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentSlot {
    Seller,
    Buyer,
}

impl fmt::Display for FragmentSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Seller => write!(f, "seller"),
            Self::Buyer => write!(f, "buyer"),
        }
    }
}

/// What one merge added to the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeSummary {
    pub inputs_added: usize,
    pub outputs_added: usize,
    pub commands_added: usize,
}

/// Tracks merge order and merged fragment ids for one settlement attempt.
#[derive(Debug)]
pub struct TransactionMerger {
    expected: Option<FragmentSlot>,
    merged: HashSet<TxId>,
}

impl Default for TransactionMerger {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionMerger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            expected: Some(FragmentSlot::Seller),
            merged: HashSet::new(),
        }
    }

    /// Append `fragment`'s inputs, outputs and commands to `builder`, in
    /// the fragment's order. Inputs already present and identical commands
    /// are not added twice.
    ///
    /// # Errors
    /// - `DuplicateFragment` if this fragment id was already merged
    /// - `FragmentOrderViolation` if `slot` is not the next expected slot
    pub fn merge(
        &mut self,
        builder: &mut TransactionBuilder,
        fragment: &UnverifiedFragment,
        slot: FragmentSlot,
    ) -> Result<MergeSummary> {
        let id = fragment.id();
        if self.merged.contains(&id) {
            return Err(ClearingError::DuplicateFragment(id));
        }
        if self.expected != Some(slot) {
            return Err(ClearingError::FragmentOrderViolation {
                expected: self
                    .expected
                    .map_or_else(|| "no further fragments".to_string(), |s| s.to_string()),
                actual: slot.to_string(),
            });
        }

        let mut summary = MergeSummary::default();
        for input in fragment.inputs() {
            if !builder.contains_input(&input.reference) {
                builder.add_input_state(input.clone());
                summary.inputs_added += 1;
            }
        }
        for output in fragment.outputs() {
            builder.add_output_state(output.clone());
            summary.outputs_added += 1;
        }
        for command in fragment.commands() {
            if !builder.commands().contains(command) {
                builder.add_command(command.clone());
                summary.commands_added += 1;
            }
        }

        self.merged.insert(id);
        self.expected = match slot {
            FragmentSlot::Seller => Some(FragmentSlot::Buyer),
            FragmentSlot::Buyer => None,
        };
        tracing::debug!(
            %slot,
            fragment = %id,
            inputs = summary.inputs_added,
            outputs = summary.outputs_added,
            commands = summary.commands_added,
            "fragment merged"
        );
        Ok(summary)
    }
}
