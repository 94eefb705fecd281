//! Steps of the settlement state machine.
//!
//! A settlement walks the steps strictly in order:
//! **INITIALIZING → BUILDING → FETCHING_FRAGMENTS → MERGING →
//! SYNCHRONIZING_IDENTITIES → SIGNING → COLLECTING → COMMITTING**
//!
//! Each step is a barrier: the next one starts only after all work of the
//! current step (including both parallel counterparty branches) is done.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One step of a settlement run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettlementStep {
    /// Loading the current transfer record and deriving its successor.
    Initializing,
    /// Building the draft joint transaction and signing it provisionally.
    Building,
    /// Fetching the asset and cash fragments from both counterparties.
    FetchingFragments,
    /// Folding both fragments into the joint transaction.
    Merging,
    /// Agreeing on confidential identity mappings with both counterparties.
    SynchronizingIdentities,
    /// Re-signing the merged transaction locally.
    Signing,
    /// Collecting the counterparties' signatures.
    Collecting,
    /// Handing the fully signed transaction to the ordering authority.
    Committing,
}

impl SettlementStep {
    /// All steps in execution order.
    pub const ORDER: [Self; 8] = [
        Self::Initializing,
        Self::Building,
        Self::FetchingFragments,
        Self::Merging,
        Self::SynchronizingIdentities,
        Self::Signing,
        Self::Collecting,
        Self::Committing,
    ];

    /// The step that follows this one, or `None` after COMMITTING.
    #[must_use]
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Initializing => Some(Self::Building),
            Self::Building => Some(Self::FetchingFragments),
            Self::FetchingFragments => Some(Self::Merging),
            Self::Merging => Some(Self::SynchronizingIdentities),
            Self::SynchronizingIdentities => Some(Self::Signing),
            Self::Signing => Some(Self::Collecting),
            Self::Collecting => Some(Self::Committing),
            Self::Committing => None,
        }
    }

    /// Human readable label, as shown to operators watching progress.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Initializing => "Performing initial steps",
            Self::Building => "Building transaction",
            Self::FetchingFragments => "Collecting asset and cash states from counterparties",
            Self::Merging => "Merging counterparty states",
            Self::SynchronizingIdentities => "Syncing identities with counterparties",
            Self::Signing => "Signing transaction",
            Self::Collecting => "Collecting counterparty signatures",
            Self::Committing => "Finalising transaction",
        }
    }
}

impl fmt::Display for SettlementStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initializing => write!(f, "INITIALIZING"),
            Self::Building => write!(f, "BUILDING"),
            Self::FetchingFragments => write!(f, "FETCHING_FRAGMENTS"),
            Self::Merging => write!(f, "MERGING"),
            Self::SynchronizingIdentities => write!(f, "SYNCHRONIZING_IDENTITIES"),
            Self::Signing => write!(f, "SIGNING"),
            Self::Collecting => write!(f, "COLLECTING"),
            Self::Committing => write!(f, "COMMITTING"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_chain_in_order() {
        for pair in SettlementStep::ORDER.windows(2) {
            assert_eq!(pair[0].next(), Some(pair[1]));
        }
        assert_eq!(SettlementStep::Committing.next(), None);
    }

    #[test]
    fn step_display() {
        assert_eq!(format!("{}", SettlementStep::FetchingFragments), "FETCHING_FRAGMENTS");
        assert_eq!(
            format!("{}", SettlementStep::SynchronizingIdentities),
            "SYNCHRONIZING_IDENTITIES"
        );
    }

    #[test]
    fn step_serde_roundtrip() {
        let step = SettlementStep::Collecting;
        let json = serde_json::to_string(&step).unwrap();
        let back: SettlementStep = serde_json::from_str(&json).unwrap();
        assert_eq!(step, back);
    }
}
