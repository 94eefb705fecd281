//! # TransferRecord: the versioned deal between seller and buyer
//!
//! A `TransferRecord` describes a pending or completed asset-for-cash deal.
//! It is a *linear* state: every version shares the same [`RecordId`], and
//! an update consumes the previous version and produces its successor
//! inside one joint transaction.
//!
//! ## Status Machine
//!
//! ```text
//!   ┌──────────────────────┐ confirm ┌─────────┐
//!   │ PENDING_CONFIRMATION ├────────▶│ PENDING │
//!   └───┬──────────────┬───┘         └──┬───┬──┘
//!       │ settle       │ reject  settle │   │ reject
//!       ▼              ▼                ▼   ▼
//!   ┌─────────────┐  ┌──────────┐
//!   │ TRANSFERRED │  │ REJECTED │
//!   └─────────────┘  └──────────┘
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AbstractParty, ClearingError, RecordId, Result};

/// The security being transferred.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Asset {
    /// CUSIP identifying the security.
    pub cusip: String,
    /// Human readable name.
    pub name: String,
    /// Agreed price for the whole position.
    pub purchase_cost: Decimal,
    /// Currency of `purchase_cost` (e.g., "USD").
    pub currency: String,
}

/// Lifecycle status of a transfer record.
///
/// Transitions are **monotonic**: a record never moves backwards across
/// transaction versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferStatus {
    /// Created by the seller, awaiting the buyer's confirmation.
    PendingConfirmation,
    /// Confirmed by the buyer, awaiting settlement.
    Pending,
    /// Settled by the clearing house. Terminal.
    Transferred,
    /// Abandoned before settlement. Terminal.
    Rejected,
}

impl TransferStatus {
    /// Can a record in this status be superseded by one in `target`?
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!(
            (self, target),
            (
                Self::PendingConfirmation,
                Self::Pending | Self::Transferred | Self::Rejected
            ) | (Self::Pending, Self::Transferred | Self::Rejected)
        )
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Transferred | Self::Rejected)
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PendingConfirmation => write!(f, "PENDING_CONFIRMATION"),
            Self::Pending => write!(f, "PENDING"),
            Self::Transferred => write!(f, "TRANSFERRED"),
            Self::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// One immutable version of a transfer deal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    /// Linear id shared by every version of this deal.
    pub id: RecordId,
    /// The security changing hands.
    pub asset: Asset,
    /// Current owner of the security.
    pub seller: AbstractParty,
    /// Party paying `asset.purchase_cost`.
    pub buyer: AbstractParty,
    /// Set by the clearing house once settlement begins.
    pub clearing_house: Option<AbstractParty>,
    /// Lifecycle status.
    pub status: TransferStatus,
}

impl TransferRecord {
    /// A fresh PENDING_CONFIRMATION record with a new linear id.
    #[must_use]
    pub fn pending(asset: Asset, seller: AbstractParty, buyer: AbstractParty) -> Self {
        Self {
            id: RecordId::new(),
            asset,
            seller,
            buyer,
            clearing_house: None,
            status: TransferStatus::PendingConfirmation,
        }
    }

    /// Ledger participants of this record. The clearing house signs
    /// settlement but is not a participant.
    #[must_use]
    pub fn participants(&self) -> Vec<AbstractParty> {
        vec![self.buyer.clone(), self.seller.clone()]
    }

    /// Derive the settled successor of this version.
    ///
    /// # Errors
    /// Returns [`ClearingError::InvalidStatusTransition`] if this version
    /// cannot move to TRANSFERRED.
    pub fn settled_by(&self, clearing_house: AbstractParty) -> Result<Self> {
        self.with_status(TransferStatus::Transferred)
            .map(|next| Self {
                clearing_house: Some(clearing_house),
                ..next
            })
    }

    /// Copy of this record with a new status, enforcing monotonicity.
    ///
    /// # Errors
    /// Returns [`ClearingError::InvalidStatusTransition`] on a backwards or
    /// sideways move.
    pub fn with_status(&self, status: TransferStatus) -> Result<Self> {
        if !self.status.can_transition_to(status) {
            return Err(ClearingError::InvalidStatusTransition {
                from: self.status,
                to: status,
            });
        }
        Ok(Self {
            status,
            ..self.clone()
        })
    }
}

/// Dummy fixtures for testing. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl Asset {
    /// A sample bond position priced at `cost` USD.
    #[must_use]
    pub fn dummy(cusip: &str, cost: Decimal) -> Self {
        Self {
            cusip: cusip.to_string(),
            name: format!("Bond {cusip}"),
            purchase_cost: cost,
            currency: "USD".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PartyKey, TransferStatus::*};

    fn make_record() -> TransferRecord {
        TransferRecord::pending(
            Asset::dummy("912828ZT0", Decimal::new(1000, 0)),
            AbstractParty::anonymous(PartyKey([1; 32])),
            AbstractParty::anonymous(PartyKey([2; 32])),
        )
    }

    #[test]
    fn status_transitions_forward_only() {
        assert!(PendingConfirmation.can_transition_to(Pending));
        assert!(PendingConfirmation.can_transition_to(Transferred));
        assert!(Pending.can_transition_to(Transferred));
        assert!(Pending.can_transition_to(Rejected));
    }

    #[test]
    fn status_transitions_backwards_blocked() {
        assert!(!Transferred.can_transition_to(PendingConfirmation));
        assert!(!Transferred.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(PendingConfirmation));
        assert!(!Rejected.can_transition_to(Transferred));
        assert!(!Transferred.can_transition_to(Transferred));
    }

    #[test]
    fn participants_are_buyer_then_seller() {
        let record = make_record();
        assert_eq!(
            record.participants(),
            vec![record.buyer.clone(), record.seller.clone()]
        );
    }

    #[test]
    fn settled_successor_keeps_deal_terms() {
        let record = make_record();
        let ch = AbstractParty::anonymous(PartyKey([3; 32]));
        let next = record.settled_by(ch.clone()).unwrap();
        assert_eq!(next.id, record.id);
        assert_eq!(next.asset, record.asset);
        assert_eq!(next.seller, record.seller);
        assert_eq!(next.buyer, record.buyer);
        assert_eq!(next.clearing_house, Some(ch));
        assert_eq!(next.status, Transferred);
    }

    #[test]
    fn settled_record_cannot_settle_again() {
        let record = make_record();
        let ch = AbstractParty::anonymous(PartyKey([3; 32]));
        let next = record.settled_by(ch.clone()).unwrap();
        let err = next.settled_by(ch).unwrap_err();
        assert!(matches!(
            err,
            ClearingError::InvalidStatusTransition {
                from: Transferred,
                to: Transferred
            }
        ));
    }

    #[test]
    fn status_display() {
        assert_eq!(format!("{PendingConfirmation}"), "PENDING_CONFIRMATION");
        assert_eq!(format!("{Transferred}"), "TRANSFERRED");
    }
}
