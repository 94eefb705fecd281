//! Counterparty sessions: one ordered, reliable channel per counterparty.
//!
//! All protocol traffic is a [`SessionMessage`] encoded with `serde_json`.
//! Sessions move raw bytes so that a counterparty sending garbage is
//! observable as a decode failure ([`ClearingError::MalformedReply`]),
//! never as a missing message.

use std::time::Duration;

use async_trait::async_trait;
use clearhouse_types::{
    ClearingError, CommittedTransaction, Endpoint, IdentityCertificate, Party, PartyKey, Result,
    SettlementStep, SignedTransaction, TransactionSignature,
};
use serde::{Deserialize, Serialize};

use crate::identity::IdentityMapping;

/// Every message exchanged between the clearing house and a counterparty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionMessage {
    /// Provisional transaction, sent as an opaque envelope asking for a leg.
    Proposal(SignedTransaction),
    /// The counterparty's signed sub-transaction.
    Fragment(SignedTransaction),
    /// Counterparty declines to take part.
    Reject { reason: String },
    /// Identity sync, phase 1: the keys referenced by the merged
    /// transaction and the certificates the sender holds for them.
    IdentitySync {
        keys: Vec<PartyKey>,
        offered: Vec<IdentityCertificate>,
    },
    /// Reply to phase 1: certificates the receiver can add.
    IdentityOffer { offered: Vec<IdentityCertificate> },
    /// Identity sync, phase 2: every certificate gathered in phase 1.
    IdentityConfirm { offered: Vec<IdentityCertificate> },
    /// Reply to phase 2: the receiver's resolved key mapping.
    IdentityReport { resolved: Vec<IdentityMapping> },
    /// Please sign this transaction.
    SignatureRequest(SignedTransaction),
    /// Signatures over the requested transaction.
    Signatures(Vec<TransactionSignature>),
    /// The transaction was committed by the ordering authority.
    Finalised(CommittedTransaction),
}

impl SessionMessage {
    /// Encode for the wire.
    ///
    /// # Errors
    /// Returns [`ClearingError::Serialization`] if encoding fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from the wire.
    ///
    /// # Errors
    /// Returns [`ClearingError::Serialization`] if the bytes are not a message.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Short name of the variant, for logs and error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Proposal(_) => "Proposal",
            Self::Fragment(_) => "Fragment",
            Self::Reject { .. } => "Reject",
            Self::IdentitySync { .. } => "IdentitySync",
            Self::IdentityOffer { .. } => "IdentityOffer",
            Self::IdentityConfirm { .. } => "IdentityConfirm",
            Self::IdentityReport { .. } => "IdentityReport",
            Self::SignatureRequest(_) => "SignatureRequest",
            Self::Signatures(_) => "Signatures",
            Self::Finalised(_) => "Finalised",
        }
    }
}

/// The peer hung up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelClosed;

/// One side of a point-to-point session.
#[async_trait]
pub trait CounterpartySession: Send {
    /// The well-known party at the other end.
    fn counterparty(&self) -> &Party;

    /// Queue `payload` for delivery, in order.
    async fn send_bytes(&mut self, payload: Vec<u8>) -> std::result::Result<(), ChannelClosed>;

    /// Next payload from the peer, or `None` once the peer has closed.
    async fn receive_bytes(&mut self) -> Option<Vec<u8>>;
}

pub type BoxedSession = Box<dyn CounterpartySession>;

/// Opens sessions to resolved endpoints.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    async fn open(&self, endpoint: &Endpoint) -> Result<BoxedSession>;
}

/// Send one message, mapping a closed channel to [`ClearingError::SessionClosed`].
pub async fn send_message(
    session: &mut dyn CounterpartySession,
    step: SettlementStep,
    message: &SessionMessage,
) -> Result<()> {
    let payload = message.encode()?;
    if session.send_bytes(payload).await.is_err() {
        return Err(ClearingError::SessionClosed {
            step,
            counterparty: session.counterparty().name.clone(),
        });
    }
    Ok(())
}

/// Wait up to `timeout` for one message.
///
/// # Errors
/// - `SessionTimeout` if nothing arrives in time
/// - `SessionClosed` if the peer hung up
/// - `MalformedReply` if the bytes do not decode
pub async fn receive_message(
    session: &mut dyn CounterpartySession,
    step: SettlementStep,
    timeout: Duration,
) -> Result<SessionMessage> {
    let counterparty = session.counterparty().name.clone();
    let received = tokio::time::timeout(timeout, session.receive_bytes())
        .await
        .map_err(|_| ClearingError::SessionTimeout {
            step,
            counterparty: counterparty.clone(),
        })?;
    let Some(bytes) = received else {
        return Err(ClearingError::SessionClosed { step, counterparty });
    };
    SessionMessage::decode(&bytes).map_err(|e| ClearingError::MalformedReply {
        step,
        counterparty,
        reason: e.to_string(),
    })
}

/// Error for a reply that decoded but is not `expected`. An explicit
/// `Reject` becomes [`ClearingError::CounterpartyDeclined`].
#[must_use]
pub fn unexpected(
    session: &dyn CounterpartySession,
    step: SettlementStep,
    expected: &str,
    got: &SessionMessage,
) -> ClearingError {
    let counterparty = session.counterparty().name.clone();
    match got {
        SessionMessage::Reject { reason } => ClearingError::CounterpartyDeclined {
            step,
            counterparty,
            reason: reason.clone(),
        },
        other => ClearingError::MalformedReply {
            step,
            counterparty,
            reason: format!("expected {expected}, got {}", other.kind()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_roundtrip_keeps_kind() {
        let msg = SessionMessage::Reject {
            reason: "no asset".into(),
        };
        let bytes = msg.encode().unwrap();
        let back = SessionMessage::decode(&bytes).unwrap();
        assert_eq!(back.kind(), "Reject");
    }

    #[test]
    fn garbage_does_not_decode() {
        let err = SessionMessage::decode(b"\x00\x01garbage").unwrap_err();
        assert!(matches!(err, ClearingError::Serialization(_)));
    }
}
