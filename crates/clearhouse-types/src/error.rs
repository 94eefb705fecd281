//! Error types for the Clearhouse settlement protocol.
//!
//! All errors use the `CH_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Transfer record errors
//! - 2xx: Session errors
//! - 3xx: Identity errors
//! - 4xx: Merge errors
//! - 5xx: Signature errors
//! - 6xx: Commit errors
//! - 9xx: General / internal errors
//!
//! Every variant aborts the settlement attempt that raised it. Session
//! errors carry the step and counterparty so an operator can tell which
//! leg failed before retrying.

use thiserror::Error;

use crate::{PartyKey, RecordId, SettlementStep, TransferStatus, TxId};

/// Central error enum for all Clearhouse operations.
#[derive(Debug, Error)]
pub enum ClearingError {
    // =================================================================
    // Transfer Record Errors (1xx)
    // =================================================================
    /// The record does not exist or its current version was already consumed.
    #[error("CH_ERR_100: Transfer record not found or already consumed: {0}")]
    NotFound(RecordId),

    /// The invoking party cannot settle this record (e.g., it is the buyer or seller).
    #[error("CH_ERR_101: Invalid party: {reason}")]
    InvalidParty { reason: String },

    /// The record status cannot move from `from` to `to`.
    #[error("CH_ERR_102: Invalid status transition: {from} -> {to}")]
    InvalidStatusTransition {
        from: TransferStatus,
        to: TransferStatus,
    },

    // =================================================================
    // Session Errors (2xx)
    // =================================================================
    /// The counterparty did not reply within the bounded wait.
    #[error("CH_ERR_200: Session with {counterparty} timed out during {step}")]
    SessionTimeout {
        step: SettlementStep,
        counterparty: String,
    },

    /// The counterparty replied with something that is not the expected message.
    #[error("CH_ERR_201: Malformed reply from {counterparty} during {step}: {reason}")]
    MalformedReply {
        step: SettlementStep,
        counterparty: String,
        reason: String,
    },

    /// The session closed before the exchange completed.
    #[error("CH_ERR_202: Session with {counterparty} closed during {step}")]
    SessionClosed {
        step: SettlementStep,
        counterparty: String,
    },

    /// The counterparty answered with an explicit refusal.
    #[error("CH_ERR_203: {counterparty} declined during {step}: {reason}")]
    CounterpartyDeclined {
        step: SettlementStep,
        counterparty: String,
        reason: String,
    },

    // =================================================================
    // Identity Errors (3xx)
    // =================================================================
    /// A party key could not be mapped to a well-known identity, or the
    /// parties disagree on the mapping.
    #[error("CH_ERR_300: Unresolved identity {key}: {reason}")]
    UnresolvedIdentity { key: PartyKey, reason: String },

    /// A confidential identity certificate failed verification.
    #[error("CH_ERR_301: Invalid identity certificate for {key}")]
    InvalidCertificate { key: PartyKey },

    // =================================================================
    // Merge Errors (4xx)
    // =================================================================
    /// This fragment has already been merged into the joint transaction.
    #[error("CH_ERR_400: Fragment already merged: {0}")]
    DuplicateFragment(TxId),

    /// Fragments were merged out of protocol order.
    #[error("CH_ERR_401: Fragment order violation: expected {expected}, got {actual}")]
    FragmentOrderViolation { expected: String, actual: String },

    // =================================================================
    // Signature Errors (5xx)
    // =================================================================
    /// A required signer's signature is absent or does not match the transaction.
    #[error("CH_ERR_500: Missing signature from {signer}: {reason}")]
    MissingSignature { signer: PartyKey, reason: String },

    // =================================================================
    // Commit Errors (6xx)
    // =================================================================
    /// The ordering authority refused to commit the transaction.
    #[error("CH_ERR_600: Commit rejected: {reason}")]
    CommitRejected { reason: String },

    /// The transaction breaks a contract rule.
    #[error("CH_ERR_601: Contract violation: {reason}")]
    ContractViolation { reason: String },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("CH_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("CH_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (zero timeouts, etc.).
    #[error("CH_ERR_902: Configuration error: {0}")]
    Configuration(String),

    /// I/O error.
    #[error("CH_ERR_903: I/O error: {0}")]
    Io(String),
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, ClearingError>;

impl From<std::io::Error> for ClearingError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ClearingError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
