//! # clearhouse-types
//!
//! Shared types, errors, and configuration for the **Clearhouse** settlement
//! protocol.
//!
//! This crate is the leaf dependency of the workspace; every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`RecordId`], [`PartyKey`], [`TxId`], [`StateRef`]
//! - **Parties**: [`Party`], [`AnonymousParty`], [`AbstractParty`], [`Endpoint`], [`IdentityCertificate`]
//! - **Keys**: [`KeyPair`], [`TransactionSignature`]
//! - **Transfer model**: [`TransferRecord`], [`TransferStatus`], [`Asset`]
//! - **Transaction model**: [`TransactionBuilder`], [`WireTransaction`], [`SignedTransaction`],
//!   [`UnverifiedFragment`], [`CommittedTransaction`]
//! - **Settlement steps**: [`SettlementStep`]
//! - **Configuration**: [`SettlementConfig`]
//! - **Errors**: [`ClearingError`] with `CH_ERR_` prefix codes
//! - **Constants**: defaults and contract identifiers

pub mod config;
pub mod constants;
pub mod error;
pub mod ids;
pub mod keys;
pub mod party;
pub mod step;
pub mod transaction;
pub mod transfer;

// Re-export all primary types at crate root for ergonomic imports:
//   use clearhouse_types::{TransferRecord, SignedTransaction, ClearingError, ...};

pub use config::*;
pub use error::*;
pub use ids::*;
pub use keys::*;
pub use party::*;
pub use step::*;
pub use transaction::*;
pub use transfer::*;

// Constants are accessed via `clearhouse_types::constants::FOO`
// (not re-exported to avoid name collisions).
