//! # clearhouse-settlement
//!
//! **Settlement plane**: a clearing house settles a transfer record by
//! assembling one joint transaction in which the seller's security moves
//! to the buyer, the buyer's cash moves to the seller, and the record
//! moves to TRANSFERRED. Either all of it commits or none of it does.
//!
//! ## Architecture
//!
//! [`ClearingHouse::settle_transfer`] runs the state machine:
//! 1. Loads the record and derives its settled successor
//! 2. Fetches the asset and cash legs from both counterparties in parallel
//!    ([`SubTransactionFetcher`])
//! 3. Merges the legs in protocol order ([`TransactionMerger`])
//! 4. Reconciles confidential identities ([`IdentitySynchronizer`])
//! 5. Collects every required signature ([`SignatureCollector`])
//! 6. Submits to the ordering authority ([`CommitSubmitter`])
//!
//! ## Ports
//!
//! - [`SessionTransport`] / [`CounterpartySession`]: point-to-point sessions
//! - [`OrderingAuthority`]: uniqueness and ordering
//! - [`LedgerVault`]: unconsumed states
//! - [`TransactionVerifier`]: contract rules, run by the authority
//!
//! [`ChannelTransport`], [`InMemoryLedger`] and [`SettlementResponder`]
//! implement the other side of each port in-process.

pub mod channel;
pub mod collector;
pub mod contract;
pub mod fetcher;
pub mod identity;
pub mod ledger;
pub mod merger;
pub mod observer;
pub mod orchestrator;
pub mod responder;
pub mod session;
pub mod submitter;
pub mod uniqueness;
pub mod vault;

pub use channel::{ChannelSession, ChannelTransport, Responder};
pub use collector::SignatureCollector;
pub use contract::{AcceptAll, TransactionVerifier, TransferContract};
pub use fetcher::SubTransactionFetcher;
pub use identity::{IdentityMapping, IdentityService, IdentitySynchronizer};
pub use ledger::InMemoryLedger;
pub use merger::{FragmentSlot, MergeSummary, TransactionMerger};
pub use observer::{ProgressEvent, ProgressObserver, RecordingObserver, TracingObserver};
pub use orchestrator::ClearingHouse;
pub use responder::{CounterpartyNode, Leg, SettlementResponder};
pub use session::{BoxedSession, CounterpartySession, SessionMessage, SessionTransport};
pub use submitter::{CommitOutcome, CommitSubmitter, OrderingAuthority};
pub use uniqueness::UniquenessGuard;
pub use vault::LedgerVault;
