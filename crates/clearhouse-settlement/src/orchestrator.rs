//! # Settlement orchestrator
//!
//! Drives one transfer record through the full delivery-versus-payment
//! exchange:
//!
//! ```text
//! INITIALIZING ─▶ BUILDING ─▶ FETCHING_FRAGMENTS ─▶ MERGING
//!   load record     draft +      seller ∥ buyer        seller leg,
//!   derive          provisional  (both must finish)    then buyer leg
//!   successor       signature
//!
//! ─▶ SYNCHRONIZING_IDENTITIES ─▶ SIGNING ─▶ COLLECTING ─▶ COMMITTING
//!      agree on key owners        re-sign     counterparty   ordering
//!                                 merged tx   signatures     authority
//! ```
//!
//! Every step is a barrier. Any error aborts the run at the current step:
//! sessions are dropped, nothing is submitted, and the record stays
//! unconsumed so the settlement can be retried.

use std::sync::Arc;

use chrono::Utc;
use clearhouse_types::{
    AbstractParty, ClearingError, Command, CommandKind, CommittedTransaction, Endpoint, KeyPair,
    LedgerState, Party, RecordId, Result, SettlementConfig, SettlementStep, SignedTransaction,
    TimeWindow, TransactionBuilder, UnverifiedFragment, constants,
};

use crate::{
    collector::SignatureCollector,
    fetcher::SubTransactionFetcher,
    identity::{IdentityService, IdentitySynchronizer},
    merger::{FragmentSlot, TransactionMerger},
    observer::{ProgressObserver, TracingObserver},
    session::{BoxedSession, SessionMessage, SessionTransport, send_message},
    submitter::{CommitSubmitter, OrderingAuthority},
    vault::LedgerVault,
};

/// State machine for a single settlement attempt.
struct SettlementRun<'a> {
    record: RecordId,
    state: SettlementStep,
    observer: &'a dyn ProgressObserver,
}

impl<'a> SettlementRun<'a> {
    fn start(record: RecordId, observer: &'a dyn ProgressObserver) -> Self {
        observer.on_transition(record, None, SettlementStep::Initializing);
        Self {
            record,
            state: SettlementStep::Initializing,
            observer,
        }
    }

    /// Move to `to`, which must be the step directly after the current one.
    fn transition(&mut self, to: SettlementStep) -> Result<()> {
        if self.state.next() != Some(to) {
            return Err(ClearingError::Internal(format!(
                "illegal step change {} -> {to}",
                self.state
            )));
        }
        let from = self.state;
        self.state = to;
        self.observer.on_transition(self.record, Some(from), to);
        Ok(())
    }
}

/// A clearing house node able to settle transfer records it is not party to.
pub struct ClearingHouse {
    party: Party,
    keys: KeyPair,
    identities: Arc<IdentityService>,
    vault: Arc<dyn LedgerVault>,
    authority: Arc<dyn OrderingAuthority>,
    transport: Arc<dyn SessionTransport>,
    config: SettlementConfig,
    observer: Arc<dyn ProgressObserver>,
}

impl ClearingHouse {
    /// # Errors
    /// Returns [`ClearingError::Configuration`] if `config` is invalid.
    pub fn new(
        party: Party,
        keys: KeyPair,
        identities: Arc<IdentityService>,
        vault: Arc<dyn LedgerVault>,
        authority: Arc<dyn OrderingAuthority>,
        transport: Arc<dyn SessionTransport>,
        config: SettlementConfig,
    ) -> Result<Self> {
        config.validate()?;
        if party.key != keys.public_key() {
            return Err(ClearingError::Configuration(format!(
                "{party} does not own the supplied key pair"
            )));
        }
        Ok(Self {
            party,
            keys,
            identities,
            vault,
            authority,
            transport,
            config,
            observer: Arc::new(TracingObserver),
        })
    }

    /// Replace the default [`TracingObserver`].
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    #[must_use]
    pub fn party(&self) -> &Party {
        &self.party
    }

    #[must_use]
    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    /// Settle transfer record `record_id`: exchange the seller's asset for
    /// the buyer's cash and mark the record TRANSFERRED, atomically.
    ///
    /// # Errors
    /// - `NotFound` if the record has no unconsumed version
    /// - `InvalidParty` if this clearing house is the buyer or seller
    /// - `UnresolvedIdentity` if a party cannot be resolved or reached, or
    ///   the counterparties disagree on who owns a key
    /// - `SessionTimeout`, `MalformedReply`, `SessionClosed` on a failed exchange
    /// - `CounterpartyDeclined` if a counterparty refuses its leg or signature
    /// - `MissingSignature` if a required signature is absent or invalid
    /// - `CommitRejected` if the ordering authority refuses the transaction
    pub async fn settle_transfer(&self, record_id: RecordId) -> Result<CommittedTransaction> {
        tracing::info!(record = %record_id, clearing_house = %self.party, "settlement started");
        let mut run = SettlementRun::start(record_id, self.observer.as_ref());
        match self.drive(&mut run).await {
            Ok(committed) => {
                self.observer.on_committed(record_id, &committed);
                tracing::info!(record = %record_id, tx = %committed.id(), "settlement complete");
                Ok(committed)
            }
            Err(error) => {
                self.observer.on_abort(record_id, run.state, &error);
                tracing::warn!(record = %record_id, step = %run.state, %error, "settlement aborted");
                Err(error)
            }
        }
    }

    async fn drive(&self, run: &mut SettlementRun<'_>) -> Result<CommittedTransaction> {
        // INITIALIZING
        let current = self.vault.load_transfer(run.record)?;
        let record = current
            .state
            .data
            .as_transfer()
            .ok_or(ClearingError::NotFound(run.record))?
            .clone();
        for (role, party) in [("seller", &record.seller), ("buyer", &record.buyer)] {
            if self.is_us(party) {
                return Err(ClearingError::InvalidParty {
                    reason: format!("clearing house {} is the {role} of {}", self.party, record.id),
                });
            }
        }
        let successor = record.settled_by(AbstractParty::from(self.party.clone()))?;

        // BUILDING
        run.transition(SettlementStep::Building)?;
        let mut builder = TransactionBuilder::new(self.authority.notary());
        builder
            .add_input_state(current)
            .add_output(LedgerState::Transfer(successor), constants::TRANSFER_CONTRACT_ID)
            .add_command(Command::new(
                CommandKind::SettleRequest,
                vec![
                    record.buyer.owning_key(),
                    record.seller.owning_key(),
                    self.party.key,
                ],
            ))
            .set_time_window(TimeWindow::between(
                Utc::now(),
                self.config.time_window_chrono()?,
            ));
        let provisional = builder.sign_initial(&self.keys);

        // FETCHING_FRAGMENTS
        run.transition(SettlementStep::FetchingFragments)?;
        let seller = self.identities.resolve(&record.seller)?;
        let buyer = self.identities.resolve(&record.buyer)?;
        let fetcher = SubTransactionFetcher::new(self.config.session_timeout);
        let (seller_leg, buyer_leg) = tokio::join!(
            self.open_and_fetch(&seller, &fetcher, &provisional),
            self.open_and_fetch(&buyer, &fetcher, &provisional),
        );
        let (seller_session, seller_fragment) = seller_leg?;
        let (buyer_session, buyer_fragment) = buyer_leg?;

        // MERGING
        run.transition(SettlementStep::Merging)?;
        let mut merger = TransactionMerger::new();
        merger.merge(&mut builder, &seller_fragment, FragmentSlot::Seller)?;
        merger.merge(&mut builder, &buyer_fragment, FragmentSlot::Buyer)?;
        let mut sessions = vec![seller_session, buyer_session];

        // SYNCHRONIZING_IDENTITIES
        run.transition(SettlementStep::SynchronizingIdentities)?;
        IdentitySynchronizer::new(self.config.session_timeout)
            .synchronize(&self.identities, &builder.to_wire(), &mut sessions)
            .await?;

        // SIGNING
        run.transition(SettlementStep::Signing)?;
        let merged = builder.sign_initial(&self.keys);

        // COLLECTING
        run.transition(SettlementStep::Collecting)?;
        let signed = SignatureCollector::new(
            self.config.session_timeout,
            self.config.parallel_signature_collection,
        )
        .collect(merged, &mut sessions, &self.identities, &[self.authority.notary()])
        .await?;

        // COMMITTING
        run.transition(SettlementStep::Committing)?;
        let committed = CommitSubmitter::new(self.config.commit_timeout)
            .submit(self.authority.as_ref(), signed)
            .await?;
        self.broadcast(&committed, &mut sessions).await;
        Ok(committed)
    }

    async fn open_and_fetch(
        &self,
        endpoint: &Endpoint,
        fetcher: &SubTransactionFetcher,
        provisional: &SignedTransaction,
    ) -> Result<(BoxedSession, UnverifiedFragment)> {
        let mut session = self.transport.open(endpoint).await?;
        let fragment = fetcher.fetch(session.as_mut(), provisional).await?;
        Ok((session, fragment))
    }

    /// Let both counterparties record the committed transaction. The commit
    /// already happened, so failures here are only logged.
    async fn broadcast(&self, committed: &CommittedTransaction, sessions: &mut [BoxedSession]) {
        let message = SessionMessage::Finalised(committed.clone());
        for session in sessions.iter_mut() {
            if let Err(error) = send_message(&mut **session, SettlementStep::Committing, &message).await {
                tracing::warn!(
                    counterparty = %session.counterparty(),
                    tx = %committed.id(),
                    %error,
                    "could not deliver committed transaction"
                );
            }
        }
    }

    /// Is `party` this clearing house, under its well-known or a confidential key?
    fn is_us(&self, party: &AbstractParty) -> bool {
        let key = party.owning_key();
        key == self.party.key
            || self
                .identities
                .well_known_for(&key)
                .is_some_and(|owner| owner.key == self.party.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::RecordingObserver;

    #[test]
    fn run_walks_steps_in_order() {
        let observer = RecordingObserver::new();
        let record = RecordId::new();
        let mut run = SettlementRun::start(record, &observer);
        for step in &SettlementStep::ORDER[1..] {
            run.transition(*step).unwrap();
        }
        assert_eq!(observer.steps(record), SettlementStep::ORDER.to_vec());
    }

    #[test]
    fn run_refuses_skipping_a_step() {
        let observer = RecordingObserver::new();
        let mut run = SettlementRun::start(RecordId::new(), &observer);
        let err = run.transition(SettlementStep::Merging).unwrap_err();
        assert!(matches!(err, ClearingError::Internal(_)));
        assert_eq!(run.state, SettlementStep::Initializing);
    }

    #[test]
    fn run_refuses_going_back() {
        let observer = RecordingObserver::new();
        let mut run = SettlementRun::start(RecordId::new(), &observer);
        run.transition(SettlementStep::Building).unwrap();
        assert!(run.transition(SettlementStep::Initializing).is_err());
    }
}
