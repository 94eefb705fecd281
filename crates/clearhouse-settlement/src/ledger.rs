//! In-memory reference ledger: vault plus ordering authority.
//!
//! Holds every unconsumed state, refuses double-spends through a
//! [`UniquenessGuard`], runs a [`TransactionVerifier`] over each
//! submission and countersigns what it commits. All checks and the
//! commit itself happen under one lock, so concurrent submissions are
//! totally ordered.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use chrono::Utc;
use clearhouse_types::{
    ClearingError, Command, CommandKind, CommittedTransaction, KeyPair, LedgerState, PartyKey,
    Result, SignedTransaction, StateAndRef, StateRef, TimeWindow, TransactionBuilder,
    TransactionState, TxId,
};
use parking_lot::Mutex;

use crate::{
    contract::{TransactionVerifier, TransferContract},
    submitter::{CommitOutcome, OrderingAuthority},
    uniqueness::UniquenessGuard,
    vault::LedgerVault,
};

#[derive(Default)]
struct LedgerTables {
    states: BTreeMap<StateRef, TransactionState>,
    guard: UniquenessGuard,
    transactions: HashMap<TxId, CommittedTransaction>,
}

pub struct InMemoryLedger {
    notary: KeyPair,
    verifier: Arc<dyn TransactionVerifier>,
    tables: Mutex<LedgerTables>,
    submissions: AtomicUsize,
}

fn rejected(reason: impl Into<String>) -> ClearingError {
    ClearingError::CommitRejected {
        reason: reason.into(),
    }
}

impl InMemoryLedger {
    /// Ledger enforcing [`TransferContract`].
    #[must_use]
    pub fn new(notary: KeyPair) -> Self {
        Self::with_verifier(notary, Arc::new(TransferContract))
    }

    #[must_use]
    pub fn with_verifier(notary: KeyPair, verifier: Arc<dyn TransactionVerifier>) -> Self {
        Self {
            notary,
            verifier,
            tables: Mutex::new(LedgerTables::default()),
            submissions: AtomicUsize::new(0),
        }
    }

    /// Commit a genesis transaction producing `states`, each governed by
    /// its paired contract id.
    ///
    /// # Errors
    /// Returns [`ClearingError::CommitRejected`] if the verifier refuses
    /// the issuance.
    pub fn issue(&self, states: Vec<(LedgerState, &str)>) -> Result<Vec<StateAndRef>> {
        let notary = self.notary.public_key();
        let mut builder = TransactionBuilder::new(notary);
        for (data, contract) in states {
            builder.add_output(data, contract);
        }
        builder
            .add_command(Command::new(CommandKind::Issue, vec![notary]))
            .set_time_window(TimeWindow::between(Utc::now(), chrono::Duration::seconds(1)));
        let committed = self.try_commit(builder.sign_initial(&self.notary))?;
        Ok(committed.tx.tx.out_refs())
    }

    /// Submissions received through [`OrderingAuthority::submit`], accepted or not.
    #[must_use]
    pub fn submission_count(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn transaction(&self, id: &TxId) -> Option<CommittedTransaction> {
        self.tables.lock().transactions.get(id).cloned()
    }

    #[must_use]
    pub fn is_consumed(&self, reference: &StateRef) -> bool {
        self.tables.lock().guard.is_consumed(reference)
    }

    fn try_commit(&self, stx: SignedTransaction) -> Result<CommittedTransaction> {
        let now = Utc::now();
        let id = stx.id();
        let mut tables = self.tables.lock();

        if tables.transactions.contains_key(&id) {
            return Err(rejected(format!("{id} already committed")));
        }
        if stx.tx.time_window.is_some_and(|w| !w.contains(now)) {
            return Err(rejected(format!("{id} is outside its time window")));
        }
        for input in &stx.tx.inputs {
            if let Some(previous) = tables.guard.consuming_tx(&input.reference) {
                return Err(rejected(format!(
                    "input {} already consumed by {previous}",
                    input.reference
                )));
            }
            match tables.states.get(&input.reference) {
                Some(recorded) if *recorded == input.state => {}
                Some(_) => {
                    return Err(rejected(format!(
                        "input {} does not match the ledger",
                        input.reference
                    )));
                }
                None => return Err(rejected(format!("unknown input {}", input.reference))),
            }
        }
        stx.verify_required(&[self.notary.public_key()])
            .map_err(|e| rejected(e.to_string()))?;
        self.verifier
            .verify(&stx.tx)
            .map_err(|e| rejected(e.to_string()))?;

        tables
            .guard
            .commit(stx.tx.inputs.iter().map(|i| &i.reference), id)?;
        for input in &stx.tx.inputs {
            tables.states.remove(&input.reference);
        }
        for output in stx.tx.out_refs() {
            tables.states.insert(output.reference, output.state);
        }

        let committed = CommittedTransaction {
            tx: stx.with_signature(self.notary.sign(&id)),
            committed_at: now,
        };
        tables.transactions.insert(id, committed.clone());
        Ok(committed)
    }
}

impl LedgerVault for InMemoryLedger {
    fn unconsumed_states(&self) -> Vec<StateAndRef> {
        self.tables
            .lock()
            .states
            .iter()
            .map(|(reference, state)| StateAndRef {
                state: state.clone(),
                reference: *reference,
            })
            .collect()
    }
}

#[async_trait]
impl OrderingAuthority for InMemoryLedger {
    fn notary(&self) -> PartyKey {
        self.notary.public_key()
    }

    async fn submit(&self, stx: SignedTransaction) -> CommitOutcome {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        let id = stx.id();
        match self.try_commit(stx) {
            Ok(committed) => {
                tracing::info!(tx = %id, "ledger committed transaction");
                CommitOutcome::Committed(committed)
            }
            Err(ClearingError::CommitRejected { reason }) => {
                tracing::warn!(tx = %id, %reason, "ledger rejected transaction");
                CommitOutcome::Rejected { reason }
            }
            Err(other) => CommitOutcome::Rejected {
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use clearhouse_types::{AbstractParty, CashHolding, constants};
    use rust_decimal::Decimal;

    use super::*;
    use crate::contract::AcceptAll;

    fn cash(amount: i64, owner: &KeyPair) -> LedgerState {
        LedgerState::Cash(CashHolding {
            amount: Decimal::new(amount, 0),
            currency: "USD".into(),
            owner: AbstractParty::anonymous(owner.public_key()),
        })
    }

    fn spend(ledger: &InMemoryLedger, input: &StateAndRef, from: &KeyPair, to: &KeyPair) -> SignedTransaction {
        let mut b = TransactionBuilder::new(ledger.notary());
        b.add_input_state(input.clone())
            .add_output(cash(10, to), constants::CASH_CONTRACT_ID)
            .add_command(Command::new(CommandKind::MoveCash, vec![from.public_key()]));
        b.sign_initial(from)
    }

    #[test]
    fn issued_states_are_unconsumed() {
        let ledger = InMemoryLedger::new(KeyPair::from_seed(&[9; 32]));
        let alice = KeyPair::from_seed(&[1; 32]);
        let issued = ledger
            .issue(vec![(cash(10, &alice), constants::CASH_CONTRACT_ID)])
            .unwrap();
        assert_eq!(issued.len(), 1);
        assert_eq!(ledger.unconsumed_states(), issued);
        assert_eq!(ledger.submission_count(), 0);
    }

    #[tokio::test]
    async fn spend_then_double_spend() {
        let ledger = InMemoryLedger::new(KeyPair::from_seed(&[9; 32]));
        let (alice, bob, carol) = (
            KeyPair::from_seed(&[1; 32]),
            KeyPair::from_seed(&[2; 32]),
            KeyPair::from_seed(&[3; 32]),
        );
        let coin = ledger
            .issue(vec![(cash(10, &alice), constants::CASH_CONTRACT_ID)])
            .unwrap()
            .remove(0);

        let first = spend(&ledger, &coin, &alice, &bob);
        let CommitOutcome::Committed(committed) = ledger.submit(first).await else {
            panic!("first spend must commit");
        };
        assert!(committed.tx.signed_by().contains(&ledger.notary()));
        assert!(ledger.is_consumed(&coin.reference));
        assert!(ledger.transaction(&committed.id()).is_some());

        let second = spend(&ledger, &coin, &alice, &carol);
        let outcome = ledger.submit(second).await;
        assert!(matches!(outcome, CommitOutcome::Rejected { ref reason } if reason.contains("already consumed")));
        assert_eq!(ledger.submission_count(), 2);
    }

    #[tokio::test]
    async fn unsigned_spend_rejected() {
        let ledger = InMemoryLedger::new(KeyPair::from_seed(&[9; 32]));
        let (alice, bob) = (KeyPair::from_seed(&[1; 32]), KeyPair::from_seed(&[2; 32]));
        let coin = ledger
            .issue(vec![(cash(10, &alice), constants::CASH_CONTRACT_ID)])
            .unwrap()
            .remove(0);
        let forged = spend(&ledger, &coin, &alice, &bob);
        let forged = SignedTransaction::new(forged.tx, vec![bob.sign(&TxId([0; 32]))]);
        let outcome = ledger.submit(forged).await;
        assert!(matches!(outcome, CommitOutcome::Rejected { ref reason } if reason.contains("CH_ERR_500")));
        assert!(!ledger.is_consumed(&coin.reference));
    }

    #[tokio::test]
    async fn contract_violation_rejected() {
        let ledger = InMemoryLedger::new(KeyPair::from_seed(&[9; 32]));
        let alice = KeyPair::from_seed(&[1; 32]);
        let coin = ledger
            .issue(vec![(cash(10, &alice), constants::CASH_CONTRACT_ID)])
            .unwrap()
            .remove(0);
        let mut b = TransactionBuilder::new(ledger.notary());
        b.add_input_state(coin)
            .add_output(cash(11, &alice), constants::CASH_CONTRACT_ID)
            .add_command(Command::new(CommandKind::MoveCash, vec![alice.public_key()]));
        let outcome = ledger.submit(b.sign_initial(&alice)).await;
        assert!(matches!(outcome, CommitOutcome::Rejected { ref reason } if reason.contains("CH_ERR_601")));
    }

    #[tokio::test]
    async fn expired_window_rejected() {
        let ledger = InMemoryLedger::with_verifier(KeyPair::from_seed(&[9; 32]), Arc::new(AcceptAll));
        let alice = KeyPair::from_seed(&[1; 32]);
        let mut b = TransactionBuilder::new(ledger.notary());
        b.set_time_window(TimeWindow::between(
            Utc::now() - chrono::Duration::seconds(120),
            chrono::Duration::seconds(60),
        ));
        let outcome = ledger.submit(b.sign_initial(&alice)).await;
        assert!(matches!(outcome, CommitOutcome::Rejected { ref reason } if reason.contains("time window")));
    }

    #[tokio::test]
    async fn unknown_input_rejected() {
        let ledger = InMemoryLedger::with_verifier(KeyPair::from_seed(&[9; 32]), Arc::new(AcceptAll));
        let alice = KeyPair::from_seed(&[1; 32]);
        let phantom = StateAndRef {
            state: TransactionState::new(cash(5, &alice), constants::CASH_CONTRACT_ID, ledger.notary()),
            reference: StateRef::new(TxId([4; 32]), 0),
        };
        let tx = spend(&ledger, &phantom, &alice, &alice);
        let outcome = ledger.submit(tx).await;
        assert!(matches!(outcome, CommitOutcome::Rejected { ref reason } if reason.contains("unknown input")));
    }
}
