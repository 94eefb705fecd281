//! Ledger transaction model: states, commands, the joint transaction
//! builder, and its signed, unverified and committed forms.
//!
//! ## Lifecycle
//!
//! ```text
//! TransactionBuilder ──to_wire()──▶ WireTransaction ──sign──▶ SignedTransaction
//!   (mutable, one per                (immutable, id =          │
//!    settlement attempt)              SHA-256 of canonical     ▼ authority
//!                                     encoding)           CommittedTransaction
//! ```
//!
//! A counterparty's contribution arrives as an [`UnverifiedFragment`]: a
//! signed transaction whose components are only meaningful once merged
//! into the joint transaction and verified as a whole.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    AbstractParty, Asset, ClearingError, KeyPair, PartyKey, Result, StateRef, TransactionSignature,
    TransferRecord, TxId,
};

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Ownership of one security position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetHolding {
    pub asset: Asset,
    pub owner: AbstractParty,
}

/// Ownership of an amount of cash in one currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashHolding {
    pub amount: Decimal,
    pub currency: String,
    pub owner: AbstractParty,
}

/// Any state that can live on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerState {
    Transfer(TransferRecord),
    Asset(AssetHolding),
    Cash(CashHolding),
}

impl LedgerState {
    /// Every party this state refers to.
    #[must_use]
    pub fn parties(&self) -> Vec<&AbstractParty> {
        match self {
            Self::Transfer(record) => {
                let mut parties = vec![&record.seller, &record.buyer];
                parties.extend(record.clearing_house.as_ref());
                parties
            }
            Self::Asset(holding) => vec![&holding.owner],
            Self::Cash(holding) => vec![&holding.owner],
        }
    }

    #[must_use]
    pub fn as_transfer(&self) -> Option<&TransferRecord> {
        match self {
            Self::Transfer(record) => Some(record),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_asset(&self) -> Option<&AssetHolding> {
        match self {
            Self::Asset(holding) => Some(holding),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_cash(&self) -> Option<&CashHolding> {
        match self {
            Self::Cash(holding) => Some(holding),
            _ => None,
        }
    }
}

/// A state together with the contract that governs it and its notary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionState {
    pub data: LedgerState,
    pub contract: String,
    pub notary: PartyKey,
}

impl TransactionState {
    #[must_use]
    pub fn new(data: LedgerState, contract: impl Into<String>, notary: PartyKey) -> Self {
        Self {
            data,
            contract: contract.into(),
            notary,
        }
    }
}

/// A state plus its ledger position. Consuming a state means listing its
/// `StateAndRef` as a transaction input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateAndRef {
    pub state: TransactionState,
    pub reference: StateRef,
}

// ---------------------------------------------------------------------------
// Commands and time window
// ---------------------------------------------------------------------------

/// The operation a command asks the contracts to authorise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    /// Genesis issuance of states (no inputs).
    Issue,
    /// Seller creates a PENDING_CONFIRMATION transfer record.
    CreateRequest,
    /// Clearing house moves a transfer record to TRANSFERRED.
    SettleRequest,
    /// Move ownership of a security position.
    MoveAsset,
    /// Move ownership of cash.
    MoveCash,
}

impl CommandKind {
    fn tag(self) -> u8 {
        match self {
            Self::Issue => 0,
            Self::CreateRequest => 1,
            Self::SettleRequest => 2,
            Self::MoveAsset => 3,
            Self::MoveCash => 4,
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Issue => write!(f, "ISSUE"),
            Self::CreateRequest => write!(f, "CREATE_REQUEST"),
            Self::SettleRequest => write!(f, "SETTLE_REQUEST"),
            Self::MoveAsset => write!(f, "MOVE_ASSET"),
            Self::MoveCash => write!(f, "MOVE_CASH"),
        }
    }
}

/// An intended operation and the keys that must sign for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub kind: CommandKind,
    pub signers: Vec<PartyKey>,
}

impl Command {
    #[must_use]
    pub fn new(kind: CommandKind, signers: Vec<PartyKey>) -> Self {
        Self { kind, signers }
    }
}

/// Validity window: the authority only orders the transaction while
/// `from <= now < until`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub from: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl TimeWindow {
    /// Window opening at `from` and lasting `duration`.
    #[must_use]
    pub fn between(from: DateTime<Utc>, duration: chrono::Duration) -> Self {
        Self {
            from,
            until: from + duration,
        }
    }

    #[must_use]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.from <= instant && instant < self.until
    }
}

// ---------------------------------------------------------------------------
// Canonical encoding
// ---------------------------------------------------------------------------

/// Domain-separated, order-preserving hashing used to derive [`TxId`]s.
trait Canonical {
    fn hash_into(&self, hasher: &mut Sha256);
}

fn hash_str(hasher: &mut Sha256, s: &str) {
    hasher.update((s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

fn hash_time(hasher: &mut Sha256, t: &DateTime<Utc>) {
    hasher.update(t.timestamp().to_le_bytes());
    hasher.update(t.timestamp_subsec_nanos().to_le_bytes());
}

impl Canonical for AbstractParty {
    fn hash_into(&self, hasher: &mut Sha256) {
        match self {
            Self::WellKnown(party) => {
                hasher.update([0u8]);
                hash_str(hasher, &party.name);
                hasher.update(party.key.as_bytes());
            }
            Self::Anonymous(anon) => {
                hasher.update([1u8]);
                hasher.update(anon.key.as_bytes());
            }
        }
    }
}

impl Canonical for Asset {
    fn hash_into(&self, hasher: &mut Sha256) {
        hash_str(hasher, &self.cusip);
        hash_str(hasher, &self.name);
        hash_str(hasher, &self.purchase_cost.to_string());
        hash_str(hasher, &self.currency);
    }
}

impl Canonical for LedgerState {
    fn hash_into(&self, hasher: &mut Sha256) {
        match self {
            Self::Transfer(record) => {
                hasher.update([0u8]);
                hasher.update(record.id.0.as_bytes());
                record.asset.hash_into(hasher);
                record.seller.hash_into(hasher);
                record.buyer.hash_into(hasher);
                match &record.clearing_house {
                    Some(ch) => {
                        hasher.update([1u8]);
                        ch.hash_into(hasher);
                    }
                    None => hasher.update([0u8]),
                }
                hash_str(hasher, &record.status.to_string());
            }
            Self::Asset(holding) => {
                hasher.update([1u8]);
                holding.asset.hash_into(hasher);
                holding.owner.hash_into(hasher);
            }
            Self::Cash(holding) => {
                hasher.update([2u8]);
                hash_str(hasher, &holding.amount.to_string());
                hash_str(hasher, &holding.currency);
                holding.owner.hash_into(hasher);
            }
        }
    }
}

impl Canonical for TransactionState {
    fn hash_into(&self, hasher: &mut Sha256) {
        self.data.hash_into(hasher);
        hash_str(hasher, &self.contract);
        hasher.update(self.notary.as_bytes());
    }
}

// ---------------------------------------------------------------------------
// TransactionBuilder: the joint transaction in construction
// ---------------------------------------------------------------------------

/// Mutable, accumulating joint transaction scoped to one settlement attempt.
///
/// Inputs, outputs and commands keep insertion order; that order is part
/// of the transaction id and therefore of every signature.
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    notary: PartyKey,
    inputs: Vec<StateAndRef>,
    outputs: Vec<TransactionState>,
    commands: Vec<Command>,
    time_window: Option<TimeWindow>,
}

impl TransactionBuilder {
    #[must_use]
    pub fn new(notary: PartyKey) -> Self {
        Self {
            notary,
            inputs: Vec::new(),
            outputs: Vec::new(),
            commands: Vec::new(),
            time_window: None,
        }
    }

    pub fn add_input_state(&mut self, input: StateAndRef) -> &mut Self {
        self.inputs.push(input);
        self
    }

    pub fn add_output_state(&mut self, output: TransactionState) -> &mut Self {
        self.outputs.push(output);
        self
    }

    /// Add an output governed by `contract`, notarised by this builder's notary.
    pub fn add_output(&mut self, data: LedgerState, contract: &str) -> &mut Self {
        let state = TransactionState::new(data, contract, self.notary);
        self.add_output_state(state)
    }

    pub fn add_command(&mut self, command: Command) -> &mut Self {
        self.commands.push(command);
        self
    }

    pub fn set_time_window(&mut self, window: TimeWindow) -> &mut Self {
        self.time_window = Some(window);
        self
    }

    #[must_use]
    pub fn notary(&self) -> PartyKey {
        self.notary
    }

    #[must_use]
    pub fn inputs(&self) -> &[StateAndRef] {
        &self.inputs
    }

    #[must_use]
    pub fn outputs(&self) -> &[TransactionState] {
        &self.outputs
    }

    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    #[must_use]
    pub fn contains_input(&self, reference: &StateRef) -> bool {
        self.inputs.iter().any(|i| i.reference == *reference)
    }

    /// Freeze the current contents into an immutable wire transaction.
    #[must_use]
    pub fn to_wire(&self) -> WireTransaction {
        WireTransaction {
            notary: self.notary,
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
            commands: self.commands.clone(),
            time_window: self.time_window,
        }
    }

    /// Freeze and sign with `keys`. The result carries exactly one signature.
    #[must_use]
    pub fn sign_initial(&self, keys: &KeyPair) -> SignedTransaction {
        let tx = self.to_wire();
        let signature = keys.sign(&tx.id());
        SignedTransaction::new(tx, vec![signature])
    }
}

// ---------------------------------------------------------------------------
// WireTransaction
// ---------------------------------------------------------------------------

/// Immutable transaction contents. Its [`TxId`] commits to every field in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireTransaction {
    pub notary: PartyKey,
    pub inputs: Vec<StateAndRef>,
    pub outputs: Vec<TransactionState>,
    pub commands: Vec<Command>,
    pub time_window: Option<TimeWindow>,
}

impl WireTransaction {
    /// SHA-256 over the canonical encoding.
    ///
    /// Format: `"clearhouse:tx:v1:" || notary || inputs || outputs || commands || window`,
    /// each list length-prefixed.
    #[must_use]
    pub fn id(&self) -> TxId {
        let mut hasher = Sha256::new();
        hasher.update(b"clearhouse:tx:v1:");
        hasher.update(self.notary.as_bytes());

        hasher.update((self.inputs.len() as u64).to_le_bytes());
        for input in &self.inputs {
            hasher.update(input.reference.tx_id.as_bytes());
            hasher.update(input.reference.index.to_le_bytes());
            input.state.hash_into(&mut hasher);
        }

        hasher.update((self.outputs.len() as u64).to_le_bytes());
        for output in &self.outputs {
            output.hash_into(&mut hasher);
        }

        hasher.update((self.commands.len() as u64).to_le_bytes());
        for command in &self.commands {
            hasher.update([command.kind.tag()]);
            hasher.update((command.signers.len() as u64).to_le_bytes());
            for signer in &command.signers {
                hasher.update(signer.as_bytes());
            }
        }

        match &self.time_window {
            Some(window) => {
                hasher.update([1u8]);
                hash_time(&mut hasher, &window.from);
                hash_time(&mut hasher, &window.until);
            }
            None => hasher.update([0u8]),
        }

        TxId(hasher.finalize().into())
    }

    /// Union of all command signers, in first-seen order.
    #[must_use]
    pub fn required_signers(&self) -> Vec<PartyKey> {
        let mut seen = BTreeSet::new();
        self.commands
            .iter()
            .flat_map(|c| c.signers.iter().copied())
            .filter(|k| seen.insert(*k))
            .collect()
    }

    /// Every party key referenced by the transaction: input and output
    /// state parties plus command signers.
    #[must_use]
    pub fn referenced_keys(&self) -> BTreeSet<PartyKey> {
        let states = self
            .inputs
            .iter()
            .map(|i| &i.state)
            .chain(self.outputs.iter());
        let mut keys: BTreeSet<PartyKey> = states
            .flat_map(|s| s.data.parties())
            .map(AbstractParty::owning_key)
            .collect();
        keys.extend(self.commands.iter().flat_map(|c| c.signers.iter().copied()));
        keys
    }

    /// Output `index` as a consumable `StateAndRef`.
    #[must_use]
    pub fn out_ref(&self, index: usize) -> Option<StateAndRef> {
        let state = self.outputs.get(index)?.clone();
        let index = u32::try_from(index).ok()?;
        Some(StateAndRef {
            state,
            reference: StateRef::new(self.id(), index),
        })
    }

    /// All outputs as consumable `StateAndRef`s.
    #[must_use]
    pub fn out_refs(&self) -> Vec<StateAndRef> {
        let id = self.id();
        self.outputs
            .iter()
            .zip(0u32..)
            .map(|(state, index)| StateAndRef {
                state: state.clone(),
                reference: StateRef::new(id, index),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// SignedTransaction
// ---------------------------------------------------------------------------

/// A wire transaction plus the signatures gathered so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub tx: WireTransaction,
    pub signatures: Vec<TransactionSignature>,
}

impl SignedTransaction {
    #[must_use]
    pub fn new(tx: WireTransaction, signatures: Vec<TransactionSignature>) -> Self {
        Self { tx, signatures }
    }

    #[must_use]
    pub fn id(&self) -> TxId {
        self.tx.id()
    }

    #[must_use]
    pub fn required_signers(&self) -> Vec<PartyKey> {
        self.tx.required_signers()
    }

    /// Keys that have attached a signature (valid or not).
    #[must_use]
    pub fn signed_by(&self) -> BTreeSet<PartyKey> {
        self.signatures.iter().map(|s| s.by).collect()
    }

    /// Attach `signature`, replacing any earlier signature by the same key.
    #[must_use]
    pub fn with_signature(mut self, signature: TransactionSignature) -> Self {
        self.signatures.retain(|s| s.by != signature.by);
        self.signatures.push(signature);
        self
    }

    /// Required signers without a signature, ignoring keys in `except`.
    #[must_use]
    pub fn missing_signers(&self, except: &[PartyKey]) -> Vec<PartyKey> {
        let present = self.signed_by();
        self.required_signers()
            .into_iter()
            .filter(|k| !present.contains(k) && !except.contains(k))
            .collect()
    }

    /// Check that every attached signature verifies against this transaction's id.
    ///
    /// # Errors
    /// Returns [`ClearingError::MissingSignature`] naming the first signer
    /// whose signature does not match.
    pub fn verify_signatures(&self) -> Result<()> {
        let id = self.id();
        match self.signatures.iter().find(|s| !s.verifies(&id)) {
            Some(bad) => Err(ClearingError::MissingSignature {
                signer: bad.by,
                reason: format!("signature does not match {id}"),
            }),
            None => Ok(()),
        }
    }

    /// Verify attached signatures and that every required signer (other
    /// than those in `except`) has signed.
    ///
    /// # Errors
    /// Returns [`ClearingError::MissingSignature`] for the first problem found.
    pub fn verify_required(&self, except: &[PartyKey]) -> Result<()> {
        self.verify_signatures()?;
        match self.missing_signers(except).first() {
            Some(signer) => Err(ClearingError::MissingSignature {
                signer: *signer,
                reason: "required signer has not signed".to_string(),
            }),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// UnverifiedFragment: a counterparty's sub-transaction
// ---------------------------------------------------------------------------

/// A sub-transaction received from a counterparty.
///
/// Deliberately exposes no validity check: a fragment is only meaningful
/// inside the merged transaction, which the verification collaborator
/// checks as a whole at commit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnverifiedFragment {
    inner: SignedTransaction,
}

impl UnverifiedFragment {
    #[must_use]
    pub fn new(inner: SignedTransaction) -> Self {
        Self { inner }
    }

    #[must_use]
    pub fn id(&self) -> TxId {
        self.inner.id()
    }

    #[must_use]
    pub fn inputs(&self) -> &[StateAndRef] {
        &self.inner.tx.inputs
    }

    #[must_use]
    pub fn outputs(&self) -> &[TransactionState] {
        &self.inner.tx.outputs
    }

    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.inner.tx.commands
    }
}

// ---------------------------------------------------------------------------
// CommittedTransaction
// ---------------------------------------------------------------------------

/// A transaction the ordering authority has durably committed, carrying
/// the authority's own signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedTransaction {
    pub tx: SignedTransaction,
    pub committed_at: DateTime<Utc>,
}

impl CommittedTransaction {
    #[must_use]
    pub fn id(&self) -> TxId {
        self.tx.id()
    }

    /// Transfer records produced by this transaction.
    #[must_use]
    pub fn transfer_outputs(&self) -> Vec<&TransferRecord> {
        self.tx
            .tx
            .outputs
            .iter()
            .filter_map(|o| o.data.as_transfer())
            .collect()
    }

    /// Transfer records consumed by this transaction.
    #[must_use]
    pub fn transfer_inputs(&self) -> Vec<&TransferRecord> {
        self.tx
            .tx
            .inputs
            .iter()
            .filter_map(|i| i.state.data.as_transfer())
            .collect()
    }
}
