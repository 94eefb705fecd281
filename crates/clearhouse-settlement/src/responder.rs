//! Counterparty side of settlement: the seller's asset leg and the buyer's
//! cash leg.
//!
//! A [`SettlementResponder`] answers one session opened by a clearing
//! house. It reads the record terms from the proposal, builds and signs its
//! own leg from states in its vault, joins identity synchronization, and
//! signs the merged transaction only if its leg is still in it, no other
//! holding of its own is spent, and the record moves to TRANSFERRED.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use clearhouse_types::{
    AbstractParty, AnonymousParty, AssetHolding, CashHolding, ClearingError, Command, CommandKind,
    CommittedTransaction, IdentityCertificate, KeyPair, LedgerState, Party, PartyKey, Result,
    SettlementStep, SignedTransaction, StateAndRef, TransactionBuilder, TransactionSignature,
    TransferRecord, TransferStatus, TxId, constants,
};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;

use crate::{
    channel::Responder,
    identity::IdentityService,
    session::{BoxedSession, SessionMessage, send_message},
    vault::LedgerVault,
};

/// A seller or buyer node: its keys, identity store and vault.
pub struct CounterpartyNode {
    party: Party,
    keys: KeyPair,
    confidential: RwLock<HashMap<PartyKey, KeyPair>>,
    identities: Arc<IdentityService>,
    vault: Arc<dyn LedgerVault>,
    finalised: Mutex<Vec<CommittedTransaction>>,
}

impl CounterpartyNode {
    #[must_use]
    pub fn new(
        party: Party,
        keys: KeyPair,
        identities: Arc<IdentityService>,
        vault: Arc<dyn LedgerVault>,
    ) -> Self {
        Self {
            party,
            keys,
            confidential: RwLock::new(HashMap::new()),
            identities,
            vault,
            finalised: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn party(&self) -> &Party {
        &self.party
    }

    #[must_use]
    pub fn identities(&self) -> &Arc<IdentityService> {
        &self.identities
    }

    /// Mint a confidential key, vouch for it, and remember the certificate.
    #[must_use]
    pub fn fresh_confidential_identity(&self) -> (AnonymousParty, IdentityCertificate) {
        let anonymous = KeyPair::generate();
        let key = anonymous.public_key();
        let certificate = IdentityCertificate::issue(&self.party, &self.keys, key);
        self.confidential.write().insert(key, anonymous);
        if let Err(error) = self.identities.register_confidential(certificate.clone()) {
            tracing::warn!(party = %self.party, %error, "own certificate refused");
        }
        (AnonymousParty { key }, certificate)
    }

    /// Does this node hold the private half of `key`?
    #[must_use]
    pub fn owns(&self, key: &PartyKey) -> bool {
        *key == self.party.key || self.confidential.read().contains_key(key)
    }

    fn sign(&self, key: &PartyKey, id: &TxId) -> Option<TransactionSignature> {
        if *key == self.party.key {
            return Some(self.keys.sign(id));
        }
        self.confidential.read().get(key).map(|kp| kp.sign(id))
    }

    /// Transactions the clearing house reported as committed.
    #[must_use]
    pub fn finalised(&self) -> Vec<CommittedTransaction> {
        self.finalised.lock().clone()
    }

    /// Unconsumed states selected by `pick`, paired with what it picked.
    fn owned<T>(&self, pick: impl Fn(&LedgerState) -> Option<T>) -> Vec<(StateAndRef, T)> {
        self.vault
            .unconsumed_states()
            .into_iter()
            .filter_map(|s| {
                let picked = pick(&s.state.data)?;
                Some((s, picked))
            })
            .collect()
    }

    /// Sign `builder` with every key in `signers`.
    fn sign_all(&self, builder: &TransactionBuilder, signers: &[PartyKey]) -> Result<SignedTransaction> {
        let tx = builder.to_wire();
        let id = tx.id();
        let signatures = signers
            .iter()
            .map(|key| {
                self.sign(key, &id).ok_or_else(|| ClearingError::MissingSignature {
                    signer: *key,
                    reason: format!("{} does not hold this key", self.party),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(SignedTransaction::new(tx, signatures))
    }
}

/// Which leg a responder contributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    Asset,
    Cash,
}

/// Answers settlement sessions on behalf of a [`CounterpartyNode`].
pub struct SettlementResponder {
    node: Arc<CounterpartyNode>,
    leg: Leg,
}

impl SettlementResponder {
    #[must_use]
    pub fn seller(node: Arc<CounterpartyNode>) -> Self {
        Self {
            node,
            leg: Leg::Asset,
        }
    }

    #[must_use]
    pub fn buyer(node: Arc<CounterpartyNode>) -> Self {
        Self {
            node,
            leg: Leg::Cash,
        }
    }

    /// The record terms carried by `proposal` and this node's signed leg.
    fn build_leg(&self, proposal: &SignedTransaction) -> Result<(TransferRecord, SignedTransaction)> {
        let record = proposal
            .tx
            .outputs
            .iter()
            .find_map(|o| o.data.as_transfer())
            .ok_or_else(|| ClearingError::ContractViolation {
                reason: "proposal carries no transfer record".into(),
            })?;
        let (us, role) = match self.leg {
            Leg::Asset => (&record.seller, "seller"),
            Leg::Cash => (&record.buyer, "buyer"),
        };
        if !self.node.owns(&us.owning_key()) {
            return Err(ClearingError::InvalidParty {
                reason: format!("{} is not the {role} of {}", self.node.party, record.id),
            });
        }
        let mut builder = TransactionBuilder::new(proposal.tx.notary);
        let signers = match self.leg {
            Leg::Asset => self.asset_leg(record, &mut builder)?,
            Leg::Cash => self.cash_leg(record, &mut builder)?,
        };
        Ok((record.clone(), self.node.sign_all(&builder, &signers)?))
    }

    fn asset_leg(&self, record: &TransferRecord, builder: &mut TransactionBuilder) -> Result<Vec<PartyKey>> {
        let (position, holding) = self
            .node
            .owned(|s| s.as_asset().cloned())
            .into_iter()
            .find(|(_, h)| h.asset.cusip == record.asset.cusip && self.node.owns(&h.owner.owning_key()))
            .ok_or_else(|| ClearingError::ContractViolation {
                reason: format!("no unconsumed position in {}", record.asset.cusip),
            })?;
        let owner = holding.owner.owning_key();
        builder
            .add_input_state(position)
            .add_output(
                LedgerState::Asset(AssetHolding {
                    asset: holding.asset,
                    owner: record.buyer.clone(),
                }),
                constants::ASSET_CONTRACT_ID,
            )
            .add_command(Command::new(CommandKind::MoveAsset, vec![owner]));
        Ok(vec![owner])
    }

    fn cash_leg(&self, record: &TransferRecord, builder: &mut TransactionBuilder) -> Result<Vec<PartyKey>> {
        let cost = record.asset.purchase_cost;
        let currency = &record.asset.currency;
        let mut gathered = Decimal::ZERO;
        let mut signers = Vec::new();
        for (coin, holding) in self.node.owned(|s| s.as_cash().cloned()) {
            if gathered >= cost {
                break;
            }
            if holding.currency != *currency || !self.node.owns(&holding.owner.owning_key()) {
                continue;
            }
            gathered += holding.amount;
            let owner = holding.owner.owning_key();
            if !signers.contains(&owner) {
                signers.push(owner);
            }
            builder.add_input_state(coin);
        }
        if gathered < cost {
            return Err(ClearingError::ContractViolation {
                reason: format!("insufficient {currency}: have {gathered}, need {cost}"),
            });
        }

        builder.add_output(
            LedgerState::Cash(CashHolding {
                amount: cost,
                currency: currency.clone(),
                owner: record.seller.clone(),
            }),
            constants::CASH_CONTRACT_ID,
        );
        let change = gathered - cost;
        if change > Decimal::ZERO {
            builder.add_output(
                LedgerState::Cash(CashHolding {
                    amount: change,
                    currency: currency.clone(),
                    owner: record.buyer.clone(),
                }),
                constants::CASH_CONTRACT_ID,
            );
        }
        builder.add_command(Command::new(CommandKind::MoveCash, signers.clone()));
        Ok(signers)
    }

    /// Sign `stx` if it still contains `leg`, spends nothing else this node
    /// holds, and settles `record`.
    fn countersign(
        &self,
        stx: &SignedTransaction,
        leg: &SignedTransaction,
        record: &TransferRecord,
    ) -> Result<Vec<TransactionSignature>> {
        let inputs: BTreeSet<_> = stx.tx.inputs.iter().map(|i| i.reference).collect();
        let intact = leg.tx.inputs.iter().all(|i| inputs.contains(&i.reference))
            && leg.tx.outputs.iter().all(|o| stx.tx.outputs.contains(o));
        if !intact {
            return Err(ClearingError::ContractViolation {
                reason: format!("{} leg missing from merged transaction", self.node.party),
            });
        }
        let ours: BTreeSet<_> = leg.tx.inputs.iter().map(|i| i.reference).collect();
        let foreign_spend = stx.tx.inputs.iter().find(|i| {
            !ours.contains(&i.reference)
                && held_by(&i.state.data).is_some_and(|key| self.node.owns(&key))
        });
        if let Some(input) = foreign_spend {
            return Err(ClearingError::ContractViolation {
                reason: format!(
                    "merged transaction spends {} held by {} outside its leg",
                    input.reference, self.node.party
                ),
            });
        }
        let settles = stx.tx.outputs.iter().filter_map(|o| o.data.as_transfer()).any(|r| {
            r.id == record.id && r.status == TransferStatus::Transferred && r.asset == record.asset
        });
        if !settles {
            return Err(ClearingError::ContractViolation {
                reason: format!("merged transaction does not settle {}", record.id),
            });
        }
        let id = stx.id();
        let signatures: Vec<_> = stx
            .required_signers()
            .iter()
            .filter_map(|key| self.node.sign(key, &id))
            .collect();
        if signatures.is_empty() {
            return Err(ClearingError::ContractViolation {
                reason: format!("{} is not a required signer", self.node.party),
            });
        }
        Ok(signatures)
    }
}

/// Owner of an asset or cash holding. Records are not holdings.
fn held_by(data: &LedgerState) -> Option<PartyKey> {
    match data {
        LedgerState::Asset(h) => Some(h.owner.owning_key()),
        LedgerState::Cash(c) => Some(c.owner.owning_key()),
        LedgerState::Transfer(_) => None,
    }
}

#[async_trait]
impl Responder for SettlementResponder {
    async fn respond(&self, mut session: BoxedSession) -> Result<()> {
        let counterparty = session.counterparty().name.clone();
        let malformed = |step: SettlementStep, reason: String| ClearingError::MalformedReply {
            step,
            counterparty: counterparty.clone(),
            reason,
        };

        let Some(bytes) = session.receive_bytes().await else {
            return Ok(());
        };
        let proposal = match SessionMessage::decode(&bytes) {
            Ok(SessionMessage::Proposal(proposal)) => proposal,
            Ok(other) => {
                return Err(malformed(
                    SettlementStep::FetchingFragments,
                    format!("expected Proposal, got {}", other.kind()),
                ));
            }
            Err(e) => return Err(malformed(SettlementStep::FetchingFragments, e.to_string())),
        };
        let (record, leg) = match self.build_leg(&proposal) {
            Ok(built) => built,
            Err(error) => {
                let reject = SessionMessage::Reject {
                    reason: error.to_string(),
                };
                send_message(session.as_mut(), SettlementStep::FetchingFragments, &reject).await?;
                return Err(error);
            }
        };
        tracing::debug!(party = %self.node.party, record = %record.id, leg = %leg.id(), "leg built");
        let fragment = SessionMessage::Fragment(leg.clone());
        send_message(session.as_mut(), SettlementStep::FetchingFragments, &fragment).await?;

        let identities = &self.node.identities;
        let mut sync_keys: Vec<PartyKey> = Vec::new();
        while let Some(bytes) = session.receive_bytes().await {
            let message = SessionMessage::decode(&bytes)
                .map_err(|e| malformed(SettlementStep::SynchronizingIdentities, e.to_string()))?;
            match message {
                SessionMessage::IdentitySync { keys, offered } => {
                    identities.absorb(offered)?;
                    let offered = identities.certificates_for(&keys);
                    sync_keys = keys;
                    let answer = SessionMessage::IdentityOffer { offered };
                    send_message(session.as_mut(), SettlementStep::SynchronizingIdentities, &answer)
                        .await?;
                }
                SessionMessage::IdentityConfirm { offered } => {
                    identities.absorb(offered)?;
                    let resolved = identities.mapping_for(&sync_keys);
                    let answer = SessionMessage::IdentityReport { resolved };
                    send_message(session.as_mut(), SettlementStep::SynchronizingIdentities, &answer)
                        .await?;
                }
                SessionMessage::SignatureRequest(stx) => {
                    let answer = match self.countersign(&stx, &leg, &record) {
                        Ok(signatures) => SessionMessage::Signatures(signatures),
                        Err(error) => {
                            tracing::warn!(party = %self.node.party, %error, "refusing to sign");
                            SessionMessage::Reject {
                                reason: error.to_string(),
                            }
                        }
                    };
                    send_message(session.as_mut(), SettlementStep::Collecting, &answer).await?;
                }
                SessionMessage::Finalised(committed) => {
                    tracing::info!(party = %self.node.party, tx = %committed.id(), "settlement finalised");
                    self.node.finalised.lock().push(committed);
                    break;
                }
                other => {
                    return Err(malformed(
                        SettlementStep::Collecting,
                        format!("unexpected {}", other.kind()),
                    ));
                }
            }
        }
        Ok(())
    }
}
