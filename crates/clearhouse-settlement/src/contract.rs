//! Contract verification run by the ordering authority before commit.
//!
//! The orchestrator never calls a verifier itself: fragments are merged
//! unchecked and the whole transaction is judged here, once.

use std::collections::{BTreeMap, BTreeSet};

use clearhouse_types::{
    ClearingError, CommandKind, LedgerState, PartyKey, Result, TransferRecord, TransferStatus,
    WireTransaction, constants,
};
use rust_decimal::Decimal;

/// Decides whether a transaction obeys the contracts governing its states.
pub trait TransactionVerifier: Send + Sync {
    /// # Errors
    /// Returns [`ClearingError::ContractViolation`] describing the first rule broken.
    fn verify(&self, tx: &WireTransaction) -> Result<()>;
}

/// Accepts everything. For tests of the commit path alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl TransactionVerifier for AcceptAll {
    fn verify(&self, _tx: &WireTransaction) -> Result<()> {
        Ok(())
    }
}

/// Rules for transfer records, security positions and cash.
#[derive(Debug, Default, Clone, Copy)]
pub struct TransferContract;

fn violation(reason: impl Into<String>) -> ClearingError {
    ClearingError::ContractViolation {
        reason: reason.into(),
    }
}

fn require(condition: bool, reason: &str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(violation(reason))
    }
}

/// Signers of every command of `kind`.
fn signers_of(tx: &WireTransaction, kind: CommandKind) -> Option<BTreeSet<PartyKey>> {
    let mut found = false;
    let mut signers = BTreeSet::new();
    for command in tx.commands.iter().filter(|c| c.kind == kind) {
        found = true;
        signers.extend(command.signers.iter().copied());
    }
    found.then_some(signers)
}

impl TransactionVerifier for TransferContract {
    fn verify(&self, tx: &WireTransaction) -> Result<()> {
        for state in tx.inputs.iter().map(|i| &i.state).chain(tx.outputs.iter()) {
            let expected = match state.data {
                LedgerState::Transfer(_) => constants::TRANSFER_CONTRACT_ID,
                LedgerState::Asset(_) => constants::ASSET_CONTRACT_ID,
                LedgerState::Cash(_) => constants::CASH_CONTRACT_ID,
            };
            if state.contract != expected {
                return Err(violation(format!(
                    "state governed by {} but must be governed by {expected}",
                    state.contract
                )));
            }
        }

        if signers_of(tx, CommandKind::Issue).is_some() {
            return require(tx.inputs.is_empty(), "issuance must not consume states");
        }

        verify_records(tx)?;
        verify_assets(tx)?;
        verify_cash(tx)
    }
}

fn verify_records(tx: &WireTransaction) -> Result<()> {
    let inputs: Vec<&TransferRecord> = tx
        .inputs
        .iter()
        .filter_map(|i| i.state.data.as_transfer())
        .collect();
    let outputs: Vec<&TransferRecord> = tx
        .outputs
        .iter()
        .filter_map(|o| o.data.as_transfer())
        .collect();
    let create = signers_of(tx, CommandKind::CreateRequest);
    let settle = signers_of(tx, CommandKind::SettleRequest);

    match (create, settle) {
        (None, None) => require(
            inputs.is_empty() && outputs.is_empty(),
            "transfer records moved without a transfer command",
        ),
        (Some(_), Some(_)) => Err(violation("create and settle in one transaction")),
        (Some(signers), None) => {
            require(inputs.is_empty(), "creation must not consume a transfer record")?;
            let [record] = outputs.as_slice() else {
                return Err(violation("creation must produce exactly one transfer record"));
            };
            require(
                record.status == TransferStatus::PendingConfirmation,
                "new transfer record must be PENDING_CONFIRMATION",
            )?;
            require(record.buyer != record.seller, "buyer and seller must differ")?;
            require(
                signers.contains(&record.seller.owning_key())
                    && signers.contains(&record.buyer.owning_key()),
                "buyer and seller must sign creation",
            )
        }
        (None, Some(signers)) => {
            let ([before], [after]) = (inputs.as_slice(), outputs.as_slice()) else {
                return Err(violation(
                    "settlement must consume and produce exactly one transfer record",
                ));
            };
            require(before.id == after.id, "settlement must keep the record id")?;
            require(before.asset == after.asset, "settlement must keep the asset")?;
            require(
                before.seller == after.seller && before.buyer == after.buyer,
                "settlement must keep buyer and seller",
            )?;
            require(
                after.status == TransferStatus::Transferred
                    && before.status.can_transition_to(after.status),
                "settlement must move the record forward to TRANSFERRED",
            )?;
            let Some(clearing_house) = &after.clearing_house else {
                return Err(violation("settled record must name its clearing house"));
            };
            require(
                [&after.buyer, &after.seller, clearing_house]
                    .iter()
                    .all(|p| signers.contains(&p.owning_key())),
                "buyer, seller and clearing house must sign settlement",
            )?;
            require(tx.time_window.is_some(), "settlement requires a time window")
        }
    }
}

fn verify_assets(tx: &WireTransaction) -> Result<()> {
    let mut balance: BTreeMap<&str, i64> = BTreeMap::new();
    let mut owners = BTreeSet::new();
    for holding in tx.inputs.iter().filter_map(|i| i.state.data.as_asset()) {
        *balance.entry(holding.asset.cusip.as_str()).or_default() += 1;
        owners.insert(holding.owner.owning_key());
    }
    for holding in tx.outputs.iter().filter_map(|o| o.data.as_asset()) {
        *balance.entry(holding.asset.cusip.as_str()).or_default() -= 1;
    }
    if balance.is_empty() {
        return Ok(());
    }
    let Some(signers) = signers_of(tx, CommandKind::MoveAsset) else {
        return Err(violation("security positions moved without a move command"));
    };
    if let Some((cusip, _)) = balance.iter().find(|(_, n)| **n != 0) {
        return Err(violation(format!("positions in {cusip} not conserved")));
    }
    require(
        owners.is_subset(&signers),
        "every consumed position's owner must sign",
    )
}

fn verify_cash(tx: &WireTransaction) -> Result<()> {
    let mut balance: BTreeMap<&str, Decimal> = BTreeMap::new();
    let mut owners = BTreeSet::new();
    let mut any = false;
    for holding in tx.inputs.iter().filter_map(|i| i.state.data.as_cash()) {
        any = true;
        *balance.entry(holding.currency.as_str()).or_default() += holding.amount;
        owners.insert(holding.owner.owning_key());
    }
    for holding in tx.outputs.iter().filter_map(|o| o.data.as_cash()) {
        any = true;
        require(holding.amount > Decimal::ZERO, "cash amounts must be positive")?;
        *balance.entry(holding.currency.as_str()).or_default() -= holding.amount;
    }
    if !any {
        return Ok(());
    }
    let Some(signers) = signers_of(tx, CommandKind::MoveCash) else {
        return Err(violation("cash moved without a move command"));
    };
    if let Some((currency, _)) = balance.iter().find(|(_, amount)| !amount.is_zero()) {
        return Err(violation(format!("{currency} not conserved")));
    }
    require(owners.is_subset(&signers), "every consumed cash owner must sign")
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use clearhouse_types::{
        AbstractParty, Asset, AssetHolding, CashHolding, Command, StateAndRef, StateRef,
        TimeWindow, TransactionBuilder, TransactionState, TxId,
    };

    use super::*;

    const NOTARY: PartyKey = PartyKey([9; 32]);
    const SELLER: PartyKey = PartyKey([1; 32]);
    const BUYER: PartyKey = PartyKey([2; 32]);
    const CH: PartyKey = PartyKey([3; 32]);

    fn asset() -> Asset {
        Asset::dummy("912828ZT0", Decimal::new(100, 0))
    }

    fn input(data: LedgerState, contract: &str, seed: u8) -> StateAndRef {
        StateAndRef {
            state: TransactionState::new(data, contract, NOTARY),
            reference: StateRef::new(TxId([seed; 32]), 0),
        }
    }

    fn record() -> TransferRecord {
        TransferRecord::pending(
            asset(),
            AbstractParty::anonymous(SELLER),
            AbstractParty::anonymous(BUYER),
        )
    }

    fn cash(amount: i64, owner: PartyKey) -> LedgerState {
        LedgerState::Cash(CashHolding {
            amount: Decimal::new(amount, 0),
            currency: "USD".into(),
            owner: AbstractParty::anonymous(owner),
        })
    }

    fn holding(owner: PartyKey) -> LedgerState {
        LedgerState::Asset(AssetHolding {
            asset: asset(),
            owner: AbstractParty::anonymous(owner),
        })
    }

    /// A complete, valid delivery-versus-payment settlement.
    fn settlement() -> TransactionBuilder {
        let before = record();
        let after = before.settled_by(AbstractParty::anonymous(CH)).unwrap();
        let mut b = TransactionBuilder::new(NOTARY);
        b.add_input_state(input(LedgerState::Transfer(before), constants::TRANSFER_CONTRACT_ID, 1))
            .add_output(LedgerState::Transfer(after), constants::TRANSFER_CONTRACT_ID)
            .add_command(Command::new(CommandKind::SettleRequest, vec![BUYER, SELLER, CH]))
            .set_time_window(TimeWindow::between(Utc::now(), chrono::Duration::seconds(60)))
            .add_input_state(input(holding(SELLER), constants::ASSET_CONTRACT_ID, 2))
            .add_output(holding(BUYER), constants::ASSET_CONTRACT_ID)
            .add_command(Command::new(CommandKind::MoveAsset, vec![SELLER]))
            .add_input_state(input(cash(150, BUYER), constants::CASH_CONTRACT_ID, 3))
            .add_output(cash(100, SELLER), constants::CASH_CONTRACT_ID)
            .add_output(cash(50, BUYER), constants::CASH_CONTRACT_ID)
            .add_command(Command::new(CommandKind::MoveCash, vec![BUYER]));
        b
    }

    fn reason(b: &TransactionBuilder) -> String {
        match TransferContract.verify(&b.to_wire()) {
            Err(ClearingError::ContractViolation { reason }) => reason,
            other => panic!("expected violation, got {other:?}"),
        }
    }

    #[test]
    fn valid_settlement_accepted() {
        TransferContract.verify(&settlement().to_wire()).unwrap();
    }

    #[test]
    fn clearing_house_must_sign() {
        let mut b = TransactionBuilder::new(NOTARY);
        let full = settlement().to_wire();
        for i in full.inputs {
            b.add_input_state(i);
        }
        for o in full.outputs {
            b.add_output_state(o);
        }
        for mut c in full.commands {
            c.signers.retain(|k| *k != CH);
            b.add_command(c);
        }
        b.set_time_window(TimeWindow::between(Utc::now(), chrono::Duration::seconds(60)));
        assert!(reason(&b).contains("clearing house must sign"));
    }

    #[test]
    fn cash_must_balance() {
        let mut b = settlement();
        b.add_output(cash(1, SELLER), constants::CASH_CONTRACT_ID);
        assert!(reason(&b).contains("USD not conserved"));
    }

    #[test]
    fn asset_cannot_vanish() {
        let wire = settlement().to_wire();
        let mut b = TransactionBuilder::new(NOTARY);
        for i in wire.inputs {
            b.add_input_state(i);
        }
        for o in wire.outputs.into_iter().filter(|o| o.data.as_asset().is_none()) {
            b.add_output_state(o);
        }
        for c in wire.commands {
            b.add_command(c);
        }
        b.set_time_window(TimeWindow::between(Utc::now(), chrono::Duration::seconds(60)));
        assert!(reason(&b).contains("not conserved"));
    }

    #[test]
    fn settlement_needs_time_window() {
        let wire = settlement().to_wire();
        let mut b = TransactionBuilder::new(NOTARY);
        for i in wire.inputs {
            b.add_input_state(i);
        }
        for o in wire.outputs {
            b.add_output_state(o);
        }
        for c in wire.commands {
            b.add_command(c);
        }
        assert!(reason(&b).contains("time window"));
    }

    #[test]
    fn record_terms_cannot_change() {
        let before = record();
        let mut after = before.settled_by(AbstractParty::anonymous(CH)).unwrap();
        after.asset.purchase_cost = Decimal::ONE;
        let mut b = TransactionBuilder::new(NOTARY);
        b.add_input_state(input(LedgerState::Transfer(before), constants::TRANSFER_CONTRACT_ID, 1))
            .add_output(LedgerState::Transfer(after), constants::TRANSFER_CONTRACT_ID)
            .add_command(Command::new(CommandKind::SettleRequest, vec![BUYER, SELLER, CH]))
            .set_time_window(TimeWindow::between(Utc::now(), chrono::Duration::seconds(60)));
        assert!(reason(&b).contains("keep the asset"));
    }

    #[test]
    fn moving_cash_without_command_rejected() {
        let mut b = TransactionBuilder::new(NOTARY);
        b.add_input_state(input(cash(10, BUYER), constants::CASH_CONTRACT_ID, 4))
            .add_output(cash(10, SELLER), constants::CASH_CONTRACT_ID);
        assert!(reason(&b).contains("without a move command"));
    }

    #[test]
    fn wrong_contract_id_rejected() {
        let mut b = TransactionBuilder::new(NOTARY);
        b.add_output(cash(10, SELLER), constants::ASSET_CONTRACT_ID)
            .add_command(Command::new(CommandKind::Issue, vec![NOTARY]));
        assert!(reason(&b).contains("must be governed by"));
    }

    #[test]
    fn creation_rules() {
        let mut ok = TransactionBuilder::new(NOTARY);
        ok.add_output(LedgerState::Transfer(record()), constants::TRANSFER_CONTRACT_ID)
            .add_command(Command::new(CommandKind::CreateRequest, vec![SELLER, BUYER]));
        TransferContract.verify(&ok.to_wire()).unwrap();

        let mut same = record();
        same.buyer = same.seller.clone();
        let mut bad = TransactionBuilder::new(NOTARY);
        bad.add_output(LedgerState::Transfer(same), constants::TRANSFER_CONTRACT_ID)
            .add_command(Command::new(CommandKind::CreateRequest, vec![SELLER]));
        assert!(reason(&bad).contains("must differ"));
    }

    #[test]
    fn issuance_cannot_consume() {
        let mut b = TransactionBuilder::new(NOTARY);
        b.add_input_state(input(cash(10, BUYER), constants::CASH_CONTRACT_ID, 5))
            .add_command(Command::new(CommandKind::Issue, vec![NOTARY]));
        assert!(reason(&b).contains("issuance"));
    }

    #[test]
    fn accept_all_accepts() {
        AcceptAll.verify(&TransactionBuilder::new(NOTARY).to_wire()).unwrap();
    }
}
