//! Fungible cash
//!
//! Value is conserved per currency across a Move; an Issue creates value out
//! of nothing and must be signed by every recipient owner. States governed by
//! other contracts in the same transaction are ignored here.

use std::collections::{BTreeSet, HashMap};
use tally_model::{
    sha256, Amount, CashStateData, Command, CommandData, Contract, ContractRejection,
    ContractStateData, Currency, ModelError, PubKey, SecureHash, StateRef, TransactionBuilder,
    TransactionForVerification, TransactionState,
};

/// Hash identifying the cash contract's code.
pub fn contract_hash() -> SecureHash {
    sha256(b"tally.contracts.cash")
}

/// Wrap cash data into a transaction state under this contract.
pub fn state(amount: Amount, owner: PubKey) -> TransactionState {
    TransactionState::new(
        contract_hash(),
        ContractStateData::Cash(CashStateData { amount, owner }),
    )
}

pub struct CashContract;

impl Contract for CashContract {
    fn verify(&self, tx: &TransactionForVerification) -> Result<(), ContractRejection> {
        let in_cash: Vec<&CashStateData> =
            tx.input_states().filter_map(|s| s.data.as_cash()).collect();
        let out_cash: Vec<&CashStateData> =
            tx.outputs.iter().filter_map(|s| s.data.as_cash()).collect();

        if out_cash.iter().any(|c| c.amount.quantity == 0) {
            return Err(tx.reject("zero-valued cash output"));
        }

        let has_issue = tx
            .commands_where(|d| matches!(d, CommandData::Issue))
            .next()
            .is_some();
        let move_signers: BTreeSet<PubKey> = tx
            .commands_where(|d| matches!(d, CommandData::Move))
            .flat_map(|c| c.signers.iter().copied())
            .collect();

        if has_issue {
            if !in_cash.is_empty() {
                return Err(tx.reject("an issuance must not consume cash"));
            }
            if out_cash.is_empty() {
                return Err(tx.reject("an issuance must output cash"));
            }
            let issue_signers: BTreeSet<PubKey> = tx
                .commands_where(|d| matches!(d, CommandData::Issue))
                .flat_map(|c| c.signers.iter().copied())
                .collect();
            for out in &out_cash {
                if !issue_signers.contains(&out.owner) {
                    return Err(tx.reject(format!(
                        "issued cash owner {} did not sign the issuance",
                        out.owner
                    )));
                }
            }
            return Ok(());
        }

        if in_cash.is_empty() && out_cash.is_empty() {
            return Ok(());
        }
        if move_signers.is_empty() {
            return Err(tx.reject("cash states present but no cash command"));
        }

        // Conservation per currency.
        let mut sums: HashMap<Currency, (u64, u64)> = HashMap::new();
        for c in &in_cash {
            sums.entry(c.amount.currency).or_default().0 += c.amount.quantity;
        }
        for c in &out_cash {
            sums.entry(c.amount.currency).or_default().1 += c.amount.quantity;
        }
        for (currency, (in_sum, out_sum)) in &sums {
            if in_sum != out_sum {
                return Err(tx.reject(format!(
                    "cash not conserved for {currency}: {in_sum} in, {out_sum} out"
                )));
            }
        }

        // Every consumed state's owner must have commanded the move.
        for c in &in_cash {
            if !move_signers.contains(&c.owner) {
                return Err(tx.reject(format!("cash owner {} did not sign the move", c.owner)));
            }
        }

        Ok(())
    }

    fn legal_reference(&self) -> SecureHash {
        sha256(b"tally.contracts.cash legal prose")
    }
}

/// Add an issuance of `amount` owned by `owner` to the builder. The issuance
/// must be signed by `owner`.
pub fn generate_issue(
    builder: &mut TransactionBuilder,
    amount: Amount,
    owner: PubKey,
) -> Result<(), ModelError> {
    builder.add_output(state(amount, owner));
    builder.add_command(Command::new(CommandData::Issue, vec![owner])?);
    Ok(())
}

/// Add a spend of `amount` to `to`, consuming from `coins` in order until the
/// amount is covered; any excess returns to `change_owner`. Returns the keys
/// that must sign. Fails if the coins cannot cover the amount or a coin's
/// currency differs.
pub fn generate_spend(
    builder: &mut TransactionBuilder,
    coins: &[(StateRef, CashStateData)],
    amount: Amount,
    to: PubKey,
    change_owner: PubKey,
) -> Result<Vec<PubKey>, SpendError> {
    let mut gathered: u64 = 0;
    let mut signers: Vec<PubKey> = Vec::new();
    for (coin_ref, coin) in coins {
        if gathered >= amount.quantity {
            break;
        }
        if coin.amount.currency != amount.currency {
            return Err(SpendError::WrongCurrency {
                expected: amount.currency,
                got: coin.amount.currency,
            });
        }
        builder.add_input(*coin_ref)?;
        gathered += coin.amount.quantity;
        if !signers.contains(&coin.owner) {
            signers.push(coin.owner);
        }
    }
    if gathered < amount.quantity {
        return Err(SpendError::InsufficientFunds {
            requested: amount,
            available: gathered,
        });
    }

    builder.add_output(state(amount, to));
    if gathered > amount.quantity {
        builder.add_output(state(
            Amount::new(gathered - amount.quantity, amount.currency),
            change_owner,
        ));
    }
    builder.add_command(Command::new(CommandData::Move, signers.clone())?);
    Ok(signers)
}

/// Why a spend could not be generated.
#[derive(thiserror::Error, Debug)]
pub enum SpendError {
    #[error("insufficient funds: requested {requested}, only {available} available")]
    InsufficientFunds { requested: Amount, available: u64 },

    #[error("coin currency {got} does not match requested {expected}")]
    WrongCurrency { expected: Currency, got: Currency },

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Command(#[from] tally_model::CommandError),
}
