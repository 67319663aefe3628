//! Contract interface
//!
//! A contract is a pure predicate over a transaction: given identical inputs
//! it yields identical results, with no access to clocks, I/O, network,
//! randomness, or mutable external state. The only time a contract may
//! observe is the transaction's own timestamp command.
//!
//! Builder helpers (`generate_*`) live with the concrete contracts; only
//! `verify` is part of consensus.

use crate::command::{CommandData, TimestampCommand};
use crate::state::{StateRef, TransactionState};
use crate::transaction::{AuthenticatedCommand, LedgerTransaction};
use crate::types::SecureHash;
use std::collections::BTreeSet;
use thiserror::Error;

/// A contract refused a transaction. Carries the offending transaction id
/// and a human-readable cause; never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("contract rejected transaction {tx}: {message}")]
pub struct ContractRejection {
    pub tx: SecureHash,
    pub message: String,
}

impl ContractRejection {
    pub fn new(tx: SecureHash, message: impl Into<String>) -> Self {
        Self { tx, message: message.into() }
    }
}

/// Everything a contract may see while verifying one transaction.
#[derive(Debug, Clone)]
pub struct TransactionForVerification {
    pub tx_hash: SecureHash,
    pub inputs: Vec<(StateRef, TransactionState)>,
    pub outputs: Vec<TransactionState>,
    pub commands: Vec<AuthenticatedCommand>,
    pub attachments: Vec<SecureHash>,
}

impl TransactionForVerification {
    pub fn from_ledger(tx: &LedgerTransaction) -> Self {
        Self {
            tx_hash: tx.hash,
            inputs: tx.inputs.clone(),
            outputs: tx.outputs.clone(),
            commands: tx.commands.clone(),
            attachments: tx.attachments.clone(),
        }
    }

    /// Input states only (without their producing references).
    pub fn input_states(&self) -> impl Iterator<Item = &TransactionState> {
        self.inputs.iter().map(|(_, s)| s)
    }

    /// Every contract hash mentioned by any input or output state.
    pub fn mentioned_contracts(&self) -> BTreeSet<SecureHash> {
        self.input_states()
            .chain(self.outputs.iter())
            .map(|s| s.contract)
            .collect()
    }

    /// Commands matching a predicate on their payload.
    pub fn commands_where<'a>(
        &'a self,
        mut pred: impl FnMut(&CommandData) -> bool + 'a,
    ) -> impl Iterator<Item = &'a AuthenticatedCommand> {
        self.commands.iter().filter(move |c| pred(&c.data))
    }

    /// The transaction's timestamp command, if exactly one is present.
    pub fn timestamp_command(&self) -> Option<&TimestampCommand> {
        let mut found = None;
        for cmd in &self.commands {
            if let CommandData::Timestamp(t) = &cmd.data {
                if found.is_some() {
                    return None;
                }
                found = Some(t);
            }
        }
        found
    }

    /// Shortcut for a rejection carrying this transaction's hash.
    pub fn reject(&self, message: impl Into<String>) -> ContractRejection {
        ContractRejection::new(self.tx_hash, message)
    }
}

/// Deterministic verification logic governing a family of states.
///
/// Identified by the hash of its code; states carry that hash as their
/// contract reference.
pub trait Contract: Send + Sync {
    /// Accept or reject the transaction. Must be pure and must not suspend.
    fn verify(&self, tx: &TransactionForVerification) -> Result<(), ContractRejection>;

    /// Hash of a legal prose document describing the agreement this contract
    /// automates.
    fn legal_reference(&self) -> SecureHash;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sha256;
    use crate::identity::KeyPair;
    use crate::state::{Amount, CashStateData, ContractStateData, Currency};

    fn tx_with_states(contracts: &[SecureHash]) -> TransactionForVerification {
        let owner = KeyPair::generate().public_key();
        let state = |c: &SecureHash| {
            TransactionState::new(
                *c,
                ContractStateData::Cash(CashStateData {
                    amount: Amount::new(1, Currency::GBP),
                    owner,
                }),
            )
        };
        TransactionForVerification {
            tx_hash: sha256(b"tx"),
            inputs: vec![(StateRef::new(sha256(b"p"), 0), state(&contracts[0]))],
            outputs: contracts[1..].iter().map(state).collect(),
            commands: vec![],
            attachments: vec![],
        }
    }

    #[test]
    fn mentioned_contracts_unions_inputs_and_outputs() {
        let a = sha256(b"a");
        let b = sha256(b"b");
        let tx = tx_with_states(&[a, b, b]);
        assert_eq!(tx.mentioned_contracts(), [a, b].into());
    }
}
