//! Transaction-group validation
//!
//! Validates a set of freshly arrived transactions against each other and a
//! set of previously validated roots: every input must resolve to a known
//! output, no state reference may be consumed twice, every mentioned contract
//! must accept, and every command signer must have a verifying signature over
//! the canonical wire bytes.
//!
//! Bugs here are consensus bugs: a single mis-verified transaction lets
//! invalid value propagate to every later holder.

use crate::registry::ContractRegistry;
use std::collections::{BTreeSet, HashMap};
use tally_model::{
    ContractRejection, IdentityMap, LedgerTransaction, ModelError, PubKey, SecureHash,
    SignedTransaction, StateRef, TransactionForVerification, TransactionState,
};
use thiserror::Error;

/// Why a transaction group was refused.
#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("transaction {tx} references unknown ancestor {hash}")]
    UnresolvedReference { tx: SecureHash, hash: SecureHash },

    #[error("state {conflict} consumed by both {a} and {b}")]
    DoubleSpend {
        conflict: StateRef,
        a: SecureHash,
        b: SecureHash,
    },

    #[error(transparent)]
    ContractRejected(#[from] ContractRejection),

    #[error("no contract registered for hash {hash} (mentioned by {tx})")]
    UnknownContract { tx: SecureHash, hash: SecureHash },

    #[error("transaction {tx} is missing a signature for command signer {key}")]
    MissingSignature { tx: SecureHash, key: PubKey },

    #[error("transaction {tx} carries an invalid signature by {key}")]
    SignatureInvalid { tx: SecureHash, key: PubKey },

    #[error("malformed transaction: {0}")]
    Malformed(#[from] ModelError),
}

/// A set of transactions to validate together.
///
/// `roots` are previously validated transactions whose outputs form the
/// resolution environment; only `new` is re-verified.
pub struct TransactionGroup {
    new: Vec<SignedTransaction>,
    roots: Vec<LedgerTransaction>,
}

impl TransactionGroup {
    pub fn new(new: Vec<SignedTransaction>, roots: Vec<LedgerTransaction>) -> Self {
        Self { new, roots }
    }

    /// Run the whole validation algorithm. On success returns the ledger form
    /// of every transaction in `new`, in id order.
    pub fn verify(
        &self,
        registry: &ContractRegistry,
        identities: &IdentityMap,
    ) -> Result<Vec<LedgerTransaction>, VerifyError> {
        self.verify_tolerating(registry, identities, &BTreeSet::new())
    }

    /// As [`Self::verify`], but tolerates absent signatures from an explicit
    /// set of keys. Used on transactions still collecting signatures; a final
    /// transaction is always checked with the empty set.
    pub fn verify_tolerating(
        &self,
        registry: &ContractRegistry,
        identities: &IdentityMap,
        may_be_missing: &BTreeSet<PubKey>,
    ) -> Result<Vec<LedgerTransaction>, VerifyError> {
        // Decode up front; ids are fixed by the owned canonical bytes.
        let mut decoded = Vec::with_capacity(self.new.len());
        for signed in &self.new {
            let wire = signed.wire_transaction()?;
            decoded.push((signed.id(), wire, signed));
        }
        // Sorted by id so error reports are reproducible regardless of how
        // the caller assembled the group.
        decoded.sort_by_key(|(id, _, _)| *id);

        // Pass 1: the resolution environment.
        let mut outputs: HashMap<StateRef, TransactionState> = HashMap::new();
        for root in &self.roots {
            for (index, state) in root.outputs.iter().enumerate() {
                outputs.insert(StateRef::new(root.hash, index as u32), state.clone());
            }
        }
        for (id, wire, _) in &decoded {
            for (index, state) in wire.outputs.iter().enumerate() {
                outputs.insert(StateRef::new(*id, index as u32), state.clone());
            }
        }

        // Pass 2: input resolution and single-spend. A duplicate input within
        // one transaction is a self-conflict and fails the same way.
        let mut consumed: HashMap<StateRef, SecureHash> = HashMap::new();
        for (id, wire, _) in &decoded {
            for input in &wire.inputs {
                if !outputs.contains_key(input) {
                    return Err(VerifyError::UnresolvedReference {
                        tx: *id,
                        hash: input.txhash,
                    });
                }
                if let Some(first) = consumed.insert(*input, *id) {
                    return Err(VerifyError::DoubleSpend {
                        conflict: *input,
                        a: first,
                        b: *id,
                    });
                }
            }
        }

        // Pass 3: contract verification, for every contract mentioned by any
        // input or output state — outputs included even when no transition
        // references them.
        let mut ledger_txs = Vec::with_capacity(decoded.len());
        for (id, wire, _) in &decoded {
            let ledger = LedgerTransaction::resolve(wire, identities, |r| outputs.get(r).cloned())?;
            let tx = TransactionForVerification::from_ledger(&ledger);
            for contract_hash in tx.mentioned_contracts() {
                let contract = registry.lookup(&contract_hash).ok_or(
                    VerifyError::UnknownContract { tx: *id, hash: contract_hash },
                )?;
                contract.verify(&tx)?;
            }
            tracing::debug!(tx = %id, "contracts accepted");
            ledger_txs.push(ledger);
        }

        // Pass 4: every command signer must have a verifying signature over
        // the canonical bytes. Extra signatures are allowed.
        for (id, _, signed) in &decoded {
            signed
                .verify_signatures_allowing(may_be_missing)
                .map_err(|e| match e {
                    ModelError::MissingSignature(key) => {
                        VerifyError::MissingSignature { tx: *id, key }
                    }
                    ModelError::SignatureInvalid { key, .. } => {
                        VerifyError::SignatureInvalid { tx: *id, key }
                    }
                    other => VerifyError::Malformed(other),
                })?;
        }

        Ok(ledger_txs)
    }
}
