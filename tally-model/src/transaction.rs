//! Transactions: wire form, signed form, ledger form
//!
//! A [`WireTransaction`] is the canonical unsigned form whose SHA-256 is the
//! transaction id. A [`SignedTransaction`] owns the canonical bytes plus the
//! signatures collected over them, and is what travels between peers and sits
//! in storage. A [`LedgerTransaction`] is the derived form with inputs
//! resolved to actual states, used for contract verification; it is never
//! stored.

use crate::command::{Command, CommandData, CommandError, TimestampCommand};
use crate::crypto::{sha256, CryptoError};
use crate::identity::{DigitalSignature, IdentityMap, Party};
use crate::state::{StateRef, TransactionState};
use crate::types::{PubKey, SecureHash};
use crate::wire::{WireCommand, WireSignedTransaction, WireState, WireStateRef, WireTransactionMsg};
use prost::Message;
use std::collections::BTreeSet;
use thiserror::Error;

/// Errors from transaction construction, decoding, and signature assembly.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("proto decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("bad hash: {0}")]
    BadHash(String),

    #[error("invalid public key length: expected 32 bytes, got {0}")]
    BadKeyLength(usize),

    #[error("invalid signature length: expected 64 bytes, got {0}")]
    BadSigLength(usize),

    #[error("bad currency: {0}")]
    BadCurrency(String),

    #[error("bad date: {0} days from CE")]
    BadDate(i32),

    #[error("bad command: {0}")]
    BadCommand(#[from] CommandError),

    #[error("duplicate input {0}")]
    DuplicateInput(StateRef),

    #[error("signature by {key} does not verify: {source}")]
    SignatureInvalid { key: PubKey, source: CryptoError },

    #[error("missing signature for command signer {0}")]
    MissingSignature(PubKey),

    #[error("input {0} not resolvable")]
    UnresolvedInput(SecureHash),
}

/// The canonical unsigned transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireTransaction {
    pub inputs: Vec<StateRef>,
    pub outputs: Vec<TransactionState>,
    pub commands: Vec<Command>,
    pub attachments: Vec<SecureHash>,
}

impl WireTransaction {
    /// The canonical serialization. All id computation goes through here.
    pub fn to_canonical_bytes(&self) -> Vec<u8> {
        let msg = WireTransactionMsg {
            inputs: self.inputs.iter().map(|r| WireStateRef::from(*r)).collect(),
            outputs: self.outputs.iter().map(|s| WireState::from(s.clone())).collect(),
            commands: self.commands.iter().map(|c| WireCommand::from(c.clone())).collect(),
            attachments: self.attachments.iter().map(|h| (*h).into()).collect(),
        };
        msg.encode_to_vec()
    }

    pub fn from_canonical_bytes(bytes: &[u8]) -> Result<Self, ModelError> {
        let msg = WireTransactionMsg::decode(bytes)?;
        let inputs = msg
            .inputs
            .into_iter()
            .map(StateRef::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let outputs = msg
            .outputs
            .into_iter()
            .map(TransactionState::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let commands = msg
            .commands
            .into_iter()
            .map(Command::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let attachments = msg
            .attachments
            .into_iter()
            .map(SecureHash::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { inputs, outputs, commands, attachments })
    }

    /// The transaction id: SHA-256 of the canonical serialization, computed
    /// without signatures.
    pub fn id(&self) -> SecureHash {
        sha256(&self.to_canonical_bytes())
    }

    /// Every key any command requires a signature from.
    pub fn required_signers(&self) -> BTreeSet<PubKey> {
        self.commands
            .iter()
            .flat_map(|c| c.signers.iter().copied())
            .collect()
    }

    /// The timestamp command, if the transaction carries exactly one.
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

    /// Sign the canonical bytes and wrap into a [`SignedTransaction`].
    pub fn sign_with(&self, keys: &[&crate::identity::KeyPair]) -> SignedTransaction {
        let wire_bytes = self.to_canonical_bytes();
        let sigs = keys.iter().map(|k| k.sign(&wire_bytes)).collect();
        SignedTransaction { wire_bytes, sigs }
    }
}

/// A wire transaction's canonical bytes plus the signatures over them.
///
/// Owns its bytes: the id is always computed from the exact bytes that were
/// signed, never from a re-serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    wire_bytes: Vec<u8>,
    sigs: Vec<DigitalSignature>,
}

impl SignedTransaction {
    pub fn new(wire_bytes: Vec<u8>, sigs: Vec<DigitalSignature>) -> Self {
        Self { wire_bytes, sigs }
    }

    pub fn wire_bytes(&self) -> &[u8] {
        &self.wire_bytes
    }

    pub fn signatures(&self) -> &[DigitalSignature] {
        &self.sigs
    }

    /// The transaction id: SHA-256 of the owned canonical bytes.
    pub fn id(&self) -> SecureHash {
        sha256(&self.wire_bytes)
    }

    /// Decode the owned bytes back into the unsigned form.
    pub fn wire_transaction(&self) -> Result<WireTransaction, ModelError> {
        WireTransaction::from_canonical_bytes(&self.wire_bytes)
    }

    /// Add one more signature, preserving the order signatures arrived in.
    pub fn with_signature(mut self, sig: DigitalSignature) -> Self {
        self.sigs.push(sig);
        self
    }

    /// Sign the owned bytes with `key` and append.
    pub fn sign_and_add(self, key: &crate::identity::KeyPair) -> Self {
        let sig = key.sign(&self.wire_bytes);
        self.with_signature(sig)
    }

    /// Verify every attached signature and require a signature for every
    /// command signer. Extra signatures from keys no command lists are
    /// allowed.
    pub fn verify_signatures(&self) -> Result<(), ModelError> {
        self.verify_signatures_allowing(&BTreeSet::new())
    }

    /// As [`Self::verify_signatures`], but callers may explicitly tolerate a
    /// set of keys whose signatures are not yet present.
    pub fn verify_signatures_allowing(
        &self,
        may_be_missing: &BTreeSet<PubKey>,
    ) -> Result<(), ModelError> {
        for sig in &self.sigs {
            sig.verify(&self.wire_bytes)
                .map_err(|source| ModelError::SignatureInvalid { key: sig.by, source })?;
        }
        let present: BTreeSet<PubKey> = self.sigs.iter().map(|s| s.by).collect();
        let wire = self.wire_transaction()?;
        for signer in wire.required_signers() {
            if !present.contains(&signer) && !may_be_missing.contains(&signer) {
                return Err(ModelError::MissingSignature(signer));
            }
        }
        Ok(())
    }

    /// The command signers that have not signed yet.
    pub fn missing_signers(&self) -> Result<BTreeSet<PubKey>, ModelError> {
        let present: BTreeSet<PubKey> = self.sigs.iter().map(|s| s.by).collect();
        let wire = self.wire_transaction()?;
        Ok(wire
            .required_signers()
            .into_iter()
            .filter(|k| !present.contains(k))
            .collect())
    }

    /// Encode for peer transfer or storage.
    pub fn to_wire(&self) -> WireSignedTransaction {
        WireSignedTransaction {
            wire_bytes: self.wire_bytes.clone(),
            sigs: self.sigs.iter().map(|s| s.clone().into()).collect(),
        }
    }

    pub fn encode_to_vec(&self) -> Vec<u8> {
        self.to_wire().encode_to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ModelError> {
        let msg = WireSignedTransaction::decode(bytes)?;
        Self::try_from(msg)
    }
}

impl TryFrom<WireSignedTransaction> for SignedTransaction {
    type Error = ModelError;

    fn try_from(w: WireSignedTransaction) -> Result<Self, Self::Error> {
        let sigs = w
            .sigs
            .into_iter()
            .map(DigitalSignature::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        // Reject bytes that don't decode; the id must always be computable
        // over a well-formed transaction.
        WireTransaction::from_canonical_bytes(&w.wire_bytes)?;
        Ok(Self { wire_bytes: w.wire_bytes, sigs })
    }
}

/// A command whose signers have been resolved to legal identities where the
/// identity map knows them; unknown signers are recorded by key alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedCommand {
    pub data: CommandData,
    pub signers: Vec<PubKey>,
    pub signing_parties: Vec<Party>,
}

/// A transaction with inputs resolved to the states they consume.
///
/// Derived from a [`SignedTransaction`] against already-known ancestors;
/// never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTransaction {
    pub hash: SecureHash,
    pub inputs: Vec<(StateRef, TransactionState)>,
    pub outputs: Vec<TransactionState>,
    pub commands: Vec<AuthenticatedCommand>,
    pub attachments: Vec<SecureHash>,
}

impl LedgerTransaction {
    /// Resolve a wire transaction to ledger form. `lookup` maps a state
    /// reference to the output state it points at; identity resolution is
    /// best-effort.
    pub fn resolve(
        wire: &WireTransaction,
        identities: &IdentityMap,
        mut lookup: impl FnMut(&StateRef) -> Option<TransactionState>,
    ) -> Result<Self, ModelError> {
        let mut inputs = Vec::with_capacity(wire.inputs.len());
        for input in &wire.inputs {
            let state = lookup(input).ok_or(ModelError::UnresolvedInput(input.txhash))?;
            inputs.push((*input, state));
        }
        let commands = wire
            .commands
            .iter()
            .map(|c| AuthenticatedCommand {
                data: c.data.clone(),
                signers: c.signers.clone(),
                signing_parties: c
                    .signers
                    .iter()
                    .filter_map(|k| identities.lookup(k).cloned())
                    .collect(),
            })
            .collect();
        Ok(Self {
            hash: wire.id(),
            inputs,
            outputs: wire.outputs.clone(),
            commands,
            attachments: wire.attachments.clone(),
        })
    }

    /// The state produced at `index`, addressable as `(self.hash, index)`.
    pub fn output(&self, index: u32) -> Option<&TransactionState> {
        self.outputs.get(index as usize)
    }
}

/// Accumulates the pieces of a transaction, then emits the wire form.
///
/// The builder refuses duplicate inputs; the group validator still reports
/// duplicates arriving off the wire as double-spend self-conflicts.
#[derive(Debug, Default)]
pub struct TransactionBuilder {
    inputs: Vec<StateRef>,
    outputs: Vec<TransactionState>,
    commands: Vec<Command>,
    attachments: Vec<SecureHash>,
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_input(&mut self, input: StateRef) -> Result<&mut Self, ModelError> {
        if self.inputs.contains(&input) {
            return Err(ModelError::DuplicateInput(input));
        }
        self.inputs.push(input);
        Ok(self)
    }

    pub fn add_output(&mut self, output: TransactionState) -> &mut Self {
        self.outputs.push(output);
        self
    }

    pub fn add_command(&mut self, command: Command) -> &mut Self {
        self.commands.push(command);
        self
    }

    pub fn add_attachment(&mut self, id: SecureHash) -> &mut Self {
        self.attachments.push(id);
        self
    }

    /// The index the next `add_output` will land at.
    pub fn next_output_index(&self) -> u32 {
        self.outputs.len() as u32
    }

    pub fn build(self) -> WireTransaction {
        WireTransaction {
            inputs: self.inputs,
            outputs: self.outputs,
            commands: self.commands,
            attachments: self.attachments,
        }
    }
}
