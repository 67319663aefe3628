//! Canonical wire form
//!
//! Every transaction id in the system is the SHA-256 of the encoding produced
//! here, so the encoding must be identical for everyone: field order is fixed
//! by prost tags, integers are varints, hashes and keys are length-prefixed
//! bytes, and the tagged sums ([`crate::CommandData`],
//! [`crate::ContractStateData`]) keep their tag on the wire. No
//! contract-visible field is floating point.
//!
//! The strongly-typed model structs convert to and from these messages via
//! `From`/`TryFrom`; nothing else in the workspace encodes a transaction.

use crate::command::{Command, CommandData, FixCommand, FixId, RateDecimal, TimestampCommand};
use crate::state::{
    Amount, AssetStateData, CashStateData, ContractStateData, Currency, StateRef, TransactionState,
};
use crate::transaction::ModelError;
use crate::types::{PubKey, SecureHash, SigBytes};
use chrono::{Datelike, NaiveDate};

#[derive(Clone, PartialEq, prost::Message)]
pub struct WireHash {
    #[prost(uint32, tag = "1")]
    pub algorithm: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub digest: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct WireStateRef {
    #[prost(message, optional, tag = "1")]
    pub txhash: Option<WireHash>,
    #[prost(uint32, tag = "2")]
    pub index: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct WireAmount {
    #[prost(uint64, tag = "1")]
    pub quantity: u64,
    #[prost(string, tag = "2")]
    pub currency: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct WireCashState {
    #[prost(message, optional, tag = "1")]
    pub amount: Option<WireAmount>,
    #[prost(bytes = "vec", tag = "2")]
    pub owner: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct WireAssetState {
    #[prost(string, tag = "1")]
    pub kind: String,
    #[prost(bytes = "vec", tag = "2")]
    pub owner: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct WireState {
    #[prost(message, optional, tag = "1")]
    pub contract: Option<WireHash>,
    #[prost(oneof = "wire_state::Data", tags = "2, 3")]
    pub data: Option<wire_state::Data>,
}

pub mod wire_state {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Data {
        #[prost(message, tag = "2")]
        Cash(super::WireCashState),
        #[prost(message, tag = "3")]
        Asset(super::WireAssetState),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct WireTimestamp {
    #[prost(uint64, optional, tag = "1")]
    pub after_ms: Option<u64>,
    #[prost(uint64, optional, tag = "2")]
    pub before_ms: Option<u64>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct WireFix {
    #[prost(string, tag = "1")]
    pub index: String,
    #[prost(string, tag = "2")]
    pub tenor: String,
    /// Days since the common era, `chrono::Datelike::num_days_from_ce`.
    #[prost(int32, tag = "3")]
    pub date_days: i32,
    #[prost(sint64, tag = "4")]
    pub rate_mantissa: i64,
    #[prost(uint32, tag = "5")]
    pub rate_scale: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct WireIssue {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct WireMove {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct WireCommand {
    #[prost(oneof = "wire_command::Data", tags = "1, 2, 3, 4")]
    pub data: Option<wire_command::Data>,
    #[prost(bytes = "vec", repeated, tag = "5")]
    pub signers: Vec<Vec<u8>>,
}

pub mod wire_command {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Data {
        #[prost(message, tag = "1")]
        Issue(super::WireIssue),
        #[prost(message, tag = "2")]
        Move(super::WireMove),
        #[prost(message, tag = "3")]
        Timestamp(super::WireTimestamp),
        #[prost(message, tag = "4")]
        Fix(super::WireFix),
    }
}

/// The canonical transaction message. Signatures are *not* part of it; the
/// transaction id is the SHA-256 of this message's encoding.
#[derive(Clone, PartialEq, prost::Message)]
pub struct WireTransactionMsg {
    #[prost(message, repeated, tag = "1")]
    pub inputs: Vec<WireStateRef>,
    #[prost(message, repeated, tag = "2")]
    pub outputs: Vec<WireState>,
    #[prost(message, repeated, tag = "3")]
    pub commands: Vec<WireCommand>,
    #[prost(message, repeated, tag = "4")]
    pub attachments: Vec<WireHash>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct WireSignature {
    #[prost(bytes = "vec", tag = "1")]
    pub by: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub sig: Vec<u8>,
}

/// A transaction's canonical bytes plus the signatures collected over them.
#[derive(Clone, PartialEq, prost::Message)]
pub struct WireSignedTransaction {
    #[prost(bytes = "vec", tag = "1")]
    pub wire_bytes: Vec<u8>,
    #[prost(message, repeated, tag = "2")]
    pub sigs: Vec<WireSignature>,
}

/// A legally-identifiable signature on the wire: party name + key + signature.
#[derive(Clone, PartialEq, prost::Message)]
pub struct WirePartySignature {
    #[prost(string, tag = "1")]
    pub party_name: String,
    #[prost(bytes = "vec", tag = "2")]
    pub party_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub sig: Vec<u8>,
}

// --- Conversions: domain → wire ---

impl From<SecureHash> for WireHash {
    fn from(h: SecureHash) -> Self {
        WireHash {
            algorithm: h.algorithm_tag(),
            digest: h.as_bytes().to_vec(),
        }
    }
}

impl From<StateRef> for WireStateRef {
    fn from(r: StateRef) -> Self {
        WireStateRef {
            txhash: Some(r.txhash.into()),
            index: r.index,
        }
    }
}

impl From<Amount> for WireAmount {
    fn from(a: Amount) -> Self {
        WireAmount {
            quantity: a.quantity,
            currency: a.currency.as_str().to_string(),
        }
    }
}

impl From<TransactionState> for WireState {
    fn from(s: TransactionState) -> Self {
        let data = match s.data {
            ContractStateData::Cash(c) => wire_state::Data::Cash(WireCashState {
                amount: Some(c.amount.into()),
                owner: c.owner.to_vec(),
            }),
            ContractStateData::Asset(a) => wire_state::Data::Asset(WireAssetState {
                kind: a.kind,
                owner: a.owner.to_vec(),
            }),
        };
        WireState {
            contract: Some(s.contract.into()),
            data: Some(data),
        }
    }
}

impl From<TimestampCommand> for WireTimestamp {
    fn from(t: TimestampCommand) -> Self {
        WireTimestamp {
            after_ms: t.after_ms(),
            before_ms: t.before_ms(),
        }
    }
}

impl From<FixCommand> for WireFix {
    fn from(fix: FixCommand) -> Self {
        WireFix {
            index: fix.id.index,
            tenor: fix.id.tenor.to_string(),
            date_days: fix.id.date.num_days_from_ce(),
            rate_mantissa: fix.rate.mantissa,
            rate_scale: fix.rate.scale,
        }
    }
}

impl From<Command> for WireCommand {
    fn from(c: Command) -> Self {
        let data = match c.data {
            CommandData::Issue => wire_command::Data::Issue(WireIssue {}),
            CommandData::Move => wire_command::Data::Move(WireMove {}),
            CommandData::Timestamp(t) => wire_command::Data::Timestamp(t.into()),
            CommandData::Fix(f) => wire_command::Data::Fix(f.into()),
        };
        WireCommand {
            data: Some(data),
            signers: c.signers.iter().map(|k| k.to_vec()).collect(),
        }
    }
}

// --- Conversions: wire → domain ---

impl TryFrom<WireHash> for SecureHash {
    type Error = ModelError;

    fn try_from(w: WireHash) -> Result<Self, Self::Error> {
        SecureHash::from_tagged(w.algorithm, &w.digest).map_err(ModelError::BadHash)
    }
}

impl TryFrom<WireStateRef> for StateRef {
    type Error = ModelError;

    fn try_from(w: WireStateRef) -> Result<Self, Self::Error> {
        let txhash = w
            .txhash
            .ok_or_else(|| ModelError::MissingField("state ref txhash"))?
            .try_into()?;
        Ok(StateRef { txhash, index: w.index })
    }
}

impl TryFrom<WireAmount> for Amount {
    type Error = ModelError;

    fn try_from(w: WireAmount) -> Result<Self, Self::Error> {
        let currency: Currency = w
            .currency
            .parse()
            .map_err(ModelError::BadCurrency)?;
        Ok(Amount { quantity: w.quantity, currency })
    }
}

fn pubkey_from_wire(bytes: Vec<u8>) -> Result<PubKey, ModelError> {
    PubKey::try_from(bytes).map_err(|v| ModelError::BadKeyLength(v.len()))
}

impl TryFrom<WireState> for TransactionState {
    type Error = ModelError;

    fn try_from(w: WireState) -> Result<Self, Self::Error> {
        let contract = w
            .contract
            .ok_or_else(|| ModelError::MissingField("state contract hash"))?
            .try_into()?;
        let data = match w.data.ok_or_else(|| ModelError::MissingField("state data"))? {
            wire_state::Data::Cash(c) => ContractStateData::Cash(CashStateData {
                amount: c
                    .amount
                    .ok_or_else(|| ModelError::MissingField("cash amount"))?
                    .try_into()?,
                owner: pubkey_from_wire(c.owner)?,
            }),
            wire_state::Data::Asset(a) => ContractStateData::Asset(AssetStateData {
                kind: a.kind,
                owner: pubkey_from_wire(a.owner)?,
            }),
        };
        Ok(TransactionState { contract, data })
    }
}

impl TryFrom<WireTimestamp> for TimestampCommand {
    type Error = ModelError;

    fn try_from(w: WireTimestamp) -> Result<Self, Self::Error> {
        TimestampCommand::new(w.after_ms, w.before_ms).map_err(ModelError::BadCommand)
    }
}

impl TryFrom<WireFix> for FixCommand {
    type Error = ModelError;

    fn try_from(w: WireFix) -> Result<Self, Self::Error> {
        let tenor = w.tenor.parse().map_err(ModelError::BadCommand)?;
        let date = NaiveDate::from_num_days_from_ce_opt(w.date_days)
            .ok_or(ModelError::BadDate(w.date_days))?;
        Ok(FixCommand {
            id: FixId { index: w.index, tenor, date },
            rate: RateDecimal::new(w.rate_mantissa, w.rate_scale),
        })
    }
}

impl TryFrom<WireCommand> for Command {
    type Error = ModelError;

    fn try_from(w: WireCommand) -> Result<Self, Self::Error> {
        let data = match w.data.ok_or_else(|| ModelError::MissingField("command data"))? {
            wire_command::Data::Issue(_) => CommandData::Issue,
            wire_command::Data::Move(_) => CommandData::Move,
            wire_command::Data::Timestamp(t) => CommandData::Timestamp(t.try_into()?),
            wire_command::Data::Fix(f) => CommandData::Fix(f.try_into()?),
        };
        let signers = w
            .signers
            .into_iter()
            .map(pubkey_from_wire)
            .collect::<Result<Vec<_>, _>>()?;
        Command::new(data, signers).map_err(ModelError::BadCommand)
    }
}

impl From<crate::identity::DigitalSignature> for WireSignature {
    fn from(s: crate::identity::DigitalSignature) -> Self {
        WireSignature {
            by: s.by.to_vec(),
            sig: s.bytes.to_vec(),
        }
    }
}

impl TryFrom<WireSignature> for crate::identity::DigitalSignature {
    type Error = ModelError;

    fn try_from(w: WireSignature) -> Result<Self, Self::Error> {
        let by = pubkey_from_wire(w.by)?;
        let bytes = SigBytes::try_from(w.sig).map_err(|v| ModelError::BadSigLength(v.len()))?;
        Ok(crate::identity::DigitalSignature { by, bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn empty_transaction_encodes_to_nothing() {
        // Proto3 semantics: a transaction with no fields set is zero bytes.
        let msg = WireTransactionMsg::default();
        assert!(msg.encode_to_vec().is_empty());
    }

    #[test]
    fn oneof_tag_survives_round_trip() {
        let cmd = WireCommand {
            data: Some(wire_command::Data::Timestamp(WireTimestamp {
                after_ms: Some(5),
                before_ms: None,
            })),
            signers: vec![vec![1u8; 32]],
        };
        let bytes = cmd.encode_to_vec();
        let back = WireCommand::decode(&bytes[..]).unwrap();
        assert_eq!(back, cmd);
        assert!(matches!(back.data, Some(wire_command::Data::Timestamp(_))));
    }

    #[test]
    fn reencoding_is_byte_identical() {
        let state = WireState {
            contract: Some(WireHash { algorithm: 1, digest: vec![9u8; 32] }),
            data: Some(wire_state::Data::Cash(WireCashState {
                amount: Some(WireAmount { quantity: 1000, currency: "GBP".into() }),
                owner: vec![4u8; 32],
            })),
        };
        let first = state.encode_to_vec();
        let second = WireState::decode(&first[..]).unwrap().encode_to_vec();
        assert_eq!(first, second);
    }
}
