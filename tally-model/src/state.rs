//! Ledger states and references
//!
//! A state is an immutable record governed by a contract (referenced by the
//! hash of its code). States are created as outputs of one transaction and
//! destroyed as inputs of a later one; in between they never change.

use crate::types::{PubKey, SecureHash};
use std::fmt;

/// Points at one output of a known transaction: `(transaction id, output index)`.
///
/// A state's identity is its producing reference, not a hash of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateRef {
    pub txhash: SecureHash,
    pub index: u32,
}

impl StateRef {
    pub fn new(txhash: SecureHash, index: u32) -> Self {
        Self { txhash, index }
    }
}

impl fmt::Display for StateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.txhash, self.index)
    }
}

/// An ISO-4217-style three-letter currency code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Currency(pub [u8; 3]);

impl Currency {
    pub const GBP: Currency = Currency(*b"GBP");
    pub const USD: Currency = Currency(*b"USD");
    pub const CHF: Currency = Currency(*b"CHF");

    pub fn as_str(&self) -> &str {
        // Always constructed from ASCII
        std::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl std::str::FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes: [u8; 3] = s
            .as_bytes()
            .try_into()
            .map_err(|_| format!("currency code must be 3 characters, got {:?}", s))?;
        Ok(Currency(bytes))
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A quantity of money in a currency's smallest unit.
///
/// Integer only — contract-visible fields never use floating point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Amount {
    pub quantity: u64,
    pub currency: Currency,
}

impl Amount {
    pub fn new(quantity: u64, currency: Currency) -> Self {
        Self { quantity, currency }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.quantity, self.currency)
    }
}

/// Cash: an amount owned by a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CashStateData {
    pub amount: Amount,
    pub owner: PubKey,
}

/// A non-fungible ownable asset, typed by `kind`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetStateData {
    pub kind: String,
    pub owner: PubKey,
}

/// State payload: a tagged sum with one variant per concrete state type.
///
/// The canonical serializer preserves the tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractStateData {
    Cash(CashStateData),
    Asset(AssetStateData),
}

impl ContractStateData {
    /// The owning key, for ownable states.
    pub fn owner(&self) -> Option<PubKey> {
        match self {
            ContractStateData::Cash(c) => Some(c.owner),
            ContractStateData::Asset(a) => Some(a.owner),
        }
    }

    pub fn as_cash(&self) -> Option<&CashStateData> {
        match self {
            ContractStateData::Cash(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_asset(&self) -> Option<&AssetStateData> {
        match self {
            ContractStateData::Asset(a) => Some(a),
            _ => None,
        }
    }
}

/// A state as carried by a transaction: contract reference plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionState {
    /// Hash of the code of the contract governing this state.
    pub contract: SecureHash,
    pub data: ContractStateData,
}

impl TransactionState {
    pub fn new(contract: SecureHash, data: ContractStateData) -> Self {
        Self { contract, data }
    }
}
