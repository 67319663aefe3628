//! Tally Model
//!
//! Pure data types and traits for the Tally ledger, decoupled from
//! storage engines, network stacks, and protocol state machines.

pub mod types;
pub mod crypto;
pub mod identity;
pub mod state;
pub mod command;
pub mod wire;
pub mod transaction;
pub mod contract;

// Re-exports from dependencies
pub use chrono::NaiveDate;
pub use types::{PubKey, SecureHash, SigBytes};
pub use crypto::{sha256, verify_signature, CryptoError};
pub use identity::{DigitalSignature, IdentityMap, KeyPair, Party, PartySignature};
pub use state::{Amount, AssetStateData, CashStateData, ContractStateData, Currency, StateRef, TransactionState};
pub use command::{Command, CommandData, CommandError, FixCommand, FixId, RateDecimal, Tenor, TimestampCommand};
pub use transaction::{LedgerTransaction, ModelError, SignedTransaction, TransactionBuilder, WireTransaction};
pub use contract::{Contract, ContractRejection, TransactionForVerification};
