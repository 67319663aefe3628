//! Tally Ledger
//!
//! The consensus-critical half of transaction acceptance: a registry mapping
//! contract hashes to implementations, and the group validator that enforces
//! single-spend and runs contract verification over a set of transactions.

pub mod registry;
pub mod group;

pub use registry::ContractRegistry;
pub use group::{TransactionGroup, VerifyError};
