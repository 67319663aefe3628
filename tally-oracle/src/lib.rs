//! Tally Oracle
//!
//! External fact authorities: the timestamping authority witnesses that a
//! transaction's declared time window brackets true time, and the rate oracle
//! attests interest-rate fixes. Both sign with legally-identifiable
//! signatures and never verify the rest of the transaction.

pub mod messages;
pub mod timestamper;
pub mod rates;

pub use timestamper::{FixedClock, TimeSource, TimestampingAuthority, UtcClock};
pub use rates::RateOracle;

use tally_model::{FixId, SecureHash};
use thiserror::Error;

/// Oracle failures, surfaced to the requesting protocol.
#[derive(Error, Debug)]
pub enum OracleError {
    #[error("transaction {tx} carries no timestamp command")]
    TimestampMissing { tx: SecureHash },

    #[error("timestamp command of {tx} does not require our signature")]
    NotAddressedToUs { tx: SecureHash },

    #[error(
        "true time {now_ms} outside declared window [{after}, {before}] of transaction {tx}"
    )]
    TimestampOutsideWindow {
        tx: SecureHash,
        now_ms: u64,
        after: String,
        before: String,
    },

    #[error("no fix known matching {0}")]
    UnknownFix(FixId),

    #[error("transaction {tx} has no fix command requiring our signature")]
    NothingToAttest { tx: SecureHash },

    #[error("malformed fix line {line}: {reason}")]
    MalformedFixLine { line: usize, reason: String },

    #[error("malformed transaction: {0}")]
    Malformed(#[from] tally_model::ModelError),
}
