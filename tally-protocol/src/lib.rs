//! Tally Protocol
//!
//! The long-running conversations of the system: pulling a transaction's
//! ancestry from a counterparty and re-verifying it ([`resolver`]), serving
//! those pulls ([`fetch_server`]), and the delivery-versus-payment trade
//! ([`trade`]). Protocols are sequential async tasks whose only suspension
//! points are `send`, `receive`, `send_and_receive`, and sub-protocol calls;
//! contract verification itself never suspends.

pub mod context;
pub mod messages;
pub mod resolver;
pub mod fetch_server;
pub mod trade;

pub use context::{CancelHandle, KeyStore, ServiceHub};
pub use fetch_server::FetchResponder;
pub use resolver::{ResolutionOutcome, ResolveTransactions, MAX_GRAPH_SIZE};
pub use trade::{run_buyer, run_seller, BuyerParams, BuyerState, SellerParams, SellerState, TradeOutcome};

use tally_model::{Amount, ModelError, PubKey, SecureHash};
use thiserror::Error;

/// Protocol failures. Nothing here is retried by the core; the conversation
/// surfaces the error and the caller decides whether to abort.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("messaging error: {0}")]
    Net(#[from] tally_net::NetError),

    #[error("cancelled")]
    Cancelled,

    #[error("peer response incomplete: no transaction returned for {missing}")]
    PeerResponseIncomplete { missing: SecureHash },

    #[error("peer returned transaction {got} where {requested} was asked for")]
    WrongTransactionReturned {
        requested: SecureHash,
        got: SecureHash,
    },

    #[error("attachment corrupt: requested {requested}, bytes hash to {got}")]
    AttachmentCorrupt {
        requested: SecureHash,
        got: SecureHash,
    },

    #[error("dependency graph exceeded {limit} transactions")]
    GraphTooLarge { limit: usize },

    #[error("group verification failed: {0}")]
    Verify(#[from] tally_ledger::VerifyError),

    #[error("transaction store error: {0}")]
    Store(#[from] tally_store::TxStoreError),

    #[error("attachment store error: {0}")]
    Attachment(#[from] tally_store::AttachmentError),

    #[error("malformed message: {0}")]
    Model(#[from] ModelError),

    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("unacceptable price: asked {price}, willing to pay at most {max}")]
    UnacceptablePrice { price: Amount, max: Amount },

    #[error("asset mismatch: expected kind {expected:?}, offered {got:?}")]
    AssetMismatch { expected: String, got: String },

    #[error("wrong payment amount: expected {expected}, proposal pays {got}")]
    WrongPaymentAmount { expected: Amount, got: u64 },

    #[error("unexpected missing signatures: {unexpected:?}")]
    UnexpectedMissingSignatures { unexpected: Vec<PubKey> },

    #[error("timestamping authority refused: {0}")]
    TimestampRefused(String),

    #[error("final verification failed: {0}")]
    FinalVerify(String),

    #[error("cannot build spend: {0}")]
    Spend(#[from] tally_contracts::cash::SpendError),

    #[error("peer sent an unexpected message: {0}")]
    UnexpectedMessage(&'static str),
}
