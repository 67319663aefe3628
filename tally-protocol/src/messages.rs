//! Protocol wire messages
//!
//! Fetch requests land on the counterparty's well-known session-0 topic and
//! carry the requester's address and reply session. Trade messages flow on
//! the trade topics under the conversation's session id.

use tally_model::wire::{
    WireAmount, WireHash, WirePartySignature, WireSignature, WireSignedTransaction, WireStateRef,
};

/// The session a node's fetch responder listens on.
pub const FETCH_LISTEN_SESSION: u64 = 0;

#[derive(Clone, PartialEq, prost::Message)]
pub struct FetchTransactionsRequest {
    #[prost(message, repeated, tag = "1")]
    pub tx_ids: Vec<WireHash>,
    #[prost(string, tag = "2")]
    pub reply_to: String,
    #[prost(uint64, tag = "3")]
    pub reply_session: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MaybeSignedTransaction {
    #[prost(message, optional, tag = "1")]
    pub tx: Option<WireSignedTransaction>,
}

/// One element per requested id, in request order; unknown ids are empty.
#[derive(Clone, PartialEq, prost::Message)]
pub struct FetchTransactionsResponse {
    #[prost(message, repeated, tag = "1")]
    pub transactions: Vec<MaybeSignedTransaction>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct FetchAttachmentsRequest {
    #[prost(message, repeated, tag = "1")]
    pub ids: Vec<WireHash>,
    #[prost(string, tag = "2")]
    pub reply_to: String,
    #[prost(uint64, tag = "3")]
    pub reply_session: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MaybeAttachment {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub data: Option<Vec<u8>>,
}

/// One element per requested id, in request order; unknown or quarantined
/// attachments are empty.
#[derive(Clone, PartialEq, prost::Message)]
pub struct FetchAttachmentsResponse {
    #[prost(message, repeated, tag = "1")]
    pub attachments: Vec<MaybeAttachment>,
}

/// Opens a trade: what is for sale, for how much, and where the payment goes.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SellerTradeInfo {
    #[prost(message, optional, tag = "1")]
    pub asset_ref: Option<WireStateRef>,
    #[prost(message, optional, tag = "2")]
    pub price: Option<WireAmount>,
    /// The seller's key the cash outputs must be owned by.
    #[prost(bytes = "vec", tag = "3")]
    pub seller_owner_key: Vec<u8>,
    #[prost(uint64, tag = "4")]
    pub session_id: u64,
}

/// The signatures that seal the trade, sent seller → buyer.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SignaturesResponse {
    #[prost(message, optional, tag = "1")]
    pub tsa_sig: Option<WirePartySignature>,
    #[prost(message, optional, tag = "2")]
    pub seller_sig: Option<WireSignature>,
}
