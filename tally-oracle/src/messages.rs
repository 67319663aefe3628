//! Oracle wire messages
//!
//! Requests arrive on the oracle's well-known session-0 topic and carry the
//! requester's address and reply session; responses go back on the
//! `<oracle>.<op>.<session>` topic of the requester's session.

use tally_model::wire::{WireFix, WirePartySignature};

/// The session an oracle listens on for new requests.
pub const ORACLE_LISTEN_SESSION: u64 = 0;

#[derive(Clone, PartialEq, prost::Message)]
pub struct SignRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub wire_bytes: Vec<u8>,
    #[prost(string, tag = "2")]
    pub reply_to: String,
    #[prost(uint64, tag = "3")]
    pub reply_session: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SignResponse {
    #[prost(message, optional, tag = "1")]
    pub sig: Option<WirePartySignature>,
    #[prost(string, optional, tag = "2")]
    pub error: Option<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct FixQuery {
    #[prost(string, tag = "1")]
    pub index: String,
    #[prost(string, tag = "2")]
    pub tenor: String,
    /// Days since the common era, matching the canonical fix encoding.
    #[prost(int32, tag = "3")]
    pub date_days: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct QueryRequest {
    #[prost(message, repeated, tag = "1")]
    pub queries: Vec<FixQuery>,
    #[prost(string, tag = "2")]
    pub reply_to: String,
    #[prost(uint64, tag = "3")]
    pub reply_session: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct FixResult {
    #[prost(message, optional, tag = "1")]
    pub fix: Option<WireFix>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct QueryResponse {
    /// One result per query, in request order; an unknown fix is empty.
    #[prost(message, repeated, tag = "1")]
    pub results: Vec<FixResult>,
}
