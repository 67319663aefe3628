//! Tally Net
//!
//! The messaging collaborator: opaque payloads tagged `(topic, session id)`,
//! recipients addressed by an opaque [`NodeAddress`]. Within one
//! `(peer, session)` pair messages arrive in order; across sessions nothing
//! is assumed. The real transport lives outside the core; the in-memory
//! [`memory::InMemoryNetwork`] is enough to run every protocol end to end.

pub mod topics;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::{InMemoryNetwork, NodeHandle};

/// Opaque address of a node on the messaging fabric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeAddress(pub String);

impl NodeAddress {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl std::fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Error, Debug)]
pub enum NetError {
    #[error("unknown recipient {0}")]
    UnknownRecipient(NodeAddress),

    #[error("messaging fabric shut down")]
    Disconnected,
}

/// Send/receive of opaque payloads. The three methods are the only suspension
/// points a protocol may block on (plus sub-protocol calls, which bottom out
/// here too).
#[async_trait]
pub trait MessagingService: Send + Sync {
    /// Our own address, for counterparties to reply to.
    fn address(&self) -> &NodeAddress;

    /// Deliver `payload` to `to`, tagged with `(topic, session_id)`.
    async fn send(
        &self,
        to: &NodeAddress,
        topic: &str,
        session_id: u64,
        payload: Vec<u8>,
    ) -> Result<(), NetError>;

    /// Await the next payload tagged `(topic, session_id)`.
    async fn receive(&self, topic: &str, session_id: u64) -> Result<Vec<u8>, NetError>;

    /// Send on one topic and await the reply on another, same session.
    async fn send_and_receive(
        &self,
        to: &NodeAddress,
        send_topic: &str,
        receive_topic: &str,
        session_id: u64,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, NetError> {
        self.send(to, send_topic, session_id, payload).await?;
        self.receive(receive_topic, session_id).await
    }
}
