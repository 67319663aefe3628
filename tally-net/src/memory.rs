//! In-memory messaging fabric
//!
//! A shared broker routes payloads between [`NodeHandle`]s over tokio
//! channels, one channel per `(topic, session)` pair so ordering holds within
//! a session and nothing is assumed across sessions. Enables multi-node
//! protocol testing without real networking.

use crate::{MessagingService, NetError, NodeAddress};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

type Key = (String, u64);

struct Mailbox {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl Mailbox {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        }
    }
}

#[derive(Default)]
struct Mailboxes {
    by_key: Mutex<HashMap<Key, Mailbox>>,
}

impl Mailboxes {
    fn sender(&self, key: Key) -> mpsc::UnboundedSender<Vec<u8>> {
        let mut map = self.by_key.lock().expect("mailbox lock poisoned");
        map.entry(key).or_insert_with(Mailbox::new).tx.clone()
    }

    fn receiver(&self, key: Key) -> Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>> {
        let mut map = self.by_key.lock().expect("mailbox lock poisoned");
        map.entry(key).or_insert_with(Mailbox::new).rx.clone()
    }
}

/// Shared broker — routes payloads between registered endpoints.
#[derive(Clone, Default)]
pub struct InMemoryNetwork {
    nodes: Arc<Mutex<HashMap<NodeAddress, Arc<Mailboxes>>>>,
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or look up) the endpoint for `address`.
    pub fn endpoint(&self, address: NodeAddress) -> NodeHandle {
        let mailboxes = {
            let mut nodes = self.nodes.lock().expect("network lock poisoned");
            nodes
                .entry(address.clone())
                .or_insert_with(|| Arc::new(Mailboxes::default()))
                .clone()
        };
        NodeHandle {
            address,
            network: self.clone(),
            mailboxes,
        }
    }

    fn mailboxes_of(&self, address: &NodeAddress) -> Option<Arc<Mailboxes>> {
        self.nodes
            .lock()
            .expect("network lock poisoned")
            .get(address)
            .cloned()
    }
}

/// One node's endpoint on the in-memory fabric.
#[derive(Clone)]
pub struct NodeHandle {
    address: NodeAddress,
    network: InMemoryNetwork,
    mailboxes: Arc<Mailboxes>,
}

#[async_trait]
impl MessagingService for NodeHandle {
    fn address(&self) -> &NodeAddress {
        &self.address
    }

    async fn send(
        &self,
        to: &NodeAddress,
        topic: &str,
        session_id: u64,
        payload: Vec<u8>,
    ) -> Result<(), NetError> {
        let target = self
            .network
            .mailboxes_of(to)
            .ok_or_else(|| NetError::UnknownRecipient(to.clone()))?;
        tracing::trace!(from = %self.address, to = %to, topic, session_id, "send");
        target
            .sender((topic.to_string(), session_id))
            .send(payload)
            .map_err(|_| NetError::Disconnected)
    }

    async fn receive(&self, topic: &str, session_id: u64) -> Result<Vec<u8>, NetError> {
        let rx = self.mailboxes.receiver((topic.to_string(), session_id));
        let mut rx = rx.lock().await;
        rx.recv().await.ok_or(NetError::Disconnected)
    }
}
