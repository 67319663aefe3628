//! Protocol context
//!
//! A [`ServiceHub`] bundles the collaborators one protocol instance talks to:
//! the messaging endpoint, the local stores, the contract registry, the
//! wallet, and the key store. Its send/receive helpers are the protocol
//! suspension points, and every one of them races the cancel signal —
//! cancellation is cooperative and only observable at suspension points.

use crate::ProtocolError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tally_ledger::ContractRegistry;
use tally_model::{DigitalSignature, IdentityMap, KeyPair, PubKey};
use tally_net::{MessagingService, NodeAddress};
use tally_store::{AttachmentStore, TransactionStore, Wallet};
use tokio::sync::watch;

/// Signing keys this node controls, including per-conversation fresh keys.
#[derive(Default)]
pub struct KeyStore {
    keys: Mutex<HashMap<PubKey, KeyPair>>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, keypair: KeyPair) -> PubKey {
        let public = keypair.public_key();
        self.keys.lock().expect("key store lock poisoned").insert(public, keypair);
        public
    }

    /// Generate and retain a fresh key, e.g. for receiving change.
    pub fn fresh_key(&self) -> PubKey {
        self.insert(KeyPair::generate())
    }

    /// Sign `message` with the named key, if we hold it.
    pub fn sign_with(&self, key: &PubKey, message: &[u8]) -> Option<DigitalSignature> {
        self.keys
            .lock()
            .expect("key store lock poisoned")
            .get(key)
            .map(|kp| kp.sign(message))
    }
}

/// Hands a running protocol its cancel signal.
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, rx)
    }

    /// Request cooperative cancellation; the protocol observes it at its next
    /// suspension point.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Everything a protocol instance needs, bundled.
pub struct ServiceHub<M: MessagingService> {
    pub endpoint: M,
    pub tx_store: Arc<TransactionStore>,
    pub attachments: Arc<AttachmentStore>,
    pub registry: Arc<ContractRegistry>,
    pub identities: Arc<IdentityMap>,
    pub wallet: Arc<Wallet>,
    pub keys: Arc<KeyStore>,
    cancel: watch::Receiver<bool>,
}

impl<M: MessagingService> ServiceHub<M> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        endpoint: M,
        tx_store: Arc<TransactionStore>,
        attachments: Arc<AttachmentStore>,
        registry: Arc<ContractRegistry>,
        identities: Arc<IdentityMap>,
        wallet: Arc<Wallet>,
        keys: Arc<KeyStore>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            endpoint,
            tx_store,
            attachments,
            registry,
            identities,
            wallet,
            keys,
            cancel,
        }
    }

    pub fn address(&self) -> &NodeAddress {
        self.endpoint.address()
    }

    /// Allocate a session id for a fresh conversation.
    pub fn fresh_session(&self) -> u64 {
        rand::random()
    }

    fn check_cancelled(&self) -> Result<(), ProtocolError> {
        if *self.cancel.borrow() {
            return Err(ProtocolError::Cancelled);
        }
        Ok(())
    }

    /// Suspension point: send.
    pub async fn send(
        &self,
        to: &NodeAddress,
        topic: &str,
        session_id: u64,
        payload: Vec<u8>,
    ) -> Result<(), ProtocolError> {
        self.check_cancelled()?;
        self.endpoint.send(to, topic, session_id, payload).await?;
        Ok(())
    }

    /// Suspension point: receive. Races the cancel signal.
    pub async fn receive(&self, topic: &str, session_id: u64) -> Result<Vec<u8>, ProtocolError> {
        self.check_cancelled()?;
        let mut cancel = self.cancel.clone();
        tokio::select! {
            _ = cancel.changed() => Err(ProtocolError::Cancelled),
            result = self.endpoint.receive(topic, session_id) => Ok(result?),
        }
    }

    /// Suspension point: send then await the reply on `receive_topic`, same
    /// session.
    pub async fn send_and_receive(
        &self,
        to: &NodeAddress,
        send_topic: &str,
        receive_topic: &str,
        session_id: u64,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, ProtocolError> {
        self.send(to, send_topic, session_id, payload).await?;
        self.receive(receive_topic, session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_net::{InMemoryNetwork, NodeAddress};

    fn hub(endpoint: tally_net::NodeHandle, cancel: watch::Receiver<bool>) -> ServiceHub<tally_net::NodeHandle> {
        let tmp = tempfile::tempdir().unwrap();
        ServiceHub::new(
            endpoint,
            Arc::new(TransactionStore::open(tmp.path().join("tx.redb")).unwrap()),
            Arc::new(AttachmentStore::open(tmp.path().join("attachments")).unwrap()),
            Arc::new(ContractRegistry::new()),
            Arc::new(IdentityMap::new()),
            Arc::new(Wallet::new([])),
            Arc::new(KeyStore::new()),
            cancel,
        )
    }

    #[tokio::test]
    async fn cancel_interrupts_a_blocked_receive() {
        let net = InMemoryNetwork::new();
        let endpoint = net.endpoint(NodeAddress::new("node"));
        let (handle, cancel) = CancelHandle::new();
        let hub = hub(endpoint, cancel);

        let waiter = tokio::spawn(async move { hub.receive("nothing.coming", 1).await });
        tokio::task::yield_now().await;
        handle.cancel();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(ProtocolError::Cancelled)));
    }

    #[tokio::test]
    async fn cancelled_hub_refuses_new_suspensions() {
        let net = InMemoryNetwork::new();
        let endpoint = net.endpoint(NodeAddress::new("node"));
        let (handle, cancel) = CancelHandle::new();
        handle.cancel();
        let hub = hub(endpoint, cancel);

        let err = hub
            .send(&NodeAddress::new("peer"), "t", 1, vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Cancelled));
    }

    #[test]
    fn key_store_signs_with_held_keys_only() {
        let keys = KeyStore::new();
        let held = keys.fresh_key();
        assert!(keys.sign_with(&held, b"m").is_some());
        let foreign = KeyPair::generate().public_key();
        assert!(keys.sign_with(&foreign, b"m").is_none());
    }
}
