//! Shared fixtures for protocol integration tests: a node-in-a-box with
//! stores, wallet, contracts, and a running fetch responder.

// Each test binary compiles this module separately and uses a subset of it.
#![allow(dead_code)]

use std::sync::Arc;
use tally_contracts::{asset, cash};
use tally_ledger::ContractRegistry;
use tally_model::{
    Amount, Command, CommandData, Currency, IdentityMap, KeyPair, LedgerTransaction, PubKey,
    SignedTransaction, StateRef, TransactionBuilder,
};
use tally_net::{InMemoryNetwork, NodeAddress, NodeHandle};
use tally_protocol::{CancelHandle, FetchResponder, KeyStore, ServiceHub};
use tally_store::{AttachmentStore, TransactionStore, Wallet};

pub struct TestNode {
    pub hub: ServiceHub<NodeHandle>,
    pub identity: KeyPair,
    pub cancel: CancelHandle,
    pub responder: tokio::task::JoinHandle<()>,
    _tmp: tempfile::TempDir,
}

impl TestNode {
    pub fn new(net: &InMemoryNetwork, name: &str) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let endpoint = net.endpoint(NodeAddress::new(name));
        let tx_store = Arc::new(TransactionStore::open(tmp.path().join("transactions.redb")).unwrap());
        let attachments = Arc::new(AttachmentStore::open(tmp.path().join("attachments")).unwrap());

        let mut registry = ContractRegistry::new();
        registry.register(cash::contract_hash(), Arc::new(cash::CashContract));
        registry.register(asset::contract_hash(), Arc::new(asset::AssetContract));

        let identity = KeyPair::generate();
        let keys = Arc::new(KeyStore::new());
        keys.insert(identity.clone());
        let wallet = Arc::new(Wallet::new([identity.public_key()]));

        let (cancel, cancel_rx) = CancelHandle::new();
        let hub = ServiceHub::new(
            endpoint.clone(),
            tx_store.clone(),
            attachments.clone(),
            Arc::new(registry),
            Arc::new(IdentityMap::new()),
            wallet,
            keys,
            cancel_rx,
        );

        let responder = tokio::spawn(async move {
            let _ = FetchResponder::new(tx_store, attachments).serve(endpoint).await;
        });

        Self {
            hub,
            identity,
            cancel,
            responder,
            _tmp: tmp,
        }
    }

    pub fn address(&self) -> NodeAddress {
        self.hub.address().clone()
    }

    pub fn key(&self) -> PubKey {
        self.identity.public_key()
    }

    /// Record a transaction locally and fold it into the wallet.
    pub fn record(&self, tx: &SignedTransaction) {
        self.hub.tx_store.put_all(std::slice::from_ref(tx)).unwrap();
        let ledger = self.ledger_of(tx);
        self.hub.wallet.apply(&ledger);
    }

    fn ledger_of(&self, tx: &SignedTransaction) -> LedgerTransaction {
        let wire = tx.wire_transaction().unwrap();
        LedgerTransaction::resolve(&wire, &self.hub.identities, |r| {
            self.hub
                .tx_store
                .get(&r.txhash)
                .unwrap()
                .and_then(|parent| parent.wire_transaction().ok())
                .and_then(|w| w.outputs.get(r.index as usize).cloned())
        })
        .unwrap()
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.responder.abort();
    }
}

/// An issuance of cash to `owner`, signed by `owner`.
pub fn cash_issue(owner: &KeyPair, quantity: u64, currency: Currency) -> SignedTransaction {
    let mut b = TransactionBuilder::new();
    cash::generate_issue(&mut b, Amount::new(quantity, currency), owner.public_key()).unwrap();
    b.build().sign_with(&[owner])
}

/// An issuance of an asset to `owner`, signed by `owner`.
pub fn asset_issue(owner: &KeyPair, kind: &str) -> SignedTransaction {
    let mut b = TransactionBuilder::new();
    asset::generate_issue(&mut b, kind, owner.public_key()).unwrap();
    b.build().sign_with(&[owner])
}

/// Move the single cash output of `parent` to `to`, signed by `from`.
pub fn cash_move(
    parent: &SignedTransaction,
    from: &KeyPair,
    to: PubKey,
    quantity: u64,
    currency: Currency,
) -> SignedTransaction {
    let mut b = TransactionBuilder::new();
    b.add_input(StateRef::new(parent.id(), 0)).unwrap();
    b.add_output(cash::state(Amount::new(quantity, currency), to));
    b.add_command(Command::new(CommandData::Move, vec![from.public_key()]).unwrap());
    b.build().sign_with(&[from])
}

/// A minimal valid ZIP with one empty entry, usable as attachment bytes.
pub fn tiny_zip(entry_name: &str) -> Vec<u8> {
    let name = entry_name.as_bytes();
    let mut out = Vec::new();
    // Local file header.
    out.extend_from_slice(&[0x50, 0x4b, 0x03, 0x04]);
    out.extend_from_slice(&[20, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    out.extend_from_slice(&[0; 12]);
    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(name);
    // Central directory.
    let cd_offset = out.len() as u32;
    out.extend_from_slice(&[0x50, 0x4b, 0x01, 0x02]);
    out.extend_from_slice(&[20, 0, 20, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    out.extend_from_slice(&[0; 12]);
    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
    out.extend_from_slice(&[0; 8]); // extra, comment, disk, internal attrs
    out.extend_from_slice(&0u32.to_le_bytes()); // external attrs
    out.extend_from_slice(&0u32.to_le_bytes()); // local header offset
    out.extend_from_slice(name);
    let cd_len = out.len() as u32 - cd_offset;
    // End of central directory.
    out.extend_from_slice(&[0x50, 0x4b, 0x05, 0x06]);
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&cd_len.to_le_bytes());
    out.extend_from_slice(&cd_offset.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}
