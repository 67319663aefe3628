//! Local transaction database
//!
//! Stores validated signed transactions keyed by id. The one write path,
//! [`TransactionStore::put_all`], commits a whole set in a single write
//! transaction: a partially recorded dependency closure would break the
//! validated-predecessor invariant for everything downstream.

use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::Path;
use tally_model::{ModelError, SecureHash, SignedTransaction};
use thiserror::Error;

const TRANSACTIONS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("transactions");

#[derive(Error, Debug)]
pub enum TxStoreError {
    #[error("database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("stored transaction is malformed: {0}")]
    Malformed(#[from] ModelError),

    #[error("id {0} already stored with different bytes")]
    ConflictingPayload(SecureHash),
}

/// Single-writer transaction database over redb.
pub struct TransactionStore {
    db: Database,
}

impl TransactionStore {
    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TxStoreError> {
        if let Some(parent) = path.as_ref().parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let db = Database::builder().create(path.as_ref())?;
        // Make sure the table exists so readers never race its creation.
        let write_txn = db.begin_write()?;
        write_txn.open_table(TRANSACTIONS)?;
        write_txn.commit()?;
        Ok(Self { db })
    }

    pub fn contains(&self, id: &SecureHash) -> Result<bool, TxStoreError> {
        Ok(self.get(id)?.is_some())
    }

    pub fn get(&self, id: &SecureHash) -> Result<Option<SignedTransaction>, TxStoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TRANSACTIONS)?;
        match table.get(id.as_bytes().as_slice())? {
            Some(value) => Ok(Some(SignedTransaction::decode(value.value())?)),
            None => Ok(None),
        }
    }

    /// Record a set of transactions atomically: either every one is written
    /// or none is. Re-inserting an already-stored transaction with identical
    /// bytes is a no-op; the same id with different bytes is corruption.
    pub fn put_all(&self, txs: &[SignedTransaction]) -> Result<(), TxStoreError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(TRANSACTIONS)?;
            for tx in txs {
                let id = tx.id();
                let encoded = tx.encode_to_vec();
                if let Some(existing) = table.get(id.as_bytes().as_slice())? {
                    if existing.value() != encoded.as_slice() {
                        return Err(TxStoreError::ConflictingPayload(id));
                    }
                    continue;
                }
                table.insert(id.as_bytes().as_slice(), encoded.as_slice())?;
            }
        }
        write_txn.commit()?;
        tracing::debug!(count = txs.len(), "transactions recorded");
        Ok(())
    }

    pub fn len(&self) -> Result<u64, TxStoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TRANSACTIONS)?;
        Ok(table.len()?)
    }

    pub fn is_empty(&self) -> Result<bool, TxStoreError> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_contracts::cash;
    use tally_model::{Amount, Command, CommandData, Currency, KeyPair, TransactionBuilder};

    fn issue_tx(owner: &KeyPair, quantity: u64) -> SignedTransaction {
        let mut b = TransactionBuilder::new();
        b.add_output(cash::state(
            Amount::new(quantity, Currency::GBP),
            owner.public_key(),
        ));
        b.add_command(Command::new(CommandData::Issue, vec![owner.public_key()]).unwrap());
        b.build().sign_with(&[owner])
    }

    fn open_store() -> (tempfile::TempDir, TransactionStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = TransactionStore::open(tmp.path().join("transactions.redb")).unwrap();
        (tmp, store)
    }

    #[test]
    fn put_get_round_trip() {
        let (_tmp, store) = open_store();
        let kp = KeyPair::generate();
        let tx = issue_tx(&kp, 100);

        assert!(!store.contains(&tx.id()).unwrap());
        store.put_all(std::slice::from_ref(&tx)).unwrap();
        assert!(store.contains(&tx.id()).unwrap());
        assert_eq!(store.get(&tx.id()).unwrap().unwrap(), tx);
    }

    #[test]
    fn reinsert_identical_is_idempotent() {
        let (_tmp, store) = open_store();
        let kp = KeyPair::generate();
        let tx = issue_tx(&kp, 100);
        store.put_all(std::slice::from_ref(&tx)).unwrap();
        store.put_all(std::slice::from_ref(&tx)).unwrap();
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn put_all_is_atomic_on_conflict() {
        let (_tmp, store) = open_store();
        let kp = KeyPair::generate();
        let stored = issue_tx(&kp, 100);
        store.put_all(std::slice::from_ref(&stored)).unwrap();

        // Same wire bytes, different signature set: same id, different bytes.
        let conflicting = SignedTransaction::new(stored.wire_bytes().to_vec(), vec![]);
        let fresh = issue_tx(&kp, 200);
        let err = store
            .put_all(&[fresh.clone(), conflicting])
            .unwrap_err();
        assert!(matches!(err, TxStoreError::ConflictingPayload(id) if id == stored.id()));

        // The aborted batch must not have written the fresh transaction.
        assert!(!store.contains(&fresh.id()).unwrap());
    }
}
