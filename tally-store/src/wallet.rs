//! Wallet: the states we own
//!
//! Single-lock snapshot pattern: readers take the current snapshot by value
//! (an `Arc` clone inside the lock) and work on an immutable view; writers
//! build a new snapshot and swap it in atomically.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tally_model::{
    Amount, CashStateData, Currency, LedgerTransaction, PubKey, StateRef, TransactionState,
};

/// An immutable view of the wallet at one point in time.
#[derive(Debug, Default, Clone)]
pub struct WalletSnapshot {
    states: HashMap<StateRef, TransactionState>,
}

impl WalletSnapshot {
    pub fn states(&self) -> &HashMap<StateRef, TransactionState> {
        &self.states
    }

    /// Cash states in `currency`, ordered by producing reference so coin
    /// selection is deterministic.
    pub fn cash_in(&self, currency: Currency) -> Vec<(StateRef, CashStateData)> {
        let mut coins: Vec<(StateRef, CashStateData)> = self
            .states
            .iter()
            .filter_map(|(r, s)| {
                s.data
                    .as_cash()
                    .filter(|c| c.amount.currency == currency)
                    .map(|c| (*r, c.clone()))
            })
            .collect();
        coins.sort_by_key(|(r, _)| *r);
        coins
    }

    /// Total cash held in `currency`.
    pub fn balance(&self, currency: Currency) -> Amount {
        let quantity = self
            .cash_in(currency)
            .iter()
            .map(|(_, c)| c.amount.quantity)
            .sum();
        Amount::new(quantity, currency)
    }
}

/// Tracks the states owned by a set of keys.
#[derive(Debug)]
pub struct Wallet {
    keys: Mutex<BTreeSet<PubKey>>,
    snapshot: Mutex<Arc<WalletSnapshot>>,
}

impl Wallet {
    pub fn new(keys: impl IntoIterator<Item = PubKey>) -> Self {
        Self {
            keys: Mutex::new(keys.into_iter().collect()),
            snapshot: Mutex::new(Arc::new(WalletSnapshot::default())),
        }
    }

    /// Add a key whose states this wallet should track from now on.
    pub fn track_key(&self, key: PubKey) {
        self.keys.lock().expect("wallet lock poisoned").insert(key);
    }

    /// The current snapshot. Cheap; never blocks writers for long.
    pub fn snapshot(&self) -> Arc<WalletSnapshot> {
        self.snapshot.lock().expect("wallet lock poisoned").clone()
    }

    /// Fold a validated transaction into the wallet: consumed references
    /// leave, outputs owned by a tracked key arrive. Replaces the snapshot
    /// atomically.
    pub fn apply(&self, tx: &LedgerTransaction) {
        let keys = self.keys.lock().expect("wallet lock poisoned").clone();
        let mut guard = self.snapshot.lock().expect("wallet lock poisoned");
        let mut next = (**guard).clone();
        for (consumed, _) in &tx.inputs {
            next.states.remove(consumed);
        }
        for (index, output) in tx.outputs.iter().enumerate() {
            if output.data.owner().is_some_and(|k| keys.contains(&k)) {
                next.states
                    .insert(StateRef::new(tx.hash, index as u32), output.clone());
            }
        }
        *guard = Arc::new(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_contracts::cash;
    use tally_model::{
        Command, CommandData, IdentityMap, KeyPair, TransactionBuilder, WireTransaction,
    };

    fn ledger_issue(owner: &KeyPair, quantity: u64) -> LedgerTransaction {
        let mut b = TransactionBuilder::new();
        b.add_output(cash::state(
            Amount::new(quantity, Currency::USD),
            owner.public_key(),
        ));
        b.add_command(Command::new(CommandData::Issue, vec![owner.public_key()]).unwrap());
        resolve(&b.build(), |_| None)
    }

    fn resolve(
        wire: &WireTransaction,
        lookup: impl FnMut(&StateRef) -> Option<TransactionState>,
    ) -> LedgerTransaction {
        LedgerTransaction::resolve(wire, &IdentityMap::new(), lookup).unwrap()
    }

    #[test]
    fn apply_tracks_owned_outputs_only() {
        let me = KeyPair::generate();
        let someone_else = KeyPair::generate();
        let wallet = Wallet::new([me.public_key()]);

        wallet.apply(&ledger_issue(&me, 300));
        wallet.apply(&ledger_issue(&someone_else, 999));

        let snap = wallet.snapshot();
        assert_eq!(snap.balance(Currency::USD).quantity, 300);
        assert_eq!(snap.cash_in(Currency::USD).len(), 1);
    }

    #[test]
    fn spend_removes_consumed_states() {
        let me = KeyPair::generate();
        let payee = KeyPair::generate();
        let wallet = Wallet::new([me.public_key()]);

        let issue = ledger_issue(&me, 500);
        wallet.apply(&issue);
        let coins = wallet.snapshot().cash_in(Currency::USD);
        assert_eq!(coins.len(), 1);

        let mut b = TransactionBuilder::new();
        cash::generate_spend(
            &mut b,
            &coins,
            Amount::new(500, Currency::USD),
            payee.public_key(),
            me.public_key(),
        )
        .unwrap();
        let spend = resolve(&b.build(), |r| {
            coins
                .iter()
                .find(|(cr, _)| cr == r)
                .map(|(_, c)| cash::state(c.amount, c.owner))
        });
        wallet.apply(&spend);

        assert_eq!(wallet.snapshot().balance(Currency::USD).quantity, 0);
    }

    #[test]
    fn snapshot_is_immutable_under_writes() {
        let me = KeyPair::generate();
        let wallet = Wallet::new([me.public_key()]);
        wallet.apply(&ledger_issue(&me, 100));

        let before = wallet.snapshot();
        wallet.apply(&ledger_issue(&me, 100));

        // The old snapshot still sees the old balance.
        assert_eq!(before.balance(Currency::USD).quantity, 100);
        assert_eq!(wallet.snapshot().balance(Currency::USD).quantity, 200);
    }
}
