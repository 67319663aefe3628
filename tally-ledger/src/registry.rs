//! Contract registry
//!
//! States reference their governing contract by code hash; the registry maps
//! those hashes back to implementations. Populated once at node start; the
//! validator only reads it.

use std::collections::HashMap;
use std::sync::Arc;
use tally_model::{Contract, SecureHash};

#[derive(Default)]
pub struct ContractRegistry {
    contracts: HashMap<SecureHash, Arc<dyn Contract>>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, code_hash: SecureHash, contract: Arc<dyn Contract>) {
        self.contracts.insert(code_hash, contract);
    }

    pub fn lookup(&self, code_hash: &SecureHash) -> Option<&Arc<dyn Contract>> {
        self.contracts.get(code_hash)
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }
}

impl std::fmt::Debug for ContractRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContractRegistry")
            .field("contracts", &self.contracts.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_model::{sha256, ContractRejection, TransactionForVerification};

    struct AcceptAll;

    impl Contract for AcceptAll {
        fn verify(&self, _tx: &TransactionForVerification) -> Result<(), ContractRejection> {
            Ok(())
        }

        fn legal_reference(&self) -> SecureHash {
            sha256(b"accept-all prose")
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut reg = ContractRegistry::new();
        let hash = sha256(b"accept-all");
        assert!(reg.lookup(&hash).is_none());
        reg.register(hash, Arc::new(AcceptAll));
        assert!(reg.lookup(&hash).is_some());
    }
}
