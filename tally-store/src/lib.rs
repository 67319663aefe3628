//! Tally Store
//!
//! The shared mutable resources of a node, each safe for concurrent access:
//! the content-addressed attachment store (atomic-rename publication), the
//! local transaction database (whole-set-or-nothing writes), and the wallet
//! (single-lock snapshot). Plus data-dir layout and the process-liveness lock.

pub mod attachments;
pub mod tx_store;
pub mod wallet;
pub mod data_dir;

pub use attachments::{AttachmentError, AttachmentStore, HashCheckingReader};
pub use tx_store::{TransactionStore, TxStoreError};
pub use wallet::{Wallet, WalletSnapshot};
pub use data_dir::{DataDir, ProcessLock, ProcessLockError};
