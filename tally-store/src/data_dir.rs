//! Data directory layout and process liveness
//!
//! One directory per node:
//! - `identity.key` — Ed25519 private key
//! - `attachments/` — content-addressed blobs
//! - `transactions.redb` — local transaction database
//! - `process-id` — pid file, advisory-locked while the node runs

use std::fs::{File, OpenOptions, TryLockError};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct DataDir {
    base: PathBuf,
}

impl DataDir {
    /// Create a DataDir with a custom base path.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Get the base directory path.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Get the path to the identity key file.
    pub fn identity_key(&self) -> PathBuf {
        self.base.join("identity.key")
    }

    /// Get the path to the attachment store directory.
    pub fn attachments_dir(&self) -> PathBuf {
        self.base.join("attachments")
    }

    /// Get the path to the transaction database.
    pub fn transactions_db(&self) -> PathBuf {
        self.base.join("transactions.redb")
    }

    /// Get the path to the process-id file.
    pub fn process_id_file(&self) -> PathBuf {
        self.base.join("process-id")
    }

    /// Ensure base directories exist.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base)?;
        std::fs::create_dir_all(self.attachments_dir())?;
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum ProcessLockError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("another instance already holds the lock on {0}")]
    AlreadyRunning(PathBuf),
}

/// Holds the advisory lock on the data dir's pid file for the process's
/// lifetime. Dropping the lock (or exiting) releases it.
#[derive(Debug)]
pub struct ProcessLock {
    _file: File,
    path: PathBuf,
}

impl ProcessLock {
    /// Write our pid into `<base>/process-id` and take an exclusive advisory
    /// lock on it. A second instance fails here and must exit non-zero.
    pub fn acquire(data_dir: &DataDir) -> Result<Self, ProcessLockError> {
        data_dir.ensure_dirs()?;
        let path = data_dir.process_id_file();
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(ProcessLockError::AlreadyRunning(path));
            }
            Err(TryLockError::Error(e)) => return Err(e.into()),
        }
        file.set_len(0)?;
        write!(file, "{}", std::process::id())?;
        file.sync_all()?;
        tracing::info!(path = %path.display(), pid = std::process::id(), "process lock acquired");
        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
