//! Key-value persistence for session state.
//!
//! This module provides:
//! - `KeyValueStore`: the async string store the session manager writes to
//! - `FileStore`: a single JSON file under the platform data directory
//! - `KeyringStore`: one OS keychain entry per key
//! - `MemoryStore`: process-local map, used by tests and ephemeral runs

pub mod file;
pub mod keychain;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

pub use self::file::FileStore;
pub use self::keychain::KeyringStore;
pub use self::memory::MemoryStore;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage I/O failed: {0}")]
    Io(String),

    #[error("Storage file is corrupt: {0}")]
    Corrupt(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

/// Async string store with batched reads and writes.
///
/// Batches are atomic where the backend allows it; see each implementation.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read several keys at once. The result preserves the order of `keys`.
    async fn multi_get(&self, keys: &[&str]) -> Result<Vec<(String, Option<String>)>, StorageError>;

    async fn multi_set(&self, items: &[(&str, String)]) -> Result<(), StorageError>;

    /// Remove several keys at once. Missing keys are ignored.
    async fn multi_remove(&self, keys: &[&str]) -> Result<(), StorageError>;

    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut entries = self.multi_get(&[key]).await?;
        Ok(entries.pop().and_then(|(_, value)| value))
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.multi_set(&[(key, value.to_string())]).await
    }
}
