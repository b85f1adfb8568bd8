use async_trait::async_trait;
use keyring::Entry;

use super::{KeyValueStore, StorageError};

const SERVICE_NAME: &str = "lovelybridge";

/// OS keychain store, one entry per key.
///
/// The keychain has no transactions: a batch is applied entry by entry and
/// stops at the first failure.
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyringStore {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, StorageError> {
        Entry::new(&self.service, key).map_err(backend_error)
    }

    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(backend_error(e)),
        }
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(backend_error(e)),
        }
    }
}

fn backend_error(err: keyring::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

#[async_trait]
impl KeyValueStore for KeyringStore {
    async fn multi_get(&self, keys: &[&str]) -> Result<Vec<(String, Option<String>)>, StorageError> {
        keys.iter()
            .map(|key| Ok((key.to_string(), self.read(key)?)))
            .collect()
    }

    async fn multi_set(&self, items: &[(&str, String)]) -> Result<(), StorageError> {
        for (key, value) in items {
            self.entry(key)?.set_password(value).map_err(backend_error)?;
        }
        Ok(())
    }

    async fn multi_remove(&self, keys: &[&str]) -> Result<(), StorageError> {
        for key in keys {
            self.delete(key)?;
        }
        Ok(())
    }
}
