use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::{KeyValueStore, StorageError};

/// In-memory store. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn multi_get(&self, keys: &[&str]) -> Result<Vec<(String, Option<String>)>, StorageError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(keys
            .iter()
            .map(|key| (key.to_string(), entries.get(*key).cloned()))
            .collect())
    }

    async fn multi_set(&self, items: &[(&str, String)]) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        for (key, value) in items {
            entries.insert(key.to_string(), value.clone());
        }
        Ok(())
    }

    async fn multi_remove(&self, keys: &[&str]) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            entries.remove(*key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_multi_get_preserves_key_order() {
        let store = MemoryStore::new();
        store
            .multi_set(&[("b", "2".to_string()), ("a", "1".to_string())])
            .await
            .unwrap();

        let entries = store.multi_get(&["a", "missing", "b"]).await.unwrap();
        assert_eq!(
            entries,
            vec![
                ("a".to_string(), Some("1".to_string())),
                ("missing".to_string(), None),
                ("b".to_string(), Some("2".to_string())),
            ]
        );
    }

    #[tokio::test]
    async fn test_remove_missing_is_noop() {
        let store = MemoryStore::new();
        store.set_item("a", "1").await.unwrap();
        store.multi_remove(&["a", "never-set"]).await.unwrap();
        assert!(store.is_empty());
        assert_eq!(store.get_item("a").await.unwrap(), None);
    }
}
