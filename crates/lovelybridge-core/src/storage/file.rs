use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{KeyValueStore, StorageError};

/// Storage file name in the data directory
const STORAGE_FILE: &str = "storage.json";

/// JSON-file backed store.
///
/// The whole map is kept in memory and every batch rewrites the file through
/// a temp file and a rename, so a batch is either fully on disk or not at all.
/// The map lock is held until the rename finishes, so writes land in order.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open (or lazily create) the store file inside `dir`.
    pub fn open(dir: &Path) -> Result<Self, StorageError> {
        let path = dir.join(STORAGE_FILE);
        let entries = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents).map_err(|e| StorageError::Corrupt(e.to_string()))?
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), keys = entries.len(), "Storage file opened");

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `change` to a copy of the map, persist it, then publish it.
    async fn commit<F>(&self, change: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut BTreeMap<String, String>) + Send,
    {
        let mut entries = self.entries.lock().await;
        let mut next = entries.clone();
        change(&mut next);
        if next == *entries {
            return Ok(());
        }

        let path = self.path.clone();
        let snapshot = next.clone();
        tokio::task::spawn_blocking(move || write_file(&path, &snapshot))
            .await
            .map_err(|e| StorageError::Io(format!("storage write task failed: {}", e)))??;
        *entries = next;
        Ok(())
    }
}

fn write_file(path: &Path, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let contents =
        serde_json::to_string_pretty(entries).map_err(|e| StorageError::Corrupt(e.to_string()))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn multi_get(&self, keys: &[&str]) -> Result<Vec<(String, Option<String>)>, StorageError> {
        let entries = self.entries.lock().await;
        Ok(keys
            .iter()
            .map(|key| (key.to_string(), entries.get(*key).cloned()))
            .collect())
    }

    async fn multi_set(&self, items: &[(&str, String)]) -> Result<(), StorageError> {
        self.commit(|entries| {
            for (key, value) in items {
                entries.insert(key.to_string(), value.clone());
            }
        })
        .await
    }

    async fn multi_remove(&self, keys: &[&str]) -> Result<(), StorageError> {
        self.commit(|entries| {
            for key in keys {
                entries.remove(*key);
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_batch_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store
            .multi_set(&[("auth.access", "A1".to_string()), ("auth.refresh", "R1".to_string())])
            .await
            .unwrap();

        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get_item("auth.access").await.unwrap().as_deref(), Some("A1"));
        assert_eq!(reopened.get_item("auth.refresh").await.unwrap().as_deref(), Some("R1"));
    }

    #[tokio::test]
    async fn test_remove_missing_does_not_create_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.multi_remove(&["auth.access"]).await.unwrap();
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_remove_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.set_item("auth.email", "a@b.c").await.unwrap();
        store.multi_remove(&["auth.email"]).await.unwrap();

        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get_item("auth.email").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_concurrent_batches_all_persist() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(FileStore::open(dir.path()).unwrap());

        let writes = (0..8).map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                let key = format!("key.{}", i);
                store.set_item(&key, "v").await
            })
        });
        for write in writes.collect::<Vec<_>>() {
            write.await.unwrap().unwrap();
        }

        let reopened = FileStore::open(dir.path()).unwrap();
        for i in 0..8 {
            let key = format!("key.{}", i);
            assert_eq!(reopened.get_item(&key).await.unwrap().as_deref(), Some("v"));
        }
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(STORAGE_FILE), "not json").unwrap();
        assert!(matches!(
            FileStore::open(dir.path()),
            Err(StorageError::Corrupt(_))
        ));
    }
}
