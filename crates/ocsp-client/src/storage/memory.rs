//! In-memory storage backend

use super::{Storage, StorageError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory storage backend
///
/// Stores all data in a local HashMap. Nothing survives the process; clones
/// share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    store: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of stored keys
    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.read().await.is_empty()
    }

    /// Clear all stored data
    pub async fn clear(&self) {
        self.store.write().await.clear();
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let store = self.store.read().await;
        Ok(store.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        if key.is_empty() {
            return Err(StorageError::InvalidInput("empty key".to_string()));
        }
        let mut store = self.store.write().await;
        store.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut store = self.store.write().await;
        store.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let store = self.store.read().await;
        let mut keys: Vec<String> = store
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_basic_operations() {
        let storage = MemoryStorage::new();

        storage.put("key1", b"value1").await.unwrap();
        assert_eq!(storage.get("key1").await.unwrap(), Some(b"value1".to_vec()));
        assert_eq!(storage.get("missing").await.unwrap(), None);

        storage.put("key1", b"value2").await.unwrap();
        assert_eq!(storage.get("key1").await.unwrap(), Some(b"value2".to_vec()));

        storage.delete("key1").await.unwrap();
        assert_eq!(storage.get("key1").await.unwrap(), None);
        // deleting twice is fine
        storage.delete("key1").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_prefix() {
        let storage = MemoryStorage::new();
        storage.put("ocsp_cache", b"{}").await.unwrap();
        storage.put("ocsp_b", b"").await.unwrap();
        storage.put("other", b"").await.unwrap();

        assert_eq!(
            storage.list("ocsp_").await.unwrap(),
            vec!["ocsp_b".to_string(), "ocsp_cache".to_string()]
        );
        assert_eq!(storage.list("").await.unwrap().len(), 3);
        assert_eq!(storage.len().await, 3);
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let storage = MemoryStorage::new();
        assert!(matches!(
            storage.put("", b"x").await,
            Err(StorageError::InvalidInput(_))
        ));
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_clones_share_data() {
        let storage = MemoryStorage::new();
        let clone = storage.clone();
        storage.put("key", b"v").await.unwrap();
        assert_eq!(clone.get("key").await.unwrap(), Some(b"v".to_vec()));

        clone.clear().await;
        assert!(storage.is_empty().await);
    }
}
