//! In-memory secret storage implementation.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{Secret, SecretStore, StoreError};

/// In-memory secret store.
///
/// Not persistent; data is lost when the process exits. Useful for tests and
/// for hosts that must never touch the OS keyring.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<String, Secret>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("keys_count", &self.len())
            .finish()
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        self.data.write().insert(key.to_string(), secret.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.data.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_set_get() {
        let store = MemoryStore::new();
        store
            .set("avocavo-nutrition/default", &Secret::new("test-value"))
            .await
            .unwrap();

        let retrieved = store.get("avocavo-nutrition/default").await.unwrap();
        assert_eq!(retrieved.unwrap().expose(), "test-value");
    }

    #[tokio::test]
    async fn test_memory_store_get_nonexistent() {
        let store = MemoryStore::new();
        assert!(store.get("nonexistent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_delete_is_idempotent() {
        let store = MemoryStore::new();
        store.set("k", &Secret::new("v")).await.unwrap();
        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();

        assert!(store.is_empty());
        assert!(!store.exists("k").await.unwrap());
    }
}
