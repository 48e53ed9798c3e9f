// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use dashmap::DashMap;
use super::traits::{Backend, StorageError, Tier};

/// Tier D: process-local map. Always present, never durable.
pub struct VolatileStore {
    data: DashMap<String, String>,
}

impl VolatileStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&self) {
        self.data.clear();
    }
}

impl Default for VolatileStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for VolatileStore {
    fn tier(&self) -> Tier {
        Tier::Volatile
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.data.get(key).map(|r| r.value().clone()))
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.data.remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .data
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn usage_bytes(&self, prefix: &str) -> Result<usize, StorageError> {
        Ok(self
            .data
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().len() + e.value().len())
            .sum())
    }

    async fn contains(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.data.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_store_is_empty() {
        let store = VolatileStore::new();
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let store = VolatileStore::new();
        store.put("ns_settings", "{\"theme\":\"dark\"}").await.unwrap();

        let result = store.get("ns_settings").await.unwrap();
        assert_eq!(result.as_deref(), Some("{\"theme\":\"dark\"}"));
    }

    #[tokio::test]
    async fn test_delete_nonexistent_is_ok() {
        let store = VolatileStore::new();
        assert!(store.delete("nonexistent").await.is_ok());
    }

    #[tokio::test]
    async fn test_keys_and_usage_respect_prefix() {
        let store = VolatileStore::new();
        store.put("a_one", "12345").await.unwrap();
        store.put("a_two", "123").await.unwrap();
        store.put("b_one", "1234567890").await.unwrap();

        let mut keys = store.keys("a_").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a_one".to_string(), "a_two".to_string()]);
        assert_eq!(store.usage_bytes("a_").await.unwrap(), 18);
        assert_eq!(store.usage_bytes("").await.unwrap(), 33);
    }

    #[tokio::test]
    async fn test_probe_leaves_no_residue() {
        let store = VolatileStore::new();
        store.probe().await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        use std::sync::Arc;

        let store = Arc::new(VolatileStore::new());
        let mut handles = vec![];

        for batch in 0..10 {
            let store_clone = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..10 {
                    store_clone
                        .put(&format!("batch-{}-item-{}", batch, i), "v")
                        .await
                        .unwrap();
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.len(), 100);
    }
}
