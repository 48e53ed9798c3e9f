// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Key/value operations on [`Store`].
//!
//! Every operation waits for startup first.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::types::{SetOptions, StorageInfo, StoreError, WriteOutcome};
use super::Store;
use crate::compression::Compressible;
use crate::events::StoreEvent;
use crate::keys::{is_internal, Namespace};
use crate::migration::seed_defaults;
use crate::probe::BackendAvailability;
use crate::quota::CleanupReport;

impl Store {
    /// Read `key`, or `default` if it is absent or does not decode as `T`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.get_value(key).await {
            Some(value) => match serde_json::from_value(value) {
                Ok(typed) => typed,
                Err(e) => {
                    warn!(key, error = %e, "Stored value has unexpected shape, using default");
                    default
                }
            },
            None => default,
        }
    }

    /// Raw JSON value of `key`.
    pub async fn get_value(&self, key: &str) -> Option<Value> {
        self.path().await.get_value(key).await
    }

    /// Write `value` under `key`.
    ///
    /// Returns [`StoreError::HardPersistenceFailure`] when `key` is persistent
    /// and no durable tier took the write.
    pub async fn set<V: Compressible + ?Sized>(&self, key: &str, value: &V) -> Result<bool, StoreError> {
        self.set_with(key, value, SetOptions::default()).await.map(|_| true)
    }

    /// Write with options, reporting where the value landed.
    pub async fn set_with<V: Compressible + ?Sized>(
        &self,
        key: &str,
        value: &V,
        options: SetOptions,
    ) -> Result<WriteOutcome, StoreError> {
        self.path()
            .await
            .set(key, value, options.persistent_hint)
            .await
    }

    /// Push `item` onto the array under `key`, creating it when absent.
    /// Returns false if the stored value is not an array.
    pub async fn append(&self, key: &str, item: Value) -> Result<bool, StoreError> {
        let path = self.path().await;
        let mut list = match path.get_value(key).await {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(list)) => list,
            Some(_) => {
                warn!(key, "Append target is not an array");
                return Ok(false);
            }
        };
        list.push(item);
        path.set(key, &Value::Array(list), false).await?;
        Ok(true)
    }

    /// Remove `key` from every tier.
    pub async fn remove(&self, key: &str) -> bool {
        self.path().await.remove(key).await
    }

    /// Remove every key in the namespace, then seed defaults again.
    /// Bookkeeping keys (version stamp, migration flags) are kept.
    pub async fn clear(&self) -> bool {
        let path = self.path().await;
        let removed = path.clear_namespace().await;
        seed_defaults(path).await;
        self.shared.notifier.publish(StoreEvent::Cleared);
        info!(removed, "Namespace cleared");
        true
    }

    /// Logical keys in the current namespace.
    pub async fn keys(&self) -> Vec<String> {
        self.path().await.logical_keys().await.into_iter().collect()
    }

    /// Switch the namespace prefix. Existing data is not moved.
    pub fn set_namespace(&self, prefix: impl Into<String>) {
        let namespace = Namespace::new(prefix);
        info!(namespace = %namespace, "Namespace changed");
        *self.shared.namespace.write() = namespace;
    }

    #[must_use]
    pub fn namespace(&self) -> Namespace {
        self.shared.namespace()
    }

    /// Receive change events. Subscribing does not wait for startup.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.shared.notifier.subscribe()
    }

    pub async fn availability(&self) -> BackendAvailability {
        self.path().await.tiers.availability()
    }

    /// Whether `key` must land in a durable tier.
    #[must_use]
    pub fn is_persistent(&self, key: &str) -> bool {
        self.shared.persistent.contains(key) && !is_internal(key)
    }

    pub async fn storage_info(&self) -> StorageInfo {
        let path = self.path().await;
        let mode = path.quota_mode();
        let used_bytes = path.usage(mode).await;
        StorageInfo {
            mode,
            used_bytes,
            limit_bytes: self.shared.quota.limit(mode),
            pressure: self.shared.quota.pressure(mode, used_bytes),
            availability: path.tiers.availability(),
            tiers: path.usage_breakdown().await,
        }
    }

    /// Run every cleanup step now.
    pub async fn cleanup(&self) -> CleanupReport {
        self.path().await.cleanup(None).await
    }
}
