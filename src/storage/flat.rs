// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Flat key/value tiers (B and C).
//!
//! Both tiers share one shape: a synchronous ordered map with a hard quota
//! counted over key and value bytes. Tier B mirrors every mutation to a JSON
//! file so it survives restarts. Tier C never touches disk and is emptied by
//! [`FlatStore::end_session`].
//!
//! The file is rewritten whole through a temp file and rename, so a crash
//! mid-write leaves the previous snapshot intact.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::traits::{Backend, StorageError, Tier};

pub struct FlatStore {
    tier: Tier,
    entries: RwLock<BTreeMap<String, String>>,
    quota_bytes: usize,
    path: Option<PathBuf>,
}

impl FlatStore {
    /// Open (or create) a file-backed Tier B store.
    pub fn open(path: impl AsRef<Path>, quota_bytes: usize) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| StorageError::Unavailable(format!("read {}: {}", path.display(), e)))?;
            if text.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&text).map_err(|e| {
                    StorageError::Backend(format!("corrupt flat store {}: {}", path.display(), e))
                })?
            }
        } else {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        StorageError::Unavailable(format!("create {}: {}", parent.display(), e))
                    })?;
                }
            }
            BTreeMap::new()
        };

        debug!(path = %path.display(), entries = entries.len(), "Flat store opened");

        Ok(Self {
            tier: Tier::Flat,
            entries: RwLock::new(entries),
            quota_bytes,
            path: Some(path),
        })
    }

    /// Tier C: same shape, memory only.
    #[must_use]
    pub fn session(quota_bytes: usize) -> Self {
        Self {
            tier: Tier::Session,
            entries: RwLock::new(BTreeMap::new()),
            quota_bytes,
            path: None,
        }
    }

    /// Tier B shape without a backing file.
    #[must_use]
    pub fn unbacked(quota_bytes: usize) -> Self {
        Self {
            tier: Tier::Flat,
            entries: RwLock::new(BTreeMap::new()),
            quota_bytes,
            path: None,
        }
    }

    #[must_use]
    pub fn quota_bytes(&self) -> usize {
        self.quota_bytes
    }

    /// Bytes charged against the quota (keys and values).
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        charged(&self.entries.read())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop everything (session end).
    pub fn end_session(&self) {
        let mut entries = self.entries.write();
        entries.clear();
        if let Err(e) = self.flush(&entries) {
            warn!(tier = %self.tier, error = %e, "Failed to persist cleared flat store");
        }
    }

    /// Rewrite the backing file from `entries`.
    ///
    /// Blocking, and called with the write lock held so the file and the map
    /// change together and a failed write can be rolled back. The tier is
    /// capped at a few megabytes, so a rewrite stays short enough to run on
    /// a runtime thread.
    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let text = serde_json::to_string(entries)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, text)
            .map_err(|e| StorageError::Backend(format!("write {}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| StorageError::Backend(format!("rename {}: {}", path.display(), e)))
    }
}

fn charged(entries: &BTreeMap<String, String>) -> usize {
    entries.iter().map(|(k, v)| k.len() + v.len()).sum()
}

#[async_trait]
impl Backend for FlatStore {
    fn tier(&self) -> Tier {
        self.tier
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write();
        let used = charged(&entries);
        let released = entries.get(key).map_or(0, |old| key.len() + old.len());
        let needed = key.len() + value.len();
        let after = used - released + needed;
        if after > self.quota_bytes {
            return Err(StorageError::QuotaExceeded {
                needed,
                available: self.quota_bytes.saturating_sub(used - released),
            });
        }

        let previous = entries.insert(key.to_string(), value.to_string());
        if let Err(e) = self.flush(&entries) {
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write();
        if let Some(old) = entries.remove(key) {
            if let Err(e) = self.flush(&entries) {
                entries.insert(key.to_string(), old);
                return Err(e);
            }
        }
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .entries
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn usage_bytes(&self, prefix: &str) -> Result<usize, StorageError> {
        Ok(self
            .entries
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| k.len() + v.len())
            .sum())
    }

    async fn contains(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries.read().contains_key(key))
    }
}
