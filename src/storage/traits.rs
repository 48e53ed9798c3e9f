// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::keys::PROBE_KEY;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Quota exceeded: need {needed} bytes, {available} available")]
    QuotaExceeded { needed: usize, available: usize },
}

/// Storage tiers in read priority order.
///
/// `Structured` and `Flat` are durable. `Session` lives for the process
/// session and `Volatile` is the in-memory last resort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Structured,
    Flat,
    Session,
    Volatile,
}

impl Tier {
    /// Metric/log label
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Structured => "structured",
            Self::Flat => "flat",
            Self::Session => "session",
            Self::Volatile => "volatile",
        }
    }

    /// Survives a process restart
    #[must_use]
    pub fn is_durable(&self) -> bool {
        matches!(self, Self::Structured | Self::Flat)
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A key/value backend holding sealed envelope text under physical keys.
#[async_trait]
pub trait Backend: Send + Sync {
    fn tier(&self) -> Tier;

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError>;
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Physical keys starting with `prefix`.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Bytes of keys and values under `prefix`.
    async fn usage_bytes(&self, prefix: &str) -> Result<usize, StorageError>;

    async fn contains(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }

    /// Throwaway write/delete used by the startup probe.
    async fn probe(&self) -> Result<(), StorageError> {
        self.put(PROBE_KEY, "probe").await?;
        match self.get(PROBE_KEY).await? {
            Some(v) if v == "probe" => {}
            _ => return Err(StorageError::Unavailable("probe read-back mismatch".into())),
        }
        self.delete(PROBE_KEY).await
    }
}
