// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the store coordinator.

use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::compression::CompressionError;
use crate::probe::BackendAvailability;
use crate::quota::{QuotaMode, StoragePressure};
use crate::storage::traits::{StorageError, Tier};

/// Store lifecycle state.
///
/// ```text
/// Created → Probing → Migrating → Ready
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    /// Constructed, no backend touched yet
    Created,
    /// Opening and probing backends
    Probing,
    /// Running one-shot migrations
    Migrating,
    /// Serving requests
    Ready,
}

impl std::fmt::Display for StoreState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Probing => write!(f, "Probing"),
            Self::Migrating => write!(f, "Migrating"),
            Self::Ready => write!(f, "Ready"),
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    /// A persistent key reached no durable tier
    #[error("No durable tier accepted persistent key '{key}'")]
    HardPersistenceFailure { key: String },
    /// Imported or restored data failed a shape check; nothing was written
    #[error("Validation failed for '{key}': {reason}")]
    Validation { key: String, reason: String },
    /// A write failed part way through an import
    #[error("Import failed: {reason} (snapshot restored: {restored})")]
    ImportFailed { reason: String, restored: bool },
    #[error("Backup '{0}' not found")]
    BackupNotFound(String),
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Compression(#[from] CompressionError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Per-call write options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Treat the key as persistent even if it is not in the persistent set
    pub persistent_hint: bool,
}

impl SetOptions {
    #[must_use]
    pub fn persistent() -> Self {
        Self {
            persistent_hint: true,
        }
    }
}

/// Where a write landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Tiers that accepted the write, highest priority first
    pub written: Vec<Tier>,
    /// Cleanup ran to make room
    pub cleaned: bool,
}

impl WriteOutcome {
    #[must_use]
    pub fn durable(&self) -> bool {
        self.written.iter().any(Tier::is_durable)
    }
}

/// Usage snapshot across tiers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageInfo {
    pub mode: QuotaMode,
    pub used_bytes: usize,
    pub limit_bytes: Option<usize>,
    pub pressure: StoragePressure,
    pub availability: BackendAvailability,
    /// Bytes stored per tier label
    pub tiers: BTreeMap<String, usize>,
}

impl StorageInfo {
    /// Share of the active limit in use (0.0 when unbounded)
    #[must_use]
    pub fn ratio(&self) -> f64 {
        match self.limit_bytes {
            Some(limit) if limit > 0 => self.used_bytes as f64 / limit as f64,
            _ => 0.0,
        }
    }
}

/// Outcome of a successful import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub replaced: usize,
}
