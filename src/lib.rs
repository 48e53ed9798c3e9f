// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Practice Store
//!
//! Tiered persistence for an exam-practice application: practice records,
//! statistics, settings, vocabulary lists and their backups.
//!
//! ## Architecture
//!
//! Writes and reads move through up to four tiers, best first:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Tier A: Structured (SQLite)                 │
//! │  • Large capacity, combined ceiling                        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ mirrored
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Tier B: Flat (JSON file)                  │
//! │  • Small hard quota, 20% kept in reserve                   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ neither durable tier took it
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │       Tier C: Session  →  Tier D: Volatile (memory)         │
//! │  • Transient keys only, lost on restart                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Keys in the persistent set (practice records, statistics, settings and
//! so on) must reach Tier A or B. If both fail the write returns
//! [`StoreError::HardPersistenceFailure`] instead of quietly landing in
//! memory. Only when startup found no durable tier at all do persistent
//! keys fall back to memory.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use practice_store::{Store, StoreConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = StoreConfig {
//!         structured_url: Some("sqlite://./practice.db?mode=rwc".into()),
//!         flat_path: Some("./practice.json".into()),
//!         ..Default::default()
//!     };
//!     let store = Store::new(config);
//!
//!     store.set("settings", &json!({"theme": "dark"})).await.expect("write failed");
//!     let settings = store.get("settings", json!({})).await;
//!     println!("{settings}");
//! }
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`]: The [`Store`] and its read/write path
//! - [`storage`]: Tier backends (SQL, flat file, memory)
//! - [`probe`]: Startup backend detection
//! - [`compression`]: Record trimming before writes
//! - [`quota`]: Limits, pressure levels, cleanup reports
//! - [`migration`]: Defaults, legacy keys, namespace moves
//! - [`merge`]: Record and vocabulary merging
//! - [`events`]: Change notifications
//! - [`resilience`]: Retry logic

pub mod compression;
pub mod config;
pub mod coordinator;
pub mod events;
pub mod keys;
pub mod merge;
pub mod metrics;
pub mod migration;
pub mod probe;
pub mod quota;
pub mod record;
pub mod resilience;
pub mod storage;
pub mod vocab;

pub use compression::{Compressed, Compressible, CompressionError, CompressionPolicy, Verbatim};
pub use config::{LegacyKey, StoreConfig};
pub use coordinator::{
    BackupEntry, ExportEnvelope, ImportReport, SetOptions, StorageInfo, Store, StoreError, StoreState,
    TransferRecord, WriteOutcome,
};
pub use events::{ChangeOp, StoreEvent};
pub use keys::{Namespace, PersistentKeySet};
pub use merge::{
    detect_conflict, merge_records, merge_values, merge_vocab_lists, resolve_vocab_lists, ResolutionStrategy,
    Side, WordConflict,
};
pub use migration::{MigrationClass, MigrationReport, MigrationState};
pub use probe::{BackendAvailability, Candidates};
pub use quota::{CleanupReport, CleanupStep, QuotaManager, QuotaMode, StoragePressure};
pub use record::{Envelope, StoreRecord};
pub use resilience::retry::RetryConfig;
pub use storage::flat::FlatStore;
pub use storage::memory::VolatileStore;
pub use storage::sql::SqlStore;
pub use storage::traits::{Backend, StorageError, Tier};
pub use vocab::{VocabList, WordEntry};
pub use metrics::LatencyTimer;
