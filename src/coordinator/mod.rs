// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Store coordinator.
//!
//! The [`Store`] ties the components together:
//! - Backend probe and tier selection
//! - Tiered read/write path with quota enforcement
//! - Cleanup under storage pressure
//! - One-shot migrations at startup
//! - Change notifications
//!
//! # Lifecycle
//!
//! ```text
//! Created → Probing → Migrating → Ready
//! ```
//!
//! Startup runs once, lazily, on the first operation (or an explicit
//! [`Store::init`]). Every public operation waits for it.
//!
//! # Example
//!
//! ```rust,no_run
//! use practice_store::{Store, StoreConfig, StoreState};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let store = Store::new(StoreConfig::default());
//! assert_eq!(store.state(), StoreState::Created);
//!
//! store.set("settings", &json!({"theme": "dark"})).await.expect("write failed");
//! assert_eq!(store.state(), StoreState::Ready);
//! # }
//! ```

mod api;
mod cleanup;
mod lifecycle;
pub(crate) mod path;
mod transfer;
mod types;
mod vocab_api;

pub use transfer::{BackupEntry, ExportEnvelope, TransferRecord, BACKUP_KEYS};
pub use types::{ImportReport, SetOptions, StorageInfo, StoreError, StoreState, WriteOutcome};

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{watch, OnceCell};
use uuid::Uuid;

use crate::compression::CompressionPolicy;
use crate::config::StoreConfig;
use crate::events::ChangeNotifier;
use crate::keys::{Namespace, PersistentKeySet};
use crate::migration::MigrationReport;
use crate::probe::Candidates;
use crate::quota::QuotaManager;
use crate::record::WriteClock;

use path::TieredPath;

/// State shared by the store and its read/write path.
pub(crate) struct Shared {
    pub(crate) config: StoreConfig,
    pub(crate) namespace: RwLock<Namespace>,
    pub(crate) notifier: ChangeNotifier,
    pub(crate) quota: QuotaManager,
    pub(crate) compression: CompressionPolicy,
    pub(crate) persistent: PersistentKeySet,
    pub(crate) clock: WriteClock,
    /// Serializes writes per physical key
    key_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    /// Set while a cleanup pass runs; cleanup is not re-entrant
    pub(crate) cleaning: AtomicBool,
    /// Origin used for per-writer tallies
    pub(crate) writer_id: String,
}

impl Shared {
    fn new(config: StoreConfig) -> Self {
        let writer_id = config
            .writer_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        Self {
            namespace: RwLock::new(Namespace::new(config.namespace.clone())),
            notifier: ChangeNotifier::new(config.event_capacity),
            quota: QuotaManager::from_config(&config),
            compression: CompressionPolicy::from_config(&config),
            persistent: PersistentKeySet::with_extra(config.extra_persistent_keys.iter().cloned()),
            clock: WriteClock::new(),
            key_locks: DashMap::new(),
            cleaning: AtomicBool::new(false),
            writer_id,
            config,
        }
    }

    pub(crate) fn namespace(&self) -> Namespace {
        self.namespace.read().clone()
    }

    pub(crate) fn key_lock(&self, physical: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.key_locks.entry(physical.to_string()).or_default().clone()
    }
}

/// Tiered key-value store for practice data.
///
/// Cheap to share behind an `Arc`; all operations take `&self`.
pub struct Store {
    shared: Arc<Shared>,
    /// Read/write path, built once by startup
    ready: OnceCell<TieredPath>,
    /// Injected backends, consumed by startup
    candidates: Mutex<Option<Candidates>>,
    state: watch::Sender<StoreState>,
    state_rx: watch::Receiver<StoreState>,
    migration_report: OnceLock<MigrationReport>,
}

impl Store {
    /// Create a store whose backends are opened from `config` at startup.
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a store over caller-supplied backends.
    ///
    /// `structured_url`, `flat_path` and `session_enabled` in `config` are
    /// ignored; the candidates are probed as given.
    #[must_use]
    pub fn with_candidates(config: StoreConfig, candidates: Candidates) -> Self {
        Self::build(config, Some(candidates))
    }

    fn build(config: StoreConfig, candidates: Option<Candidates>) -> Self {
        let (state, state_rx) = watch::channel(StoreState::Created);
        Self {
            shared: Arc::new(Shared::new(config)),
            ready: OnceCell::new(),
            candidates: Mutex::new(candidates),
            state,
            state_rx,
            migration_report: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> StoreState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<StoreState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == StoreState::Ready
    }

    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }

    /// Origin label this store uses for per-writer tallies.
    #[must_use]
    pub fn writer_id(&self) -> &str {
        &self.shared.writer_id
    }

    /// Report from the startup migration, once startup has finished.
    #[must_use]
    pub fn migration_report(&self) -> Option<&MigrationReport> {
        self.migration_report.get()
    }

    /// Run startup if it has not run yet, then return the path.
    pub(crate) async fn path(&self) -> &TieredPath {
        self.ready.get_or_init(|| self.bootstrap()).await
    }
}
