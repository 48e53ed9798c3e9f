// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tiered read/write path.
//!
//! Reads ask every usable tier and return the newest decodable envelope by
//! write stamp, so a copy a failed write could not drop never shadows the
//! value that was acknowledged. Writes go to the structured and flat tiers together; the
//! session and volatile tiers only take a write when neither durable tier
//! did, and never for persistent keys while a durable tier exists.
//!
//! Writes to one key are serialized by a per-key lock. Cleanup takes the
//! same lock before rewriting, and only if the key has not moved on since
//! it was read.
//!
//! Nothing here waits for startup. Migration runs on a [`TieredPath`]
//! before the store is marked ready.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use serde_json::Value;
use tracing::{debug, error, warn};

use super::types::{StoreError, WriteOutcome};
use super::Shared;
use crate::compression::{Compressed, Compressible};
use crate::events::{ChangeOp, StoreEvent};
use crate::keys::{is_internal, Namespace};
use crate::metrics::{self, LatencyTimer};
use crate::probe::Tiers;
use crate::quota::QuotaMode;
use crate::record::{Envelope, StoreRecord};
use crate::storage::traits::{Backend, StorageError, Tier};

pub(crate) struct TieredPath {
    pub(crate) tiers: Tiers,
    pub(crate) shared: Arc<Shared>,
}

impl TieredPath {
    pub(crate) fn new(tiers: Tiers, shared: Arc<Shared>) -> Self {
        Self { tiers, shared }
    }

    pub(crate) fn namespace(&self) -> Namespace {
        self.shared.namespace()
    }

    pub(crate) fn is_persistent(&self, key: &str, hint: bool) -> bool {
        hint || self.shared.persistent.contains(key)
    }

    /// Which limit writes are checked against.
    pub(crate) fn quota_mode(&self) -> QuotaMode {
        if self.tiers.structured.is_some() {
            QuotaMode::Combined
        } else if self.tiers.flat.is_some() {
            QuotaMode::Flat
        } else {
            QuotaMode::Unbounded
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Reads
    // ═══════════════════════════════════════════════════════════════════════════

    pub(crate) async fn read_envelope(&self, key: &str) -> Option<(Tier, Envelope)> {
        let physical = self.namespace().physical(key);
        self.read_physical(&physical, self.is_persistent(key, false)).await
    }

    pub(crate) async fn get_value(&self, key: &str) -> Option<Value> {
        self.read_envelope(key).await.map(|(_, envelope)| envelope.data)
    }

    /// Newest decodable envelope across the tiers in read order. Equal
    /// stamps go to the higher-ranked tier. Undecodable text and tier errors
    /// are skipped.
    pub(crate) async fn read_physical(&self, physical: &str, persistent: bool) -> Option<(Tier, Envelope)> {
        let mut newest: Option<(Tier, Envelope)> = None;
        for backend in self.tiers.read_order(persistent) {
            let tier = backend.tier();
            let result = {
                let _timer = LatencyTimer::new(tier.label(), "get");
                backend.get(physical).await
            };
            match result {
                Ok(Some(raw)) => match Envelope::decode(&raw) {
                    Ok(envelope) => {
                        metrics::record_operation(tier.label(), "get", "success");
                        let newer = newest
                            .as_ref()
                            .map_or(true, |(_, best)| envelope.timestamp > best.timestamp);
                        if newer {
                            newest = Some((tier, envelope));
                        }
                    }
                    Err(e) => {
                        warn!(%tier, key = physical, error = %e, "Undecodable record, trying next tier");
                        metrics::record_operation(tier.label(), "get", "error");
                    }
                },
                Ok(None) => metrics::record_operation(tier.label(), "get", "miss"),
                Err(e) => {
                    warn!(%tier, key = physical, error = %e, "Tier read failed, trying next tier");
                    metrics::record_operation(tier.label(), "get", "error");
                }
            }
        }
        newest
    }

    /// Raw text under a physical key from any tier, envelope or not.
    pub(crate) async fn read_raw_physical(&self, physical: &str) -> Option<String> {
        for backend in self.tiers.all() {
            match backend.get(physical).await {
                Ok(Some(raw)) => return Some(raw),
                Ok(None) => {}
                Err(e) => debug!(tier = %backend.tier(), key = physical, error = %e, "Raw read failed"),
            }
        }
        None
    }

    /// Physical keys under `prefix` across every tier.
    pub(crate) async fn physical_keys(&self, prefix: &str) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        for backend in self.tiers.all() {
            match backend.keys(prefix).await {
                Ok(found) => keys.extend(found),
                Err(e) => warn!(tier = %backend.tier(), error = %e, "Key listing failed"),
            }
        }
        keys
    }

    /// Logical keys in the current namespace, internal keys excluded.
    pub(crate) async fn logical_keys(&self) -> BTreeSet<String> {
        let namespace = self.namespace();
        self.physical_keys(namespace.prefix())
            .await
            .iter()
            .filter_map(|physical| namespace.logical(physical))
            .filter(|key| !key.is_empty() && !is_internal(key))
            .map(str::to_string)
            .collect()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Usage
    // ═══════════════════════════════════════════════════════════════════════════

    async fn tier_usage(backend: &dyn Backend) -> usize {
        match backend.usage_bytes("").await {
            Ok(bytes) => {
                metrics::set_usage_bytes(backend.tier().label(), bytes);
                bytes
            }
            Err(e) => {
                debug!(tier = %backend.tier(), error = %e, "Usage unavailable");
                0
            }
        }
    }

    /// Usage counted against `mode`'s limit.
    pub(crate) async fn usage(&self, mode: QuotaMode) -> usize {
        let flat = match &self.tiers.flat {
            Some(b) => Self::tier_usage(b.as_ref()).await,
            None => 0,
        };
        match mode {
            QuotaMode::Flat => flat,
            QuotaMode::Combined => match &self.tiers.structured {
                Some(b) => Self::tier_usage(b.as_ref()).await + flat,
                None => flat,
            },
            QuotaMode::Unbounded => 0,
        }
    }

    /// Bytes per tier label.
    pub(crate) async fn usage_breakdown(&self) -> BTreeMap<String, usize> {
        let mut breakdown = BTreeMap::new();
        for backend in self.tiers.all() {
            breakdown.insert(backend.tier().label().to_string(), Self::tier_usage(backend).await);
        }
        breakdown
    }

    /// Would `size` bytes under `physical` fit in `mode`? Key bytes count
    /// like the tiers count them. The key's current entry in the measured
    /// tiers is not counted twice.
    async fn fits(&self, mode: QuotaMode, physical: &str, size: usize) -> bool {
        let measured: Vec<&dyn Backend> = match mode {
            QuotaMode::Flat => self.tiers.flat.iter().map(|b| b.as_ref()).collect(),
            QuotaMode::Combined => self
                .tiers
                .structured
                .iter()
                .chain(self.tiers.flat.iter())
                .map(|b| b.as_ref())
                .collect(),
            QuotaMode::Unbounded => return true,
        };
        let mut existing = 0;
        for backend in measured {
            if let Ok(Some(old)) = backend.get(physical).await {
                existing += physical.len() + old.len();
            }
        }
        let usage = self.usage(mode).await.saturating_sub(existing);
        self.shared.quota.check(mode, usage, physical.len() + size)
    }

    pub(crate) async fn notify_pressure(&self, mode: QuotaMode) {
        let usage = self.usage(mode).await;
        let limit = self.shared.quota.limit(mode).unwrap_or(0);
        let pressure = self.shared.quota.pressure(mode, usage);
        self.shared.notifier.publish(StoreEvent::QuotaPressure {
            pressure,
            usage_bytes: usage,
            limit_bytes: limit,
        });
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Writes
    // ═══════════════════════════════════════════════════════════════════════════

    /// Compress, seal and write a logical key.
    pub(crate) async fn set<V: Compressible + ?Sized>(
        &self,
        key: &str,
        value: &V,
        persistent_hint: bool,
    ) -> Result<WriteOutcome, StoreError> {
        let compressed = value.compress(&self.shared.compression)?;
        self.store(key, compressed, persistent_hint).await
    }

    /// Seal and write an already-shaped value. The compressed flag is kept.
    pub(crate) async fn store(
        &self,
        key: &str,
        compressed: Compressed,
        persistent_hint: bool,
    ) -> Result<WriteOutcome, StoreError> {
        let physical = self.namespace().physical(key);
        let lock = self.shared.key_lock(&physical);
        let _held = lock.lock().await;
        let timestamp = self.shared.clock.stamp(&physical);
        let record = StoreRecord::seal(
            key,
            compressed.value,
            timestamp,
            &self.shared.config.schema_version,
            compressed.compressed,
        )?;
        let persistent = self.is_persistent(key, persistent_hint);
        let outcome = self.write_record(&physical, &record, persistent).await?;
        self.shared.notifier.changed(key, ChangeOp::Set);
        Ok(outcome)
    }

    async fn put_tier(&self, backend: &dyn Backend, physical: &str, wire: &str) -> Result<(), StorageError> {
        let tier = backend.tier().label();
        let result = {
            let _timer = LatencyTimer::new(tier, "put");
            backend.put(physical, wire).await
        };
        match &result {
            Ok(()) => {
                metrics::record_operation(tier, "put", "success");
                metrics::record_bytes_written(tier, wire.len());
            }
            Err(StorageError::QuotaExceeded { .. }) => metrics::record_operation(tier, "put", "rejected"),
            Err(_) => metrics::record_operation(tier, "put", "error"),
        }
        result
    }

    /// Quota gate for a durable tier: check, clean up once, check again.
    async fn admit(&self, mode: QuotaMode, physical: &str, size: usize, cleaned: &mut bool) -> bool {
        if self.fits(mode, physical, size).await {
            return true;
        }
        self.cleanup(Some(size)).await;
        *cleaned = true;
        if self.fits(mode, physical, size).await {
            return true;
        }
        warn!(%mode, key = physical, size, "Write blocked by storage quota");
        self.notify_pressure(mode).await;
        false
    }

    async fn write_record(
        &self,
        physical: &str,
        record: &StoreRecord,
        persistent: bool,
    ) -> Result<WriteOutcome, StoreError> {
        let size = record.size_bytes();
        let wire = record.wire();
        let mut cleaned = false;
        let mut written = Vec::with_capacity(2);

        let mut structured = self.tiers.structured.as_deref();
        let mut flat = self.tiers.flat.as_deref();

        if structured.is_some() {
            if !self.admit(QuotaMode::Combined, physical, size, &mut cleaned).await {
                structured = None;
            }
        } else if flat.is_some() && !self.admit(QuotaMode::Flat, physical, size, &mut cleaned).await {
            flat = None;
        }

        if let Some(backend) = structured {
            match self.put_tier(backend, physical, wire).await {
                Ok(()) => written.push(Tier::Structured),
                Err(e) => warn!(key = physical, error = %e, "Structured tier write failed"),
            }
        }

        if let Some(backend) = flat {
            match self.put_tier(backend, physical, wire).await {
                Ok(()) => written.push(Tier::Flat),
                Err(StorageError::QuotaExceeded { needed, available }) => {
                    debug!(key = physical, needed, available, "Flat tier full, cleaning up before retry");
                    self.cleanup(Some(size)).await;
                    cleaned = true;
                    match self.put_tier(backend, physical, wire).await {
                        Ok(()) => written.push(Tier::Flat),
                        Err(e) => {
                            warn!(key = physical, error = %e, "Flat tier write failed after cleanup");
                            self.notify_pressure(QuotaMode::Flat).await;
                        }
                    }
                }
                Err(e) => warn!(key = physical, error = %e, "Flat tier write failed"),
            }
        }

        if written.is_empty() {
            let availability = self.tiers.availability();
            if persistent && availability.has_durable() {
                error!(key = record.key(), "Persistent write reached no durable tier");
                metrics::record_hard_failure();
                self.shared.notifier.publish(StoreEvent::PersistenceFailure {
                    key: record.key().to_string(),
                });
                return Err(StoreError::HardPersistenceFailure {
                    key: record.key().to_string(),
                });
            }

            if !persistent {
                if let Some(backend) = self.tiers.session.as_deref() {
                    match self.put_tier(backend, physical, wire).await {
                        Ok(()) => written.push(Tier::Session),
                        Err(e) => debug!(key = physical, error = %e, "Session tier write failed"),
                    }
                }
            }

            if written.is_empty() {
                if persistent {
                    warn!(key = record.key(), "No durable tier; persistent key held in memory only");
                }
                self.put_tier(self.tiers.volatile.as_ref(), physical, wire).await?;
                written.push(Tier::Volatile);
            }
        }

        self.drop_shadowed(physical, &written).await;
        Ok(WriteOutcome { written, cleaned })
    }

    /// Delete copies in tiers ranked above the highest tier just written,
    /// so a stale copy there cannot win later reads.
    async fn drop_shadowed(&self, physical: &str, written: &[Tier]) {
        let Some(highest) = written.iter().min().copied() else {
            return;
        };
        for backend in self.tiers.all() {
            let tier = backend.tier();
            if tier >= highest {
                break;
            }
            if let Err(e) = backend.delete(physical).await {
                debug!(%tier, key = physical, error = %e, "Could not drop shadowed copy");
            }
        }
    }

    /// Write a sealed record in place to every tier already holding the key.
    /// Used by cleanup, which only ever shrinks values.
    ///
    /// `read_at` is the stamp of the envelope the shrunk value came from.
    /// Returns `Ok(false)` without writing when a write to the key is in
    /// flight or has landed since then.
    pub(crate) async fn rewrite_in_place(
        &self,
        key: &str,
        compressed: Compressed,
        read_at: i64,
    ) -> Result<bool, StoreError> {
        let physical = self.namespace().physical(key);
        let lock = self.shared.key_lock(&physical);
        let Ok(_held) = lock.try_lock() else {
            debug!(key, "Write in flight, leaving value as is");
            return Ok(false);
        };
        let current = self
            .read_physical(&physical, self.is_persistent(key, false))
            .await
            .map(|(_, envelope)| envelope.timestamp);
        if current != Some(read_at) {
            debug!(key, read_at, ?current, "Value changed since it was read, leaving it");
            return Ok(false);
        }
        let record = StoreRecord::seal(
            key,
            compressed.value,
            self.shared.clock.stamp(&physical),
            &self.shared.config.schema_version,
            compressed.compressed,
        )?;
        for backend in self.tiers.all() {
            if !matches!(backend.contains(&physical).await, Ok(true)) {
                continue;
            }
            if let Err(e) = self.put_tier(backend, &physical, record.wire()).await {
                warn!(tier = %backend.tier(), key, error = %e, "In-place rewrite failed");
            }
        }
        self.shared.notifier.changed(key, ChangeOp::Set);
        Ok(true)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Deletes
    // ═══════════════════════════════════════════════════════════════════════════

    /// Delete a physical key from every tier. True if no tier errored.
    pub(crate) async fn remove_physical(&self, physical: &str) -> bool {
        let mut clean = true;
        for backend in self.tiers.all() {
            let tier = backend.tier();
            match backend.delete(physical).await {
                Ok(()) => metrics::record_operation(tier.label(), "delete", "success"),
                Err(e) => {
                    warn!(%tier, key = physical, error = %e, "Tier delete failed");
                    metrics::record_operation(tier.label(), "delete", "error");
                    clean = false;
                }
            }
        }
        clean
    }

    pub(crate) async fn remove(&self, key: &str) -> bool {
        let physical = self.namespace().physical(key);
        let removed = self.remove_physical(&physical).await;
        self.shared.notifier.changed(key, ChangeOp::Remove);
        removed
    }

    /// Delete every non-internal key in the current namespace.
    pub(crate) async fn clear_namespace(&self) -> usize {
        let namespace = self.namespace();
        let keys = self.logical_keys().await;
        for key in &keys {
            self.remove_physical(&namespace.physical(key)).await;
        }
        keys.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::probe::{probe, Candidates};
    use crate::storage::flat::FlatStore;
    use serde_json::json;

    async fn path_over(candidates: Candidates, config: StoreConfig) -> TieredPath {
        let shared = Arc::new(Shared::new(config));
        let (tiers, _) = probe(candidates, &shared.namespace()).await;
        TieredPath::new(tiers, shared)
    }

    #[tokio::test]
    async fn test_write_lands_in_flat_and_reads_back() {
        let path = path_over(
            Candidates {
                flat: Some(Arc::new(FlatStore::unbacked(64 * 1024))),
                ..Default::default()
            },
            StoreConfig::default(),
        )
        .await;

        let outcome = path.set("settings", &json!({"theme": "dark"}), false).await.unwrap();
        assert_eq!(outcome.written, vec![Tier::Flat]);

        let (tier, envelope) = path.read_envelope("settings").await.unwrap();
        assert_eq!(tier, Tier::Flat);
        assert_eq!(envelope.data, json!({"theme": "dark"}));
        assert_eq!(envelope.version, "1.0.0");
    }

    #[tokio::test]
    async fn test_transient_key_falls_to_session() {
        let path = path_over(
            Candidates {
                session: Some(Arc::new(FlatStore::session(64 * 1024))),
                ..Default::default()
            },
            StoreConfig::default(),
        )
        .await;

        let outcome = path.set("scratch", &json!(1), false).await.unwrap();
        assert_eq!(outcome.written, vec![Tier::Session]);
    }

    #[tokio::test]
    async fn test_persistent_key_skips_session_when_volatile_only_durability() {
        // Session exists but no durable tier: persistent keys go to memory
        let path = path_over(
            Candidates {
                session: Some(Arc::new(FlatStore::session(64 * 1024))),
                ..Default::default()
            },
            StoreConfig::default(),
        )
        .await;

        let outcome = path.set("settings", &json!({"a": 1}), false).await.unwrap();
        assert_eq!(outcome.written, vec![Tier::Volatile]);
    }

    #[tokio::test]
    async fn test_lower_tier_write_drops_shadowed_copy() {
        let session = Arc::new(FlatStore::session(64 * 1024));
        let path = path_over(
            Candidates {
                session: Some(session.clone()),
                ..Default::default()
            },
            StoreConfig::default(),
        )
        .await;

        path.set("scratch", &json!("old"), false).await.unwrap();
        let physical = path.namespace().physical("scratch");
        assert!(session.contains(&physical).await.unwrap());

        let newer = StoreRecord::seal("scratch", json!("new"), 1, "1.0.0", false).unwrap();
        path.tiers.volatile.put(&physical, newer.wire()).await.unwrap();
        path.drop_shadowed(&physical, &[Tier::Volatile]).await;
        assert!(!session.contains(&physical).await.unwrap());
        assert_eq!(path.get_value("scratch").await, Some(json!("new")));
    }

    #[tokio::test]
    async fn test_remove_clears_every_tier() {
        let path = path_over(
            Candidates {
                flat: Some(Arc::new(FlatStore::unbacked(64 * 1024))),
                session: Some(Arc::new(FlatStore::session(64 * 1024))),
                ..Default::default()
            },
            StoreConfig::default(),
        )
        .await;

        path.set("settings", &json!(1), false).await.unwrap();
        path.set("scratch", &json!(2), false).await.unwrap();
        assert!(path.remove("settings").await);
        assert!(path.get_value("settings").await.is_none());
        assert_eq!(path.logical_keys().await.into_iter().collect::<Vec<_>>(), vec!["scratch".to_string()]);
    }

    #[tokio::test]
    async fn test_undecodable_text_falls_through() {
        let flat = Arc::new(FlatStore::unbacked(64 * 1024));
        let path = path_over(
            Candidates {
                flat: Some(flat.clone()),
                ..Default::default()
            },
            StoreConfig::default(),
        )
        .await;

        flat.put(&path.namespace().physical("broken"), "not json").await.unwrap();
        assert!(path.get_value("broken").await.is_none());
    }
}
