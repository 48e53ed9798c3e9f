// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Startup backend probe.
//!
//! Candidate backends are opened from configuration (or injected), then each
//! one is tested with a throwaway write/delete. Anything that fails is left
//! out of the resulting [`Tiers`]. The probe never fails: with nothing usable
//! only the volatile tier remains and persistent keys become best effort.
//!
//! The outcome is remembered as a [`BackendPreference`] in the flat and
//! session tiers, so the next run can tell when it lost a tier.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::keys::{Namespace, BACKEND_PREFERENCE};
use crate::metrics::LatencyTimer;
use crate::record::{now_millis, Envelope, StoreRecord};
use crate::storage::flat::FlatStore;
use crate::storage::memory::VolatileStore;
use crate::storage::sql::SqlStore;
use crate::storage::traits::{Backend, Tier};

/// Which optional tiers passed the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BackendAvailability {
    pub structured: bool,
    pub flat: bool,
    pub session: bool,
}

impl BackendAvailability {
    /// No tier besides the volatile one
    #[must_use]
    pub fn volatile_only(&self) -> bool {
        !self.structured && !self.flat && !self.session
    }

    #[must_use]
    pub fn has_durable(&self) -> bool {
        self.structured || self.flat
    }

    /// Highest-ranked usable tier
    #[must_use]
    pub fn primary(&self) -> Tier {
        if self.structured {
            Tier::Structured
        } else if self.flat {
            Tier::Flat
        } else if self.session {
            Tier::Session
        } else {
            Tier::Volatile
        }
    }
}

/// Probe outcome remembered between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendPreference {
    pub primary: Tier,
    pub probed_at: i64,
}

/// Backends that may be usable, before probing.
#[derive(Default)]
pub struct Candidates {
    pub structured: Option<Arc<dyn Backend>>,
    pub flat: Option<Arc<dyn Backend>>,
    pub session: Option<Arc<dyn Backend>>,
}

impl Candidates {
    /// No optional tiers at all.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Open whatever the configuration names. Failures are logged and skipped.
    pub async fn from_config(config: &StoreConfig) -> Self {
        let structured = match &config.structured_url {
            Some(url) => match SqlStore::open(url).await {
                Ok(store) => Some(Arc::new(store) as Arc<dyn Backend>),
                Err(e) => {
                    warn!(error = %e, "Structured tier failed to open");
                    None
                }
            },
            None => None,
        };

        let flat = match &config.flat_path {
            Some(path) => match FlatStore::open(path, config.flat_quota_bytes) {
                Ok(store) => Some(Arc::new(store) as Arc<dyn Backend>),
                Err(e) => {
                    warn!(path = %path, error = %e, "Flat tier failed to open");
                    None
                }
            },
            None => None,
        };

        let session = config
            .session_enabled
            .then(|| Arc::new(FlatStore::session(config.flat_quota_bytes)) as Arc<dyn Backend>);

        Self {
            structured,
            flat,
            session,
        }
    }
}

/// Usable tiers after probing. Tier D is always present.
#[derive(Clone)]
pub struct Tiers {
    pub structured: Option<Arc<dyn Backend>>,
    pub flat: Option<Arc<dyn Backend>>,
    pub session: Option<Arc<dyn Backend>>,
    pub volatile: Arc<VolatileStore>,
}

impl Tiers {
    #[must_use]
    pub fn availability(&self) -> BackendAvailability {
        BackendAvailability {
            structured: self.structured.is_some(),
            flat: self.flat.is_some(),
            session: self.session.is_some(),
        }
    }

    /// Every tier, highest priority first.
    #[must_use]
    pub fn all(&self) -> Vec<&dyn Backend> {
        let mut tiers: Vec<&dyn Backend> = Vec::with_capacity(4);
        if let Some(t) = &self.structured {
            tiers.push(t.as_ref());
        }
        if let Some(t) = &self.flat {
            tiers.push(t.as_ref());
        }
        if let Some(t) = &self.session {
            tiers.push(t.as_ref());
        }
        tiers.push(self.volatile.as_ref());
        tiers
    }

    /// Read order for a key. Persistent keys never read the session tier.
    #[must_use]
    pub fn read_order(&self, persistent: bool) -> Vec<&dyn Backend> {
        self.all()
            .into_iter()
            .filter(|t| !(persistent && t.tier() == Tier::Session))
            .collect()
    }
}

async fn probe_one(candidate: Option<Arc<dyn Backend>>, tier: Tier) -> Option<Arc<dyn Backend>> {
    let backend = candidate?;
    let outcome = {
        let _timer = LatencyTimer::new(tier.label(), "probe");
        backend.probe().await
    };
    match outcome {
        Ok(()) => {
            debug!(%tier, "Tier passed probe");
            crate::metrics::set_tier_available(tier.label(), true);
            Some(backend)
        }
        Err(e) => {
            warn!(%tier, error = %e, "Tier failed probe, marking unavailable");
            crate::metrics::set_tier_available(tier.label(), false);
            None
        }
    }
}

/// Probe candidates in rank order.
///
/// Returns the usable tiers and the preference recorded by the previous
/// run, if any.
pub async fn probe(
    candidates: Candidates,
    namespace: &Namespace,
) -> (Tiers, Option<BackendPreference>) {
    let Candidates {
        structured,
        flat,
        session,
    } = candidates;

    let tiers = Tiers {
        structured: probe_one(structured, Tier::Structured).await,
        flat: probe_one(flat, Tier::Flat).await,
        session: probe_one(session, Tier::Session).await,
        volatile: Arc::new(VolatileStore::new()),
    };

    let availability = tiers.availability();
    if availability.volatile_only() {
        warn!("No storage tier usable; persistent data is best effort until restart");
    } else {
        info!(
            structured = availability.structured,
            flat = availability.flat,
            session = availability.session,
            "Storage tiers probed"
        );
    }

    let physical = namespace.physical(BACKEND_PREFERENCE);
    let previous = load_preference(&tiers, &physical).await;
    save_preference(
        &tiers,
        &physical,
        BackendPreference {
            primary: availability.primary(),
            probed_at: now_millis(),
        },
    )
    .await;

    (tiers, previous)
}

async fn load_preference(tiers: &Tiers, physical: &str) -> Option<BackendPreference> {
    for backend in [&tiers.flat, &tiers.session].into_iter().flatten() {
        if let Ok(Some(raw)) = backend.get(physical).await {
            if let Ok(pref) = Envelope::decode(&raw)
                .and_then(|env| serde_json::from_value::<BackendPreference>(env.data))
            {
                return Some(pref);
            }
        }
    }
    None
}

async fn save_preference(tiers: &Tiers, physical: &str, pref: BackendPreference) {
    let Ok(payload) = serde_json::to_value(pref) else {
        return;
    };
    let Ok(record) = StoreRecord::seal(BACKEND_PREFERENCE, payload, pref.probed_at, "", false) else {
        return;
    };
    for backend in [&tiers.flat, &tiers.session].into_iter().flatten() {
        if let Err(e) = backend.put(physical, record.wire()).await {
            debug!(tier = %backend.tier(), error = %e, "Could not record backend preference");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::traits::StorageError;
    use async_trait::async_trait;

    struct Broken;

    #[async_trait]
    impl Backend for Broken {
        fn tier(&self) -> Tier {
            Tier::Structured
        }
        async fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Unavailable("down".into()))
        }
        async fn put(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("down".into()))
        }
        async fn delete(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("down".into()))
        }
        async fn keys(&self, _prefix: &str) -> Result<Vec<String>, StorageError> {
            Err(StorageError::Unavailable("down".into()))
        }
        async fn usage_bytes(&self, _prefix: &str) -> Result<usize, StorageError> {
            Err(StorageError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn test_nothing_usable_is_volatile_only() {
        let (tiers, previous) = probe(Candidates::none(), &Namespace::default()).await;
        assert!(tiers.availability().volatile_only());
        assert_eq!(tiers.availability().primary(), Tier::Volatile);
        assert!(previous.is_none());
        assert_eq!(tiers.all().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_probe_drops_tier() {
        let candidates = Candidates {
            structured: Some(Arc::new(Broken)),
            flat: Some(Arc::new(FlatStore::unbacked(1024))),
            session: None,
        };
        let (tiers, _) = probe(candidates, &Namespace::default()).await;
        let availability = tiers.availability();
        assert!(!availability.structured);
        assert!(availability.flat);
        assert_eq!(availability.primary(), Tier::Flat);
    }

    #[tokio::test]
    async fn test_preference_is_remembered() {
        let flat: Arc<dyn Backend> = Arc::new(FlatStore::unbacked(4096));
        let ns = Namespace::default();

        let first = Candidates {
            flat: Some(flat.clone()),
            ..Default::default()
        };
        let (_, previous) = probe(first, &ns).await;
        assert!(previous.is_none());

        let second = Candidates {
            flat: Some(flat.clone()),
            ..Default::default()
        };
        let (_, previous) = probe(second, &ns).await;
        assert_eq!(previous.map(|p| p.primary), Some(Tier::Flat));
        // No probe residue
        assert!(!flat.contains("__probe__").await.unwrap());
    }

    #[tokio::test]
    async fn test_read_order_skips_session_for_persistent() {
        let candidates = Candidates {
            flat: Some(Arc::new(FlatStore::unbacked(1024))),
            session: Some(Arc::new(FlatStore::session(1024))),
            ..Default::default()
        };
        let (tiers, _) = probe(candidates, &Namespace::default()).await;

        let persistent: Vec<Tier> = tiers.read_order(true).iter().map(|t| t.tier()).collect();
        assert_eq!(persistent, vec![Tier::Flat, Tier::Volatile]);
        let transient: Vec<Tier> = tiers.read_order(false).iter().map(|t| t.tier()).collect();
        assert_eq!(transient, vec![Tier::Flat, Tier::Session, Tier::Volatile]);
    }
}
