// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Store lifecycle: startup, pressure monitor, session end.

use std::time::Instant;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::path::TieredPath;
use super::{Store, StoreState};
use crate::events::StoreEvent;
use crate::migration::Migrator;
use crate::probe::{probe, Candidates};
use crate::quota::StoragePressure;

impl Store {
    /// Run startup now instead of on the first operation.
    pub async fn init(&self) {
        self.path().await;
    }

    /// Startup flow:
    /// 1. Open candidate backends (config or injected)
    /// 2. Probe each; drop the ones that fail
    /// 3. Compare with the previous run's preference, notify if degraded
    /// 4. Run migrations
    /// 5. Ready
    #[tracing::instrument(skip(self))]
    pub(super) async fn bootstrap(&self) -> TieredPath {
        let startup_start = Instant::now();
        let _ = self.state.send(StoreState::Probing);

        let phase_start = Instant::now();
        let injected = self.candidates.lock().take();
        let candidates = match injected {
            Some(candidates) => candidates,
            None => Candidates::from_config(&self.shared.config).await,
        };
        let namespace = self.shared.namespace();
        let (tiers, previous) = probe(candidates, &namespace).await;
        crate::metrics::record_startup_phase("probe", phase_start.elapsed());

        let primary = tiers.availability().primary();
        if let Some(previous) = previous {
            if primary > previous.primary {
                warn!(
                    previous = %previous.primary,
                    current = %primary,
                    "Storage degraded since last run"
                );
                self.shared
                    .notifier
                    .publish(StoreEvent::Degraded { primary });
            }
        }

        let path = TieredPath::new(tiers, self.shared.clone());

        let _ = self.state.send(StoreState::Migrating);
        let phase_start = Instant::now();
        let report = Migrator::new(&path).run().await;
        crate::metrics::record_startup_phase("migrate", phase_start.elapsed());
        let _ = self.migration_report.set(report);

        let _ = self.state.send(StoreState::Ready);
        crate::metrics::record_startup_phase("total", startup_start.elapsed());
        info!(primary = %primary, namespace = %namespace, "Store ready");
        path
    }

    /// Measure usage; clean up at elevated pressure and warn subscribers if
    /// it stays critical.
    #[tracing::instrument(skip(self))]
    pub async fn check_pressure(&self) -> StoragePressure {
        let path = self.path().await;
        let mode = path.quota_mode();
        let quota = &self.shared.quota;

        let usage = path.usage(mode).await;
        let mut pressure = quota.pressure(mode, usage);
        debug!(%mode, usage, %pressure, "Storage pressure check");

        if pressure.should_cleanup() {
            info!(%pressure, usage, "Storage usage high, running cleanup");
            path.cleanup(None).await;
            pressure = quota.pressure(mode, path.usage(mode).await);
            if pressure == StoragePressure::Critical {
                warn!("Storage still critical after cleanup");
                path.notify_pressure(mode).await;
            }
        }

        crate::metrics::set_storage_pressure(pressure as u8);
        pressure
    }

    /// Periodic pressure checks until `shutdown` flips to true or its sender
    /// is dropped.
    pub async fn run_monitor(&self, mut shutdown: watch::Receiver<bool>) {
        let period = std::time::Duration::from_secs(self.shared.config.monitor_interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = period.as_secs(), "Storage monitor running");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_pressure().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Storage monitor stopping");
                        break;
                    }
                }
            }
        }
    }

    /// Drop everything held in the session tier.
    pub async fn end_session(&self) -> usize {
        let path = self.path().await;
        let Some(session) = path.tiers.session.as_deref() else {
            return 0;
        };
        let keys = match session.keys("").await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Could not list session keys");
                return 0;
            }
        };
        let mut dropped = 0;
        for key in &keys {
            match session.delete(key).await {
                Ok(()) => dropped += 1,
                Err(e) => debug!(key = %key, error = %e, "Session delete failed"),
            }
        }
        info!(dropped, "Session ended");
        dropped
    }
}
