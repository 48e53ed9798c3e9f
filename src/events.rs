// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change notifications.
//!
//! Subscribers get a [`tokio::sync::broadcast`] receiver. Sending never
//! blocks a write, and a send with no subscribers is not an error. A lagging
//! subscriber loses the oldest events (see `RecvError::Lagged`).

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::keys::is_internal;
use crate::quota::StoragePressure;
use crate::storage::traits::Tier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Set,
    Remove,
}

/// Events published by the store.
///
/// `Changed` and `Cleared` report data changes. The remaining variants are
/// user-facing notices about storage health.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    /// A logical key was written or removed
    Changed { key: String, op: ChangeOp },
    /// Every key in the namespace was cleared
    Cleared,
    /// Usage crossed a threshold
    QuotaPressure {
        pressure: StoragePressure,
        usage_bytes: usize,
        limit_bytes: usize,
    },
    /// Fewer tiers are usable than on the previous run
    Degraded { primary: Tier },
    /// A persistent key could not be written to any durable tier
    PersistenceFailure { key: String },
}

#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    tx: broadcast::Sender<StoreEvent>,
}

impl ChangeNotifier {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }

    /// Publish a key change. Internal bookkeeping keys are suppressed.
    pub fn changed(&self, key: &str, op: ChangeOp) {
        if is_internal(key) {
            return;
        }
        self.publish(StoreEvent::Changed {
            key: key.to_string(),
            op,
        });
    }

    pub fn publish(&self, event: StoreEvent) {
        if self.tx.send(event).is_err() {
            trace!("No change subscribers");
        }
    }
}
