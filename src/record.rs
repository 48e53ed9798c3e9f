// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Stored record format.
//!
//! Every tier holds the same JSON text for a key:
//!
//! ```text
//! {"data": <payload>, "timestamp": <epoch ms>, "version": "1.0.0", "compressed": false}
//! ```
//!
//! [`StoreRecord`] is the sealed, ready-to-write form: the envelope plus its
//! encoded text, so the byte size used for quota checks is computed once.
//!
//! # Example
//!
//! ```
//! use practice_store::{Envelope, StoreRecord};
//! use serde_json::json;
//!
//! let record = StoreRecord::seal("settings", json!({"theme": "light"}), 42, "1.0.0", false).unwrap();
//! assert_eq!(record.key(), "settings");
//!
//! let decoded = Envelope::decode(record.wire()).unwrap();
//! assert_eq!(decoded.timestamp, 42);
//! assert_eq!(decoded.data["theme"], "light");
//! ```

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall clock in epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Persisted wrapper around a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub data: Value,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub compressed: bool,
}

impl Envelope {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse envelope text. Text without a `data` field is not an envelope.
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// A sealed record: logical key, envelope and its wire text.
#[derive(Debug, Clone)]
pub struct StoreRecord {
    key: String,
    envelope: Envelope,
    wire: String,
}

impl StoreRecord {
    pub fn seal(
        key: impl Into<String>,
        payload: Value,
        timestamp: i64,
        schema_version: &str,
        compressed: bool,
    ) -> Result<Self, serde_json::Error> {
        let envelope = Envelope {
            data: payload,
            timestamp,
            version: schema_version.to_string(),
            compressed,
        };
        let wire = envelope.encode()?;
        Ok(Self {
            key: key.into(),
            envelope,
            wire,
        })
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    #[must_use]
    pub fn wire(&self) -> &str {
        &self.wire
    }

    /// Encoded size in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.wire.len()
    }
}

/// Per-key write clock. Successive stamps for one key strictly increase,
/// even if the wall clock stalls or goes backwards.
#[derive(Debug, Default)]
pub struct WriteClock {
    last: DashMap<String, i64>,
}

impl WriteClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stamp(&self, key: &str) -> i64 {
        self.stamp_at(key, now_millis())
    }

    pub(crate) fn stamp_at(&self, key: &str, now: i64) -> i64 {
        match self.last.entry(key.to_string()) {
            Entry::Occupied(mut last) => {
                let next = now.max(last.get().saturating_add(1));
                last.insert(next);
                next
            }
            Entry::Vacant(slot) => *slot.insert(now),
        }
    }
}
