// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cleanup under storage pressure.
//!
//! Steps run in order and stop as soon as the pending write fits:
//! 1. Re-trim records in the record collections to their core fields
//! 2. Cut log collections to their most recent entries
//! 3. Drop active-session entries older than the session TTL
//!
//! Values are only ever shrunk in place. No key is deleted, so persistent
//! keys survive every pass. A value written after cleanup read it is left
//! alone.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::DateTime;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::path::TieredPath;
use crate::compression::Compressed;
use crate::keys::ACTIVE_SESSIONS;
use crate::metrics;
use crate::quota::{CleanupReport, CleanupStep, QuotaMode};
use crate::record::{now_millis, Envelope};

/// Clears the in-progress flag on drop.
struct CleaningGuard<'a>(&'a AtomicBool);

impl Drop for CleaningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Session start time in epoch millis, from a number or a date string.
fn start_millis(session: &Value) -> Option<i64> {
    match session.get("startTime")? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s
            .parse::<i64>()
            .ok()
            .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|d| d.timestamp_millis())),
        _ => None,
    }
}

impl TieredPath {
    /// Run a cleanup pass.
    ///
    /// With `needed`, stop once a write of that many bytes fits. Without it,
    /// run every step. Returns a skipped report if a pass is already running.
    pub(crate) async fn cleanup(&self, needed: Option<usize>) -> CleanupReport {
        if self.shared.cleaning.swap(true, Ordering::AcqRel) {
            debug!("Cleanup already running, skipping");
            return CleanupReport {
                skipped: true,
                ..Default::default()
            };
        }
        let _guard = CleaningGuard(&self.shared.cleaning);

        let mode = self.quota_mode();
        let mut report = CleanupReport {
            usage_before: self.usage(mode).await,
            ..Default::default()
        };

        'steps: {
            for key in &self.shared.config.record_collections {
                if self.relieved(mode, needed).await {
                    break 'steps;
                }
                if let Some(step) = self.retrim_records(key).await {
                    report.steps.push(step);
                }
            }
            for key in &self.shared.config.log_keys {
                if self.relieved(mode, needed).await {
                    break 'steps;
                }
                if let Some(step) = self.truncate_log(key).await {
                    report.steps.push(step);
                }
            }
            if self.relieved(mode, needed).await {
                break 'steps;
            }
            if let Some(step) = self.prune_sessions().await {
                report.steps.push(step);
            }
        }

        report.usage_after = self.usage(mode).await;
        report.relieved = self
            .shared
            .quota
            .check(mode, report.usage_after, needed.unwrap_or(0));

        for step in &report.steps {
            metrics::record_cleanup_step(step.label());
        }
        metrics::record_cleanup(report.freed_bytes());
        info!(
            steps = report.steps.len(),
            freed = report.freed_bytes(),
            relieved = report.relieved,
            "Storage cleanup finished"
        );
        report
    }

    async fn relieved(&self, mode: QuotaMode, needed: Option<usize>) -> bool {
        match needed {
            Some(size) => self.shared.quota.check(mode, self.usage(mode).await, size),
            None => false,
        }
    }

    /// Array value under `key` with the stamp it was read at.
    async fn read_array(&self, key: &str) -> Option<(Vec<Value>, i64)> {
        match self.read_envelope(key).await? {
            (_, Envelope { data: Value::Array(items), timestamp, .. }) => Some((items, timestamp)),
            _ => None,
        }
    }

    async fn rewrite(&self, key: &str, value: Value, read_at: i64) -> bool {
        let shrunk = Compressed {
            value,
            compressed: true,
        };
        match self.rewrite_in_place(key, shrunk, read_at).await {
            Ok(written) => written,
            Err(e) => {
                warn!(key, error = %e, "Cleanup rewrite failed");
                false
            }
        }
    }

    async fn retrim_records(&self, key: &str) -> Option<CleanupStep> {
        let (records, read_at) = self.read_array(key).await?;
        let policy = &self.shared.compression;
        let mut changed = 0;
        let trimmed: Vec<Value> = records
            .into_iter()
            .map(|record| match record {
                Value::Object(map) => {
                    let cut = policy.trim_record(&map);
                    if cut != map {
                        changed += 1;
                    }
                    Value::Object(cut)
                }
                other => other,
            })
            .collect();

        if changed == 0 || !self.rewrite(key, Value::Array(trimmed), read_at).await {
            return None;
        }
        debug!(key, records = changed, "Re-trimmed records");
        Some(CleanupStep::RetrimRecords {
            key: key.to_string(),
            records: changed,
        })
    }

    async fn truncate_log(&self, key: &str) -> Option<CleanupStep> {
        let (entries, read_at) = self.read_array(key).await?;
        let keep = self.shared.config.log_keep;
        let from = entries.len();
        if from <= keep {
            return None;
        }
        let kept: Vec<Value> = entries.into_iter().skip(from - keep).collect();
        if !self.rewrite(key, Value::Array(kept), read_at).await {
            return None;
        }
        debug!(key, from, to = keep, "Truncated log");
        Some(CleanupStep::TruncateLog {
            key: key.to_string(),
            from,
            to: keep,
        })
    }

    async fn prune_sessions(&self) -> Option<CleanupStep> {
        let ttl_ms = i64::try_from(self.shared.config.session_ttl_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        let cutoff = now_millis().saturating_sub(ttl_ms);
        // Entries without a readable start time are kept
        let fresh = |session: &Value| start_millis(session).map_or(true, |start| start >= cutoff);

        let (_, envelope) = self.read_envelope(ACTIVE_SESSIONS).await?;
        let read_at = envelope.timestamp;
        let (pruned, from, to) = match envelope.data {
            Value::Object(sessions) => {
                let from = sessions.len();
                let kept: Map<String, Value> = sessions.into_iter().filter(|(_, s)| fresh(s)).collect();
                let to = kept.len();
                (Value::Object(kept), from, to)
            }
            Value::Array(sessions) => {
                let from = sessions.len();
                let kept: Vec<Value> = sessions.into_iter().filter(|s| fresh(s)).collect();
                let to = kept.len();
                (Value::Array(kept), from, to)
            }
            _ => return None,
        };

        if to == from || !self.rewrite(ACTIVE_SESSIONS, pruned, read_at).await {
            return None;
        }
        debug!(from, to, "Pruned stale sessions");
        Some(CleanupStep::PruneSessions {
            key: ACTIVE_SESSIONS.to_string(),
            from,
            to,
        })
    }
}
