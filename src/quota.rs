// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Capacity checks and storage pressure.
//!
//! Which limit applies depends on the tiers that were probed:
//!
//! - **Flat**: Tier B is the only durable tier. Writes must leave a buffer
//!   (20% by default) of the hard quota free.
//! - **Combined**: Tier A is present. Usage across A and B is held under a
//!   fixed ceiling.
//! - **Unbounded**: volatile only, nothing to protect.
//!
//! # Example
//!
//! ```
//! use practice_store::{QuotaManager, QuotaMode, StoragePressure, StoreConfig};
//!
//! let quota = QuotaManager::from_config(&StoreConfig {
//!     flat_quota_bytes: 1000,
//!     ..Default::default()
//! });
//!
//! // 1000 byte quota with a 20% buffer leaves 800 usable
//! assert!(quota.check(QuotaMode::Flat, 700, 100));
//! assert!(!quota.check(QuotaMode::Flat, 700, 101));
//!
//! assert_eq!(quota.pressure(QuotaMode::Flat, 850), StoragePressure::Elevated);
//! ```

use serde::Serialize;

use crate::config::StoreConfig;

/// Which capacity limit governs writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaMode {
    Flat,
    Combined,
    Unbounded,
}

impl std::fmt::Display for QuotaMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Flat => write!(f, "flat"),
            Self::Combined => write!(f, "combined"),
            Self::Unbounded => write!(f, "unbounded"),
        }
    }
}

/// Usage relative to the active limit.
///
/// - **Normal** (< warn): nothing to do
/// - **Elevated** (warn..critical): run cleanup
/// - **Critical** (>= critical): cleanup did not help, tell the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoragePressure {
    Normal = 0,
    Elevated = 1,
    Critical = 2,
}

impl StoragePressure {
    #[must_use]
    pub fn from_ratio(ratio: f64, warn: f64, critical: f64) -> Self {
        match ratio {
            r if r >= critical => Self::Critical,
            r if r >= warn => Self::Elevated,
            _ => Self::Normal,
        }
    }

    #[must_use]
    pub fn should_cleanup(&self) -> bool {
        !matches!(self, Self::Normal)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Normal => "Normal operation",
            Self::Elevated => "High storage usage - cleaning up",
            Self::Critical => "Storage nearly full - old data should be exported",
        }
    }
}

impl std::fmt::Display for StoragePressure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[derive(Debug, Clone)]
pub struct QuotaManager {
    flat_quota: usize,
    buffer_ratio: f64,
    ceiling: usize,
    warn: f64,
    critical: f64,
}

impl QuotaManager {
    #[must_use]
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            flat_quota: config.flat_quota_bytes,
            buffer_ratio: config.quota_buffer_ratio.clamp(0.0, 1.0),
            ceiling: config.structured_ceiling_bytes,
            warn: config.pressure_warn,
            critical: config.pressure_critical,
        }
    }

    /// Largest usage the flat tier may reach through normal writes.
    #[must_use]
    pub fn safe_flat_limit(&self) -> usize {
        let reserved = (self.flat_quota as f64 * self.buffer_ratio).round() as usize;
        self.flat_quota.saturating_sub(reserved)
    }

    /// Limit that usage is measured against in `mode`.
    #[must_use]
    pub fn limit(&self, mode: QuotaMode) -> Option<usize> {
        match mode {
            QuotaMode::Flat => Some(self.flat_quota),
            QuotaMode::Combined => Some(self.ceiling),
            QuotaMode::Unbounded => None,
        }
    }

    /// Would a write of `size` bytes on top of `usage` fit?
    #[must_use]
    pub fn check(&self, mode: QuotaMode, usage: usize, size: usize) -> bool {
        let after = usage.saturating_add(size);
        match mode {
            QuotaMode::Flat => after <= self.safe_flat_limit(),
            QuotaMode::Combined => after <= self.ceiling,
            QuotaMode::Unbounded => true,
        }
    }

    #[must_use]
    pub fn pressure(&self, mode: QuotaMode, usage: usize) -> StoragePressure {
        match self.limit(mode) {
            Some(limit) if limit > 0 => {
                StoragePressure::from_ratio(usage as f64 / limit as f64, self.warn, self.critical)
            }
            Some(_) => StoragePressure::Critical,
            None => StoragePressure::Normal,
        }
    }
}

/// One action taken by a cleanup pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum CleanupStep {
    /// Records in a collection re-trimmed to core fields
    RetrimRecords { key: String, records: usize },
    /// Log collection cut to its most recent entries
    TruncateLog { key: String, from: usize, to: usize },
    /// Stale session entries dropped
    PruneSessions { key: String, from: usize, to: usize },
}

impl CleanupStep {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            Self::RetrimRecords { .. } => "retrim_records",
            Self::TruncateLog { .. } => "truncate_log",
            Self::PruneSessions { .. } => "prune_sessions",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub usage_before: usize,
    pub usage_after: usize,
    pub steps: Vec<CleanupStep>,
    /// The pending write fits after cleanup
    pub relieved: bool,
    /// Another cleanup was already running
    pub skipped: bool,
}

impl CleanupReport {
    #[must_use]
    pub fn freed_bytes(&self) -> usize {
        self.usage_before.saturating_sub(self.usage_after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(flat_quota: usize) -> QuotaManager {
        QuotaManager::from_config(&StoreConfig {
            flat_quota_bytes: flat_quota,
            structured_ceiling_bytes: 10_000,
            ..Default::default()
        })
    }

    #[test]
    fn test_flat_buffer_boundary() {
        let quota = manager(5 * 1024 * 1024);
        let safe = quota.safe_flat_limit();
        // 5 MB minus 1 MB buffer
        assert_eq!(safe, 4 * 1024 * 1024);
        assert!(quota.check(QuotaMode::Flat, 0, safe));
        assert!(!quota.check(QuotaMode::Flat, 0, safe + 1));
    }

    #[test]
    fn test_combined_ceiling_has_no_buffer() {
        let quota = manager(1000);
        assert!(quota.check(QuotaMode::Combined, 9_000, 1_000));
        assert!(!quota.check(QuotaMode::Combined, 9_000, 1_001));
    }

    #[test]
    fn test_unbounded_always_fits() {
        let quota = manager(1);
        assert!(quota.check(QuotaMode::Unbounded, usize::MAX, usize::MAX));
        assert_eq!(quota.pressure(QuotaMode::Unbounded, usize::MAX), StoragePressure::Normal);
    }

    #[test]
    fn test_pressure_levels() {
        assert_eq!(StoragePressure::from_ratio(0.5, 0.8, 0.9), StoragePressure::Normal);
        assert_eq!(StoragePressure::from_ratio(0.8, 0.8, 0.9), StoragePressure::Elevated);
        assert_eq!(StoragePressure::from_ratio(0.95, 0.8, 0.9), StoragePressure::Critical);
        assert!(StoragePressure::Elevated.should_cleanup());
        assert!(!StoragePressure::Normal.should_cleanup());
    }

    #[test]
    fn test_pressure_from_usage() {
        let quota = manager(1000);
        assert_eq!(quota.pressure(QuotaMode::Flat, 100), StoragePressure::Normal);
        assert_eq!(quota.pressure(QuotaMode::Flat, 900), StoragePressure::Critical);
    }

    #[test]
    fn test_cleanup_report_freed() {
        let report = CleanupReport {
            usage_before: 900,
            usage_after: 600,
            ..Default::default()
        };
        assert_eq!(report.freed_bytes(), 300);
    }
}
