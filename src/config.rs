// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the store.
//!
//! # Example
//!
//! ```
//! use practice_store::StoreConfig;
//!
//! // Minimal config (uses defaults)
//! let config = StoreConfig::default();
//! assert_eq!(config.namespace, "exam_system_");
//! assert_eq!(config.flat_quota_bytes, 5 * 1024 * 1024); // 5 MB
//!
//! // Durable tiers on disk
//! let config = StoreConfig {
//!     structured_url: Some("sqlite://practice.db?mode=rwc".into()),
//!     flat_path: Some("practice-flat.json".into()),
//!     ..Default::default()
//! };
//! assert!(config.session_enabled);
//! ```

use serde::Deserialize;

use crate::keys::DEFAULT_NAMESPACE;

/// A legacy physical key and the logical key it migrates into.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LegacyKey {
    pub from: String,
    pub to: String,
}

impl LegacyKey {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Configuration for the store.
///
/// All fields have defaults. With neither `structured_url` nor `flat_path`
/// set, only the session and volatile tiers are available.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Prefix for every physical key
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Version written into every envelope and the version stamp
    #[serde(default = "default_schema_version")]
    pub schema_version: String,

    /// Tier A connection string (e.g., "sqlite://practice.db?mode=rwc")
    #[serde(default)]
    pub structured_url: Option<String>,

    /// Tier B file path
    #[serde(default)]
    pub flat_path: Option<String>,

    /// Tier C (session map) toggle
    #[serde(default = "default_true")]
    pub session_enabled: bool,

    /// Tier B hard quota (default: 5 MB)
    #[serde(default = "default_flat_quota_bytes")]
    pub flat_quota_bytes: usize,

    /// Share of the Tier B quota held back from writes
    #[serde(default = "default_quota_buffer_ratio")]
    pub quota_buffer_ratio: f64,

    /// Combined ceiling when Tier A is present (default: 105 MB)
    #[serde(default = "default_structured_ceiling_bytes")]
    pub structured_ceiling_bytes: usize,

    /// Compression
    #[serde(default = "default_compression_threshold_chars")]
    pub compression_threshold_chars: usize,
    #[serde(default = "default_interaction_keep")]
    pub interaction_keep: usize,

    /// Cleanup
    #[serde(default = "default_record_collections")]
    pub record_collections: Vec<String>,
    #[serde(default = "default_log_keys")]
    pub log_keys: Vec<String>,
    #[serde(default = "default_log_keep")]
    pub log_keep: usize,
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    /// Pressure thresholds (share of the active limit)
    #[serde(default = "default_pressure_warn")]
    pub pressure_warn: f64,
    #[serde(default = "default_pressure_critical")]
    pub pressure_critical: f64,

    /// Storage monitor period
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,

    /// Manual backups and export/import history kept
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Added to the built-in persistent key set
    #[serde(default)]
    pub extra_persistent_keys: Vec<String>,

    /// Legacy physical keys folded in once at startup
    #[serde(default = "default_legacy_keys")]
    pub legacy_keys: Vec<LegacyKey>,

    /// Previous physical prefix whose keys move into `namespace` once
    #[serde(default = "default_deprecated_namespace")]
    pub deprecated_namespace: Option<String>,

    /// Change event channel capacity
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Origin tag for vocabulary error tallies (random per store if unset)
    #[serde(default)]
    pub writer_id: Option<String>,
}

fn default_namespace() -> String { DEFAULT_NAMESPACE.to_string() }
fn default_schema_version() -> String { "1.0.0".to_string() }
fn default_true() -> bool { true }
fn default_flat_quota_bytes() -> usize { 5 * 1024 * 1024 } // 5 MB
fn default_quota_buffer_ratio() -> f64 { 0.2 }
fn default_structured_ceiling_bytes() -> usize { 105 * 1024 * 1024 } // 105 MB
fn default_compression_threshold_chars() -> usize { 1000 }
fn default_interaction_keep() -> usize { 50 }
fn default_record_collections() -> Vec<String> { vec!["practice_records".into()] }
fn default_log_keys() -> Vec<String> { vec!["injection_errors".into(), "collection_errors".into()] }
fn default_log_keep() -> usize { 20 }
fn default_session_ttl_secs() -> u64 { 60 * 60 }
fn default_pressure_warn() -> f64 { 0.8 }
fn default_pressure_critical() -> f64 { 0.9 }
fn default_monitor_interval_secs() -> u64 { 5 * 60 }
fn default_max_backups() -> usize { 20 }
fn default_history_limit() -> usize { 50 }
fn default_event_capacity() -> usize { 256 }
fn default_deprecated_namespace() -> Option<String> { Some("exam_system_v0_".to_string()) }
fn default_legacy_keys() -> Vec<LegacyKey> {
    vec![
        LegacyKey::new("practiceRecords", "practice_records"),
        LegacyKey::new("userStats", "user_stats"),
        LegacyKey::new("examIndex", "exam_index"),
        LegacyKey::new("vocab_errors_p1", "vocab_list_p1_errors"),
        LegacyKey::new("vocab_errors_p4", "vocab_list_p4_errors"),
        // Un-namespaced keys written before namespacing existed
        LegacyKey::new("practice_records", "practice_records"),
        LegacyKey::new("user_stats", "user_stats"),
        LegacyKey::new("exam_index", "exam_index"),
    ]
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            schema_version: default_schema_version(),
            structured_url: None,
            flat_path: None,
            session_enabled: default_true(),
            flat_quota_bytes: default_flat_quota_bytes(),
            quota_buffer_ratio: default_quota_buffer_ratio(),
            structured_ceiling_bytes: default_structured_ceiling_bytes(),
            compression_threshold_chars: default_compression_threshold_chars(),
            interaction_keep: default_interaction_keep(),
            record_collections: default_record_collections(),
            log_keys: default_log_keys(),
            log_keep: default_log_keep(),
            session_ttl_secs: default_session_ttl_secs(),
            pressure_warn: default_pressure_warn(),
            pressure_critical: default_pressure_critical(),
            monitor_interval_secs: default_monitor_interval_secs(),
            max_backups: default_max_backups(),
            history_limit: default_history_limit(),
            extra_persistent_keys: Vec::new(),
            legacy_keys: default_legacy_keys(),
            deprecated_namespace: default_deprecated_namespace(),
            event_capacity: default_event_capacity(),
            writer_id: None,
        }
    }
}
