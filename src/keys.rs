// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Well-known keys, the persistent key set and namespacing.
//!
//! Callers always speak in logical keys (`practice_records`). Backends only
//! ever see physical keys, which are the logical key behind the current
//! namespace prefix (`exam_system_practice_records`).

use std::collections::BTreeSet;

pub const PRACTICE_RECORDS: &str = "practice_records";
pub const USER_STATS: &str = "user_stats";
pub const SETTINGS: &str = "settings";
pub const EXAM_INDEX: &str = "exam_index";
pub const MANUAL_BACKUPS: &str = "manual_backups";
pub const EXPORT_HISTORY: &str = "export_history";
pub const IMPORT_HISTORY: &str = "import_history";
pub const LEARNING_GOALS: &str = "learning_goals";

pub const INJECTION_ERRORS: &str = "injection_errors";
pub const COLLECTION_ERRORS: &str = "collection_errors";
pub const ACTIVE_SESSIONS: &str = "active_sessions";

pub const SYSTEM_VERSION: &str = "system_version";
pub const BACKEND_PREFERENCE: &str = "backend_preference";
pub const LEGACY_KEYS_FLAG: &str = "migration_legacy_keys_done";
pub const PHYSICAL_RENAME_FLAG: &str = "migration_physical_rename_done";
pub const PROBE_KEY: &str = "__probe__";

/// Default namespace prefix.
pub const DEFAULT_NAMESPACE: &str = "exam_system_";

/// Bookkeeping keys: never notified, never exported, kept by `clear`.
#[must_use]
pub fn is_internal(key: &str) -> bool {
    matches!(
        key,
        SYSTEM_VERSION | BACKEND_PREFERENCE | LEGACY_KEYS_FLAG | PHYSICAL_RENAME_FLAG
    ) || key.starts_with("__")
}

/// Keys whose writes must land in a durable tier.
#[derive(Debug, Clone)]
pub struct PersistentKeySet {
    keys: BTreeSet<String>,
}

impl PersistentKeySet {
    #[must_use]
    pub fn with_extra<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::default();
        set.keys.extend(extra.into_iter().map(Into::into));
        set
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }
}

impl Default for PersistentKeySet {
    fn default() -> Self {
        Self {
            keys: [
                PRACTICE_RECORDS,
                USER_STATS,
                SETTINGS,
                EXAM_INDEX,
                MANUAL_BACKUPS,
                EXPORT_HISTORY,
                IMPORT_HISTORY,
                LEARNING_GOALS,
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// Namespace prefix applied to every physical key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace(String);

impl Namespace {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self(prefix.into())
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn physical(&self, key: &str) -> String {
        format!("{}{}", self.0, key)
    }

    /// Logical key for a physical key in this namespace.
    #[must_use]
    pub fn logical<'a>(&self, physical: &'a str) -> Option<&'a str> {
        physical.strip_prefix(self.0.as_str())
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_persistent_keys() {
        let set = PersistentKeySet::default();
        assert!(set.contains(PRACTICE_RECORDS));
        assert!(set.contains(LEARNING_GOALS));
        assert!(!set.contains("vocab_list_custom"));
        assert_eq!(set.iter().count(), 8);
    }

    #[test]
    fn test_extra_persistent_keys() {
        let set = PersistentKeySet::with_extra(["vocab_list_custom"]);
        assert!(set.contains("vocab_list_custom"));
        assert!(set.contains(SETTINGS));
    }

    #[test]
    fn test_internal_keys() {
        assert!(is_internal(BACKEND_PREFERENCE));
        assert!(is_internal(SYSTEM_VERSION));
        assert!(is_internal(PROBE_KEY));
        assert!(is_internal("__scratch"));
        assert!(!is_internal(SETTINGS));
    }

    #[test]
    fn test_namespace_round_trip() {
        let ns = Namespace::default();
        let physical = ns.physical(USER_STATS);
        assert_eq!(physical, "exam_system_user_stats");
        assert_eq!(ns.logical(&physical), Some(USER_STATS));
        assert_eq!(ns.logical("other_user_stats"), None);
    }
}
