// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! One-shot startup migrations.
//!
//! ```text
//! Uninitialized → DefaultsSeeded → LegacyMigrated → Ready
//! ```
//!
//! 1. **Defaults**: on a store with no version stamp, absent keys get their
//!    default values and the stamp is written.
//! 2. **Legacy keys**: old un-namespaced key names are read, merged into
//!    their new logical key and deleted.
//! 3. **Physical rename**: keys under a deprecated namespace prefix are
//!    moved into the current namespace.
//!
//! Each migration class records a completion flag and never runs again,
//! even if some of its keys failed. A second run is a no-op.

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::coordinator::path::TieredPath;
use crate::keys::{
    is_internal, Namespace, EXAM_INDEX, LEARNING_GOALS, LEGACY_KEYS_FLAG, PHYSICAL_RENAME_FLAG,
    PRACTICE_RECORDS, SETTINGS, SYSTEM_VERSION, USER_STATS,
};
use crate::merge::merge_values;
use crate::metrics;
use crate::record::Envelope;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MigrationState {
    Uninitialized,
    DefaultsSeeded,
    LegacyMigrated,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationClass {
    LegacyKeys,
    PhysicalRename,
}

impl MigrationClass {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::LegacyKeys => "legacy_keys",
            Self::PhysicalRename => "physical_rename",
        }
    }

    fn flag(&self) -> &'static str {
        match self {
            Self::LegacyKeys => LEGACY_KEYS_FLAG,
            Self::PhysicalRename => PHYSICAL_RENAME_FLAG,
        }
    }
}

/// What a startup migration did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MigrationReport {
    /// Keys given their default value
    pub seeded: Vec<String>,
    /// Keys moved into an empty target
    pub installed: Vec<String>,
    /// Keys merged into existing data
    pub merged: Vec<String>,
    /// Source keys that could not be read or parsed
    pub skipped: Vec<String>,
    pub classes_run: Vec<MigrationClass>,
    /// Version stamp found before this run, when it differed
    pub previous_version: Option<String>,
}

impl MigrationReport {
    /// Nothing was changed.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.seeded.is_empty()
            && self.installed.is_empty()
            && self.merged.is_empty()
            && self.skipped.is_empty()
            && self.classes_run.is_empty()
            && self.previous_version.is_none()
    }
}

/// Default value for each seeded key.
#[must_use]
pub fn default_table() -> Vec<(&'static str, Value)> {
    vec![
        (
            USER_STATS,
            json!({
                "totalPractices": 0,
                "totalTimeSpent": 0,
                "averageScore": 0,
                "categoryStats": {},
                "questionTypeStats": {},
                "streakDays": 0,
                "lastPracticeDate": null,
                "achievements": []
            }),
        ),
        (
            SETTINGS,
            json!({
                "theme": "light",
                "notifications": true,
                "autoSave": true,
                "reminderTime": "19:00"
            }),
        ),
        (EXAM_INDEX, Value::Null),
        (PRACTICE_RECORDS, json!([])),
        (LEARNING_GOALS, json!([])),
    ]
}

fn default_for(key: &str) -> Option<Value> {
    default_table()
        .into_iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

/// Legacy text is either a sealed envelope or bare JSON.
fn parse_legacy(raw: &str) -> Result<Value, serde_json::Error> {
    Envelope::decode(raw)
        .map(|envelope| envelope.data)
        .or_else(|_| serde_json::from_str(raw))
}

/// Write defaults for absent keys. A stored null counts as absent unless
/// null is the default.
pub(crate) async fn seed_defaults(path: &TieredPath) -> Vec<String> {
    let mut seeded = Vec::new();
    for (key, value) in default_table() {
        let absent = match path.read_envelope(key).await {
            None => true,
            Some((_, envelope)) => envelope.data.is_null() && !value.is_null(),
        };
        if !absent {
            continue;
        }
        match path.set(key, &value, false).await {
            Ok(_) => seeded.push(key.to_string()),
            Err(e) => warn!(key, error = %e, "Could not seed default"),
        }
    }
    seeded
}

pub(crate) struct Migrator<'a> {
    path: &'a TieredPath,
    state: MigrationState,
    report: MigrationReport,
}

impl<'a> Migrator<'a> {
    pub(crate) fn new(path: &'a TieredPath) -> Self {
        Self {
            path,
            state: MigrationState::Uninitialized,
            report: MigrationReport::default(),
        }
    }

    fn advance(&mut self, next: MigrationState) {
        debug!(from = ?self.state, to = ?next, "Migration state");
        self.state = next;
    }

    pub(crate) async fn run(mut self) -> MigrationReport {
        self.seed().await;
        self.advance(MigrationState::DefaultsSeeded);

        self.run_class(MigrationClass::LegacyKeys).await;
        self.run_class(MigrationClass::PhysicalRename).await;
        self.advance(MigrationState::LegacyMigrated);

        self.advance(MigrationState::Ready);
        if !self.report.is_noop() {
            info!(
                seeded = self.report.seeded.len(),
                installed = self.report.installed.len(),
                merged = self.report.merged.len(),
                skipped = self.report.skipped.len(),
                "Startup migration finished"
            );
        }
        self.report
    }

    async fn seed(&mut self) {
        let current = &self.path.shared.config.schema_version;
        let stamp = self
            .path
            .get_value(SYSTEM_VERSION)
            .await
            .and_then(|v| v.as_str().map(str::to_string));

        match stamp {
            None => {
                self.report.seeded = seed_defaults(self.path).await;
            }
            Some(found) if found == *current => return,
            Some(found) => {
                info!(from = %found, to = %current, "Schema version changed");
                self.report.previous_version = Some(found);
            }
        }
        if let Err(e) = self.path.set(SYSTEM_VERSION, current.as_str(), false).await {
            warn!(error = %e, "Could not write version stamp");
        }
    }

    async fn flag_set(&self, class: MigrationClass) -> bool {
        self.path
            .get_value(class.flag())
            .await
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    async fn run_class(&mut self, class: MigrationClass) {
        if self.flag_set(class).await {
            return;
        }
        match class {
            MigrationClass::LegacyKeys => self.legacy_keys().await,
            MigrationClass::PhysicalRename => self.physical_rename().await,
        }
        // Set even when some keys were skipped
        if let Err(e) = self.path.set(class.flag(), &true, false).await {
            warn!(class = class.label(), error = %e, "Could not record migration flag");
        }
        self.report.classes_run.push(class);
    }

    async fn legacy_keys(&mut self) {
        let legacy = self.path.shared.config.legacy_keys.clone();
        for entry in &legacy {
            self.migrate_physical(&entry.from, &entry.to, MigrationClass::LegacyKeys)
                .await;
        }
    }

    async fn physical_rename(&mut self) {
        let Some(old) = self.path.shared.config.deprecated_namespace.clone() else {
            return;
        };
        let current = self.path.namespace();
        if old.is_empty() || old == current.prefix() {
            return;
        }
        let old_ns = Namespace::new(old);
        // A current prefix that extends the old one would list current keys too
        let shadows = current.prefix().starts_with(old_ns.prefix());

        for physical in self.path.physical_keys(old_ns.prefix()).await {
            if shadows && physical.starts_with(current.prefix()) {
                continue;
            }
            let Some(logical) = old_ns.logical(&physical).map(str::to_string) else {
                continue;
            };
            if logical.is_empty() || is_internal(&logical) {
                self.path.remove_physical(&physical).await;
                continue;
            }
            self.migrate_physical(&physical, &logical, MigrationClass::PhysicalRename)
                .await;
        }
    }

    /// Move one physical key into a logical key, merging with existing data.
    async fn migrate_physical(&mut self, from: &str, to: &str, class: MigrationClass) {
        let Some(raw) = self.path.read_raw_physical(from).await else {
            return;
        };
        let incoming = match parse_legacy(&raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = from, error = %e, "Unparseable legacy data, skipping");
                metrics::record_migration(class.label(), "skipped");
                self.report.skipped.push(from.to_string());
                return;
            }
        };

        // A target still holding its seeded default has no user data yet
        let existing = self
            .path
            .get_value(to)
            .await
            .filter(|v| !v.is_null() && default_for(to).as_ref() != Some(v));

        let (value, merged) = match existing {
            Some(current) => (merge_values(&current, &incoming), true),
            None => (incoming, false),
        };

        if let Err(e) = self.path.set(to, &value, false).await {
            warn!(from, to, error = %e, "Could not write migrated data, keeping source");
            metrics::record_migration(class.label(), "failed");
            self.report.skipped.push(from.to_string());
            return;
        }
        self.path.remove_physical(from).await;

        debug!(from, to, merged, "Migrated key");
        metrics::record_migration(class.label(), if merged { "merged" } else { "installed" });
        if merged {
            self.report.merged.push(to.to_string());
        } else {
            self.report.installed.push(to.to_string());
        }
    }
}
