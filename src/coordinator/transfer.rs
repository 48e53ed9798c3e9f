// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Export, import and manual backups.
//!
//! Import is all or nothing: every entry is shape-checked before anything is
//! touched, and a write failure part way through restores the snapshot taken
//! before the import started.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::path::TieredPath;
use super::types::{ImportReport, StoreError};
use super::Store;
use crate::compression::Compressed;
use crate::keys::{is_internal, EXAM_INDEX, EXPORT_HISTORY, IMPORT_HISTORY, MANUAL_BACKUPS, PRACTICE_RECORDS, USER_STATS};
use crate::migration::seed_defaults;
use crate::record::Envelope;

/// Keys captured by a manual backup.
pub const BACKUP_KEYS: [&str; 3] = [PRACTICE_RECORDS, USER_STATS, EXAM_INDEX];

/// Portable dump of a namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportEnvelope {
    pub version: String,
    /// RFC 3339 export time
    pub export_date: String,
    pub data: BTreeMap<String, Envelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_info: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupEntry {
    pub id: String,
    pub label: String,
    pub timestamp: String,
    pub data: BTreeMap<String, Value>,
}

/// One line of export or import history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub id: String,
    pub timestamp: String,
    pub keys: usize,
    pub version: String,
}

fn invalid(key: &str, reason: impl Into<String>) -> StoreError {
    StoreError::Validation {
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// Shape checks for keys with a known structure. Other keys pass.
pub(crate) fn validate_entry(key: &str, value: &Value) -> Result<(), StoreError> {
    match key {
        PRACTICE_RECORDS => {
            let Value::Array(records) = value else {
                return Err(invalid(key, "expected an array"));
            };
            for (i, record) in records.iter().enumerate() {
                let Value::Object(fields) = record else {
                    return Err(invalid(key, format!("record {i} is not an object")));
                };
                if fields.get("id").map_or(true, Value::is_null) {
                    return Err(invalid(key, format!("record {i} has no id")));
                }
            }
            Ok(())
        }
        USER_STATS => match value.get("totalPractices") {
            Some(Value::Number(_)) => Ok(()),
            _ => Err(invalid(key, "totalPractices must be a number")),
        },
        EXAM_INDEX => match value {
            Value::Null => Ok(()),
            Value::Array(exams) => {
                for (i, exam) in exams.iter().enumerate() {
                    for field in ["id", "title", "category"] {
                        if exam.get(field).map_or(true, Value::is_null) {
                            return Err(invalid(key, format!("exam {i} has no {field}")));
                        }
                    }
                }
                Ok(())
            }
            _ => Err(invalid(key, "expected null or an array")),
        },
        _ => Ok(()),
    }
}

impl TieredPath {
    /// Envelopes for every non-internal key. Higher tiers win.
    pub(crate) async fn snapshot(&self) -> BTreeMap<String, Envelope> {
        let mut data = BTreeMap::new();
        for key in self.logical_keys().await {
            if let Some((_, envelope)) = self.read_envelope(&key).await {
                data.insert(key, envelope);
            }
        }
        data
    }

    async fn append_history(&self, key: &str, record: TransferRecord) {
        let mut history = match self.get_value(key).await {
            Some(Value::Array(list)) => list,
            _ => Vec::new(),
        };
        match serde_json::to_value(&record) {
            Ok(entry) => history.push(entry),
            Err(e) => {
                warn!(key, error = %e, "Could not encode history entry");
                return;
            }
        }
        let limit = self.shared.config.history_limit;
        if history.len() > limit {
            history.drain(..history.len() - limit);
        }
        if let Err(e) = self.set(key, &Value::Array(history), false).await {
            warn!(key, error = %e, "Could not record history");
        }
    }

    async fn restore_snapshot(&self, snapshot: &BTreeMap<String, Envelope>) -> bool {
        self.clear_namespace().await;
        let mut restored = true;
        for (key, envelope) in snapshot {
            let shaped = Compressed {
                value: envelope.data.clone(),
                compressed: envelope.compressed,
            };
            if let Err(e) = self.store(key, shaped, false).await {
                error!(key = %key, error = %e, "Snapshot restore failed");
                restored = false;
            }
        }
        restored
    }
}

impl Store {
    /// Dump every key in the namespace.
    pub async fn export_all(&self) -> ExportEnvelope {
        let path = self.path().await;
        let data = path.snapshot().await;
        let storage_info = serde_json::to_value(self.storage_info().await).ok();

        let export = ExportEnvelope {
            version: self.shared.config.schema_version.clone(),
            export_date: Utc::now().to_rfc3339(),
            data,
            storage_info,
        };

        path.append_history(
            EXPORT_HISTORY,
            TransferRecord {
                id: Uuid::new_v4().to_string(),
                timestamp: export.export_date.clone(),
                keys: export.data.len(),
                version: export.version.clone(),
            },
        )
        .await;
        info!(keys = export.data.len(), "Exported namespace");
        export
    }

    /// Replace the namespace with an export.
    #[tracing::instrument(skip(self, export), fields(keys = export.data.len()))]
    pub async fn import_all(&self, export: &ExportEnvelope) -> Result<ImportReport, StoreError> {
        for (key, envelope) in &export.data {
            validate_entry(key, &envelope.data)?;
        }

        let path = self.path().await;
        let snapshot = path.snapshot().await;
        let replaced = path.clear_namespace().await;

        let mut imported = 0;
        for (key, envelope) in &export.data {
            if is_internal(key) {
                continue;
            }
            let shaped = Compressed {
                value: envelope.data.clone(),
                compressed: envelope.compressed,
            };
            if let Err(e) = path.store(key, shaped, false).await {
                error!(key = %key, error = %e, "Import write failed, restoring snapshot");
                let restored = path.restore_snapshot(&snapshot).await;
                return Err(StoreError::ImportFailed {
                    reason: format!("{key}: {e}"),
                    restored,
                });
            }
            imported += 1;
        }

        seed_defaults(path).await;
        path.append_history(
            IMPORT_HISTORY,
            TransferRecord {
                id: Uuid::new_v4().to_string(),
                timestamp: Utc::now().to_rfc3339(),
                keys: imported,
                version: export.version.clone(),
            },
        )
        .await;
        info!(imported, replaced, "Imported namespace");
        Ok(ImportReport { imported, replaced })
    }

    /// Parse and import an export document.
    pub async fn import_json(&self, text: &str) -> Result<ImportReport, StoreError> {
        let export: ExportEnvelope =
            serde_json::from_str(text).map_err(|e| invalid("export", e.to_string()))?;
        self.import_all(&export).await
    }

    pub async fn export_history(&self) -> Vec<TransferRecord> {
        self.get(EXPORT_HISTORY, Vec::new()).await
    }

    pub async fn import_history(&self) -> Vec<TransferRecord> {
        self.get(IMPORT_HISTORY, Vec::new()).await
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Manual backups
    // ═══════════════════════════════════════════════════════════════════════════

    /// Snapshot the core keys. The oldest backups beyond the limit are dropped.
    pub async fn create_backup(&self, label: &str) -> Result<BackupEntry, StoreError> {
        let path = self.path().await;
        let mut data = BTreeMap::new();
        for key in BACKUP_KEYS {
            data.insert(key.to_string(), path.get_value(key).await.unwrap_or(Value::Null));
        }
        let entry = BackupEntry {
            id: format!("backup_{}", Uuid::new_v4().simple()),
            label: label.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            data,
        };

        let mut backups = self.list_backups().await;
        backups.push(entry.clone());
        let max = self.shared.config.max_backups;
        if backups.len() > max {
            backups.drain(..backups.len() - max);
        }
        path.set(MANUAL_BACKUPS, &backups, false).await?;
        info!(id = %entry.id, label, "Backup created");
        Ok(entry)
    }

    pub async fn list_backups(&self) -> Vec<BackupEntry> {
        self.get(MANUAL_BACKUPS, Vec::new()).await
    }

    /// Write a backup's keys back. Everything is checked before any write.
    pub async fn restore_backup(&self, id: &str) -> Result<(), StoreError> {
        let backup = self
            .list_backups()
            .await
            .into_iter()
            .find(|b| b.id == id)
            .ok_or_else(|| StoreError::BackupNotFound(id.to_string()))?;

        for (key, value) in &backup.data {
            validate_entry(key, value)?;
        }
        let path = self.path().await;
        for (key, value) in &backup.data {
            path.set(key, value, false).await?;
        }
        info!(id, "Backup restored");
        Ok(())
    }

    pub async fn delete_backup(&self, id: &str) -> Result<bool, StoreError> {
        let mut backups = self.list_backups().await;
        let before = backups.len();
        backups.retain(|b| b.id != id);
        if backups.len() == before {
            return Ok(false);
        }
        self.path().await.set(MANUAL_BACKUPS, &backups, false).await?;
        Ok(true)
    }
}
