// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tier A: structured key/value store on SQLite.
//!
//! One table holds every record as sealed envelope text:
//! ```sql
//! CREATE TABLE key_value_store (
//!   key TEXT PRIMARY KEY,
//!   value TEXT NOT NULL,       -- {"data":..,"timestamp":..,"version":..,"compressed":..}
//!   timestamp INTEGER NOT NULL -- last write, epoch ms
//! )
//! ```
//!
//! The database is schema-versioned through `PRAGMA user_version`. Opening a
//! store runs every upgrade step between the stored version and
//! [`SCHEMA_VERSION`]; each step is idempotent (`IF NOT EXISTS`).
//!
//! ## sqlx Any Driver Quirks
//!
//! TEXT columns may come back as bytes through the `Any` driver, so reads try
//! `String` first and fall back to `Vec<u8>`. Prefix filters use `substr`
//! rather than `LIKE` because namespace prefixes contain `_`.

use async_trait::async_trait;
use sqlx::{any::AnyPoolOptions, AnyPool, Row};
use std::sync::Once;
use std::time::Duration;
use tracing::{debug, info};

use super::traits::{Backend, StorageError, Tier};
use crate::record::now_millis;
use crate::resilience::retry::{retry, RetryConfig};

/// Current on-disk schema version for Tier A.
pub const SCHEMA_VERSION: i64 = 1;

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

pub struct SqlStore {
    pool: AnyPool,
}

impl SqlStore {
    /// Connect and upgrade the schema. Retries briefly, then reports the tier unavailable.
    pub async fn open(connection_string: &str) -> Result<Self, StorageError> {
        install_drivers();

        // Each pooled connection to `:memory:` would be its own database
        let max_connections = if connection_string.contains(":memory:") { 1 } else { 4 };

        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(Duration::from_secs(5))
                .idle_timeout(Duration::from_secs(300))
                .connect(connection_string)
                .await
                .map_err(|e| StorageError::Unavailable(e.to_string()))
        })
        .await?;

        let store = Self { pool };
        store.enable_wal_mode().await?;
        store.upgrade_schema().await?;
        Ok(store)
    }

    /// Version recorded in `PRAGMA user_version`.
    pub async fn schema_version(&self) -> Result<i64, StorageError> {
        let row = sqlx::query("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        row.try_get::<i64, _>(0)
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    async fn upgrade_schema(&self) -> Result<(), StorageError> {
        let current = self.schema_version().await?;
        if current >= SCHEMA_VERSION {
            debug!(version = current, "Structured store schema up to date");
            return Ok(());
        }

        info!(from = current, to = SCHEMA_VERSION, "Upgrading structured store schema");
        for version in (current + 1)..=SCHEMA_VERSION {
            for statement in upgrade_statements(version) {
                retry("sql_upgrade_schema", &RetryConfig::startup(), || async {
                    sqlx::query(statement)
                        .execute(&self.pool)
                        .await
                        .map_err(|e| StorageError::Backend(e.to_string()))
                })
                .await?;
            }
        }

        let stamp = format!("PRAGMA user_version = {}", SCHEMA_VERSION);
        sqlx::query(&stamp)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }
}

fn upgrade_statements(version: i64) -> &'static [&'static str] {
    match version {
        1 => &[
            "CREATE TABLE IF NOT EXISTS key_value_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_key_value_timestamp ON key_value_store (timestamp)",
        ],
        _ => &[],
    }
}

fn text_column(row: &sqlx::any::AnyRow, column: &str) -> Option<String> {
    row.try_get::<String, _>(column).ok().or_else(|| {
        row.try_get::<Vec<u8>, _>(column)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
    })
}

#[async_trait]
impl Backend for SqlStore {
    fn tier(&self) -> Tier {
        Tier::Structured
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        retry("sql_get", &RetryConfig::query(), || async {
            let row = sqlx::query("SELECT value FROM key_value_store WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;

            match row {
                Some(row) => text_column(&row, "value")
                    .map(Some)
                    .ok_or_else(|| StorageError::Backend(format!("unreadable value for '{}'", key))),
                None => Ok(None),
            }
        })
        .await
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let timestamp = now_millis();
        retry("sql_put", &RetryConfig::query(), || async {
            sqlx::query(
                "INSERT INTO key_value_store (key, value, timestamp) VALUES (?, ?, ?)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, timestamp = excluded.timestamp",
            )
            .bind(key)
            .bind(value)
            .bind(timestamp)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        retry("sql_delete", &RetryConfig::query(), || async {
            sqlx::query("DELETE FROM key_value_store WHERE key = ?")
                .bind(key)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        // substr and length both count characters, so multi-byte prefixes match
        let rows = sqlx::query(
            "SELECT key FROM key_value_store WHERE substr(key, 1, length(?)) = ? ORDER BY key",
        )
        .bind(prefix)
        .bind(prefix)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(rows.iter().filter_map(|row| text_column(row, "key")).collect())
    }

    async fn usage_bytes(&self, prefix: &str) -> Result<usize, StorageError> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0) AS used
             FROM key_value_store WHERE substr(key, 1, length(?)) = ?",
        )
        .bind(prefix)
        .bind(prefix)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        let used: i64 = row
            .try_get("used")
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(used.max(0) as usize)
    }

    async fn contains(&self, key: &str) -> Result<bool, StorageError> {
        let row = sqlx::query("SELECT 1 AS present FROM key_value_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(row.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sqlite_url(dir: &std::path::Path) -> String {
        format!("sqlite://{}?mode=rwc", dir.join("store.db").display())
    }

    #[tokio::test]
    async fn test_open_stamps_schema_version() {
        let dir = tempdir().unwrap();
        let store = SqlStore::open(&sqlite_url(dir.path())).await.unwrap();
        assert_eq!(store.schema_version().await.unwrap(), SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_reopen_is_idempotent() {
        let dir = tempdir().unwrap();
        let url = sqlite_url(dir.path());

        let store = SqlStore::open(&url).await.unwrap();
        store.put("exam_system_settings", "{\"data\":1}").await.unwrap();
        drop(store);

        let reopened = SqlStore::open(&url).await.unwrap();
        assert_eq!(
            reopened.get("exam_system_settings").await.unwrap().as_deref(),
            Some("{\"data\":1}")
        );
    }

    #[tokio::test]
    async fn test_put_overwrites_and_delete() {
        let dir = tempdir().unwrap();
        let store = SqlStore::open(&sqlite_url(dir.path())).await.unwrap();

        store.put("k", "one").await.unwrap();
        store.put("k", "two").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("two"));
        assert!(store.contains("k").await.unwrap());

        store.delete("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
        assert!(!store.contains("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_prefix_is_literal_not_like_pattern() {
        let dir = tempdir().unwrap();
        let store = SqlStore::open(&sqlite_url(dir.path())).await.unwrap();

        store.put("exam_system_a", "12").await.unwrap();
        store.put("examXsystemXb", "1234").await.unwrap();

        assert_eq!(store.keys("exam_system_").await.unwrap(), vec!["exam_system_a"]);
        // Key and value bytes
        assert_eq!(store.usage_bytes("exam_system_").await.unwrap(), 13 + 2);
    }

    #[tokio::test]
    async fn test_multibyte_prefix_matches() {
        let dir = tempdir().unwrap();
        let store = SqlStore::open(&sqlite_url(dir.path())).await.unwrap();

        store.put("練習_settings", "1234").await.unwrap();
        store.put("練_other", "1").await.unwrap();

        assert_eq!(store.keys("練習_").await.unwrap(), vec!["練習_settings"]);
        assert_eq!(
            store.usage_bytes("練習_").await.unwrap(),
            "練習_settings".len() + 4
        );
    }

    #[tokio::test]
    async fn test_probe_round_trip() {
        let dir = tempdir().unwrap();
        let store = SqlStore::open(&sqlite_url(dir.path())).await.unwrap();
        store.probe().await.unwrap();
        assert!(store.keys("").await.unwrap().is_empty());
    }
}
