//! SQLite storage backend.
//!
//! Uses a single database file with two tables:
//! - `kv` — one JSON document per `(collection, key)`, replaced on `put`
//! - `kv_log` — append-only rows, read back in insertion order
//!
//! `get` returns the document if one exists, otherwise the appended rows
//! as a JSON array.

use async_trait::async_trait;
use chrono::Utc;
use clawdvc_core::error::StorageError;
use clawdvc_core::storage::Storage;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{info, warn};

pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) the database at `path`.
    ///
    /// Pass `":memory:"` for an ephemeral database.
    pub async fn new(path: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StorageError::Io(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // An in-memory database exists per connection; keep one.
        let max_connections = if path.contains(":memory:") { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Io(format!("Failed to open SQLite: {e}")))?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        info!("SQLite storage initialized at {path}");
        Ok(storage)
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StorageError> {
        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                collection  TEXT NOT NULL,
                key         TEXT NOT NULL,
                value       TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                PRIMARY KEY (collection, key)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::MigrationFailed(format!("kv table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_log (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                collection  TEXT NOT NULL,
                key         TEXT NOT NULL,
                value       TEXT NOT NULL,
                created_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::MigrationFailed(format!("kv_log table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_kv_log_key ON kv_log(collection, key, id)")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::MigrationFailed(format!("kv_log index: {e}")))?;

        Ok(())
    }
}

fn parse_value(collection: &str, key: &str, raw: &str) -> Result<serde_json::Value, StorageError> {
    serde_json::from_str(raw).map_err(|e| StorageError::Corrupt {
        key: format!("{collection}/{key}"),
        reason: e.to_string(),
    })
}

fn query_err(e: sqlx::Error) -> StorageError {
    StorageError::QueryFailed(e.to_string())
}

#[async_trait]
impl Storage for SqliteStorage {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<serde_json::Value>, StorageError> {
        let row = sqlx::query("SELECT value FROM kv WHERE collection = ? AND key = ?")
            .bind(collection)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_err)?;

        if let Some(row) = row {
            let raw: String = row.get("value");
            return parse_value(collection, key, &raw).map(Some);
        }

        let rows = sqlx::query("SELECT value FROM kv_log WHERE collection = ? AND key = ? ORDER BY id ASC")
            .bind(collection)
            .bind(key)
            .fetch_all(&self.pool)
            .await
            .map_err(query_err)?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let raw: String = row.get("value");
            match parse_value(collection, key, &raw) {
                Ok(value) => items.push(value),
                Err(e) => warn!(error = %e, "Skipping corrupted log row"),
            }
        }
        Ok(Some(serde_json::Value::Array(items)))
    }

    async fn put(&self, collection: &str, key: &str, value: serde_json::Value) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO kv (collection, key, value, updated_at) VALUES (?, ?, ?, ?)
            ON CONFLICT(collection, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(collection)
        .bind(key)
        .bind(value.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn append(&self, collection: &str, key: &str, value: serde_json::Value) -> Result<u64, StorageError> {
        sqlx::query("INSERT INTO kv_log (collection, key, value, created_at) VALUES (?, ?, ?, ?)")
            .bind(collection)
            .bind(key)
            .bind(value.to_string())
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(query_err)?;

        let row = sqlx::query("SELECT COUNT(*) AS n FROM kv_log WHERE collection = ? AND key = ?")
            .bind(collection)
            .bind(key)
            .fetch_one(&self.pool)
            .await
            .map_err(query_err)?;
        let count: i64 = row.get("n");
        Ok(count as u64)
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<bool, StorageError> {
        let docs = sqlx::query("DELETE FROM kv WHERE collection = ? AND key = ?")
            .bind(collection)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(query_err)?;
        let logs = sqlx::query("DELETE FROM kv_log WHERE collection = ? AND key = ?")
            .bind(collection)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(query_err)?;
        Ok(docs.rows_affected() + logs.rows_affected() > 0)
    }

    async fn health_check(&self) -> Result<bool, StorageError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(query_err)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn memory_db() -> SqliteStorage {
        SqliteStorage::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn put_replaces_document() {
        let storage = memory_db().await;
        storage.put("conversations", "tg:1", json!({"turns": [1]})).await.unwrap();
        storage.put("conversations", "tg:1", json!({"turns": [1, 2]})).await.unwrap();
        assert_eq!(
            storage.get("conversations", "tg:1").await.unwrap(),
            Some(json!({"turns": [1, 2]}))
        );
        assert_eq!(storage.get("conversations", "tg:2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn append_keeps_insertion_order() {
        let storage = memory_db().await;
        for n in 1..=3 {
            assert_eq!(storage.append("growth_metrics", "ledger", json!({"n": n})).await.unwrap(), n);
        }
        assert_eq!(
            storage.get("growth_metrics", "ledger").await.unwrap(),
            Some(json!([{"n": 1}, {"n": 2}, {"n": 3}]))
        );
    }

    #[tokio::test]
    async fn delete_clears_both_tables() {
        let storage = memory_db().await;
        storage.put("c", "doc", json!("x")).await.unwrap();
        storage.append("c", "log", json!("y")).await.unwrap();
        assert!(storage.delete("c", "doc").await.unwrap());
        assert!(storage.delete("c", "log").await.unwrap());
        assert!(!storage.delete("c", "doc").await.unwrap());
        assert_eq!(storage.get("c", "log").await.unwrap(), None);
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot.db");
        let path = path.to_str().unwrap();
        {
            let storage = SqliteStorage::new(path).await.unwrap();
            storage.put("knowledge_base", "_index", json!([])).await.unwrap();
            assert!(storage.health_check().await.unwrap());
        }
        let storage = SqliteStorage::new(path).await.unwrap();
        assert_eq!(storage.get("knowledge_base", "_index").await.unwrap(), Some(json!([])));
    }
}
