// src/export/storage.rs
//! Key-value storage backing the durable export queue
//!
//! Values are bounded in size, like a host's local storage quota. A write
//! over the quota fails with `ExporterError::Storage` and leaves the
//! previous value untouched.

use crate::utils::errors::{ExporterError, Result};
use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Default per-value quota (5 MiB)
pub const DEFAULT_MAX_VALUE_BYTES: usize = 5 * 1024 * 1024;

/// Persistent key-value store
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removing an absent key is not an error
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base directory for storage
    pub base_dir: PathBuf,

    /// SQLite database file name
    pub db_name: String,

    /// Largest value accepted by `set`
    pub max_value_bytes: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from(".logship"),
            db_name: "export-queue.db".to_string(),
            max_value_bytes: DEFAULT_MAX_VALUE_BYTES,
        }
    }
}

/// SQLite-backed store
pub struct SqliteStorage {
    config: StorageConfig,
    db: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open (or create) the store under `config.base_dir`
    pub async fn new(config: StorageConfig) -> Result<Self> {
        fs::create_dir_all(&config.base_dir).await.map_err(|e| {
            ExporterError::Storage(format!("Failed to create directory: {}", e))
        })?;

        let db_path = config.base_dir.join(&config.db_name);
        let conn = Connection::open(&db_path).map_err(|e| {
            ExporterError::Storage(format!("Failed to open database: {}", e))
        })?;

        let storage = Self {
            config,
            db: Arc::new(Mutex::new(conn)),
        };

        storage.init_schema().await?;

        info!("Export queue storage opened at {:?}", db_path);

        Ok(storage)
    }

    async fn init_schema(&self) -> Result<()> {
        let db = self.db.lock().await;

        db.execute(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            [],
        )
        .map_err(|e| ExporterError::Storage(format!("Schema creation failed: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for SqliteStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let db = self.db.lock().await;

        db.query_row(
            "SELECT value FROM kv_store WHERE key = ?",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| ExporterError::Storage(format!("Read failed: {}", e)))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        if value.len() > self.config.max_value_bytes {
            return Err(ExporterError::Storage(format!(
                "Quota exceeded: {} bytes > {} bytes",
                value.len(),
                self.config.max_value_bytes
            )));
        }

        let db = self.db.lock().await;
        db.execute(
            r#"
            INSERT INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
            params![key, value, chrono::Utc::now().timestamp_millis()],
        )
        .map_err(|e| ExporterError::Storage(format!("Write failed: {}", e)))?;

        debug!("Stored {} bytes under '{}'", value.len(), key);

        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute("DELETE FROM kv_store WHERE key = ?", params![key])
            .map_err(|e| ExporterError::Storage(format!("Delete failed: {}", e)))?;

        Ok(())
    }
}

/// In-process store; can be switched unavailable to exercise degraded paths
pub struct MemoryStorage {
    values: SyncMutex<HashMap<String, String>>,
    max_value_bytes: usize,
    available: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_quota(DEFAULT_MAX_VALUE_BYTES)
    }

    pub fn with_quota(max_value_bytes: usize) -> Self {
        Self {
            values: SyncMutex::new(HashMap::new()),
            max_value_bytes,
            available: AtomicBool::new(true),
        }
    }

    /// Make every subsequent call fail (or succeed again)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ExporterError::Storage("Storage unavailable".to_string()))
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;
        Ok(self.values.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check_available()?;
        if value.len() > self.max_value_bytes {
            return Err(ExporterError::Storage(format!(
                "Quota exceeded: {} bytes > {} bytes",
                value.len(),
                self.max_value_bytes
            )));
        }

        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.check_available()?;
        self.values.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sqlite_config(dir: &tempfile::TempDir) -> StorageConfig {
        StorageConfig {
            base_dir: dir.path().to_path_buf(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_storage_creation() {
        let dir = tempdir().unwrap();
        let storage = SqliteStorage::new(sqlite_config(&dir)).await;
        assert!(storage.is_ok());
    }

    #[tokio::test]
    async fn test_sqlite_set_get_remove() {
        let dir = tempdir().unwrap();
        let storage = SqliteStorage::new(sqlite_config(&dir)).await.unwrap();

        assert_eq!(storage.get("queue").await.unwrap(), None);

        storage.set("queue", "[1]").await.unwrap();
        storage.set("queue", "[1,2]").await.unwrap();
        assert_eq!(storage.get("queue").await.unwrap().as_deref(), Some("[1,2]"));

        storage.remove("queue").await.unwrap();
        storage.remove("queue").await.unwrap();
        assert_eq!(storage.get("queue").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sqlite_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let storage = SqliteStorage::new(sqlite_config(&dir)).await.unwrap();
            storage.set("queue", "persisted").await.unwrap();
        }

        let storage = SqliteStorage::new(sqlite_config(&dir)).await.unwrap();
        assert_eq!(
            storage.get("queue").await.unwrap().as_deref(),
            Some("persisted")
        );
    }

    #[tokio::test]
    async fn test_sqlite_quota() {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            max_value_bytes: 4,
            ..sqlite_config(&dir)
        };
        let storage = SqliteStorage::new(config).await.unwrap();

        storage.set("k", "ok").await.unwrap();
        let err = storage.set("k", "too long").await.unwrap_err();
        assert!(matches!(err, ExporterError::Storage(_)));
        assert_eq!(storage.get("k").await.unwrap().as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_memory_unavailable() {
        let storage = MemoryStorage::new();
        storage.set("k", "v").await.unwrap();

        storage.set_available(false);
        assert!(storage.get("k").await.is_err());
        assert!(storage.set("k", "w").await.is_err());

        storage.set_available(true);
        assert_eq!(storage.get("k").await.unwrap().as_deref(), Some("v"));
    }
}
