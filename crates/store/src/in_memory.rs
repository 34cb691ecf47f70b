//! In-memory backend — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use clawdvc_core::error::StorageError;
use clawdvc_core::storage::Storage;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// A storage backend keeping every document in a HashMap.
///
/// `fail_writes` makes every `put`/`append` fail, for exercising degraded
/// persistence paths.
pub struct MemoryStorage {
    entries: Arc<RwLock<HashMap<(String, String), serde_json::Value>>>,
    fail_writes: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of keys stored in `collection`.
    pub async fn len(&self, collection: &str) -> usize {
        self.entries.read().await.keys().filter(|(c, _)| c == collection).count()
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Io("writes disabled".into()));
        }
        Ok(())
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<serde_json::Value>, StorageError> {
        let entries = self.entries.read().await;
        Ok(entries.get(&(collection.to_string(), key.to_string())).cloned())
    }

    async fn put(&self, collection: &str, key: &str, value: serde_json::Value) -> Result<(), StorageError> {
        self.check_writable()?;
        self.entries
            .write()
            .await
            .insert((collection.to_string(), key.to_string()), value);
        Ok(())
    }

    async fn append(&self, collection: &str, key: &str, value: serde_json::Value) -> Result<u64, StorageError> {
        self.check_writable()?;
        let mut entries = self.entries.write().await;
        let slot = entries
            .entry((collection.to_string(), key.to_string()))
            .or_insert_with(|| serde_json::Value::Array(Vec::new()));
        let list = slot.as_array_mut().ok_or_else(|| StorageError::Corrupt {
            key: format!("{collection}/{key}"),
            reason: "append to a non-list value".into(),
        })?;
        list.push(value);
        Ok(list.len() as u64)
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<bool, StorageError> {
        self.check_writable()?;
        Ok(self
            .entries
            .write()
            .await
            .remove(&(collection.to_string(), key.to_string()))
            .is_some())
    }
}
