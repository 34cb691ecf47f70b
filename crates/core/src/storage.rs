//! Storage trait — the durable key-value/append contract.
//!
//! Every persisted entity goes through these four operations. Each is
//! atomic for a single key; nothing here spans keys.

use async_trait::async_trait;

use crate::error::StorageError;

/// Logical collection names.
pub mod collections {
    pub const CONVERSATIONS: &str = "conversations";
    pub const KNOWLEDGE_BASE: &str = "knowledge_base";
    pub const GROWTH_METRICS: &str = "growth_metrics";
    pub const LINKED_ACCOUNTS: &str = "linked_accounts";
}

/// Durable storage backend.
///
/// Values are JSON documents. `append` adds a value to the list kept at a
/// key, and `get` on such a key returns that list as a JSON array.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Backend name (e.g., "sqlite", "file", "memory").
    fn name(&self) -> &str;

    async fn get(
        &self,
        collection: &str,
        key: &str,
    ) -> std::result::Result<Option<serde_json::Value>, StorageError>;

    /// Replace the document at `key`.
    async fn put(
        &self,
        collection: &str,
        key: &str,
        value: serde_json::Value,
    ) -> std::result::Result<(), StorageError>;

    /// Append to the list at `key`. Returns the list length after the write.
    async fn append(
        &self,
        collection: &str,
        key: &str,
        value: serde_json::Value,
    ) -> std::result::Result<u64, StorageError>;

    /// Remove `key`. Returns whether it existed.
    async fn delete(&self, collection: &str, key: &str) -> std::result::Result<bool, StorageError>;

    /// Health check.
    async fn health_check(&self) -> std::result::Result<bool, StorageError> {
        Ok(true)
    }
}
