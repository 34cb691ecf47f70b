//! Knowledge Store — a capped FIFO cache of learned snippets.
//!
//! Layout inside the `knowledge_base` collection:
//! - `_index` — the ordered index, oldest first
//! - `entry:<key>` — one [`KnowledgeEntry`] per key
//!
//! Inserts are serialized by an internal lock. When the store is full the
//! oldest entry is deleted before the new one is written, so the entry
//! count never exceeds `max_entries`.

use chrono::{DateTime, Utc};
use clawdvc_core::error::StorageError;
use clawdvc_core::knowledge::{KnowledgeEntry, detect_topic, truncate_chars};
use clawdvc_core::storage::{Storage, collections};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

const INDEX_KEY: &str = "_index";
const PREVIEW_CHARS: usize = 240;
const SUMMARY_CONTENT_CHARS: usize = 300;

/// One row of the ordered index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRow {
    pub key: String,
    pub topic: String,
    pub title: String,
    pub preview: String,
    pub added_at: DateTime<Utc>,
}

impl IndexRow {
    fn from_entry(entry: &KnowledgeEntry) -> Self {
        Self {
            key: entry.key.clone(),
            topic: entry.topic.clone(),
            title: entry.title.clone(),
            preview: truncate_chars(&entry.content, PREVIEW_CHARS).to_string(),
            added_at: Utc::now(),
        }
    }

    fn matches_any(&self, words: &[String]) -> bool {
        let haystack = format!("{} {} {}", self.title, self.topic, self.preview).to_lowercase();
        words.iter().any(|w| haystack.contains(w.as_str()))
    }
}

pub struct KnowledgeStore {
    storage: Arc<dyn Storage>,
    max_entries: usize,
    write_lock: Mutex<()>,
}

impl KnowledgeStore {
    pub fn new(storage: Arc<dyn Storage>, max_entries: usize) -> Self {
        Self {
            storage,
            max_entries: max_entries.max(1),
            write_lock: Mutex::new(()),
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Store `entry`, evicting the oldest entry when full.
    ///
    /// Re-inserting an existing key replaces it and moves it to the newest
    /// position without evicting anything. Returns the evicted key, if any.
    pub async fn insert(&self, entry: KnowledgeEntry) -> Result<Option<String>, StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut index = self.load_index().await?;

        let mut evicted = None;
        if let Some(pos) = index.iter().position(|row| row.key == entry.key) {
            index.remove(pos);
        } else {
            while index.len() >= self.max_entries {
                let oldest = index.remove(0);
                self.storage
                    .delete(collections::KNOWLEDGE_BASE, &entry_key(&oldest.key))
                    .await?;
                debug!(key = %oldest.key, "Evicted oldest knowledge entry");
                evicted = Some(oldest.key);
            }
        }

        index.push(IndexRow::from_entry(&entry));
        let value = serde_json::to_value(&entry).map_err(|e| StorageError::Io(e.to_string()))?;
        self.storage
            .put(collections::KNOWLEDGE_BASE, &entry_key(&entry.key), value)
            .await?;
        self.save_index(&index).await?;
        Ok(evicted)
    }

    pub async fn get(&self, key: &str) -> Result<Option<KnowledgeEntry>, StorageError> {
        match self.storage.get(collections::KNOWLEDGE_BASE, &entry_key(key)).await? {
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| StorageError::Corrupt {
                key: format!("{}/{key}", collections::KNOWLEDGE_BASE),
                reason: e.to_string(),
            }),
            None => Ok(None),
        }
    }

    pub async fn contains(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.load_index().await?.iter().any(|row| row.key == key))
    }

    pub async fn count(&self) -> Result<usize, StorageError> {
        Ok(self.load_index().await?.len())
    }

    /// Keys in insertion order, oldest first.
    pub async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.load_index().await?.into_iter().map(|row| row.key).collect())
    }

    /// The newest `limit` entries, newest first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<KnowledgeEntry>, StorageError> {
        let index = self.load_index().await?;
        self.resolve(index.iter().rev().take(limit)).await
    }

    /// Newest entries for `topic` if there are any; otherwise the newest
    /// entries mentioning any query word longer than two characters;
    /// otherwise the newest entries overall.
    pub async fn search(
        &self,
        query: &str,
        topic: Option<&str>,
        limit: usize,
    ) -> Result<Vec<KnowledgeEntry>, StorageError> {
        let index = self.load_index().await?;

        if let Some(topic) = topic.filter(|t| !t.is_empty()) {
            let rows: Vec<_> = index.iter().rev().filter(|row| row.topic == topic).take(limit).collect();
            if !rows.is_empty() {
                return self.resolve(rows).await;
            }
        }

        let words: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .filter(|w| w.chars().count() > 2)
            .map(str::to_string)
            .collect();
        if !words.is_empty() {
            let rows: Vec<_> = index.iter().rev().filter(|row| row.matches_any(&words)).take(limit).collect();
            if !rows.is_empty() {
                return self.resolve(rows).await;
            }
        }

        self.resolve(index.iter().rev().take(limit)).await
    }

    /// A context block of knowledge relevant to `message`, or an empty
    /// string when the store is empty.
    pub async fn summary_for(&self, message: &str, limit: usize) -> Result<String, StorageError> {
        let topic = detect_topic(message);
        let entries = self.search(message, topic, limit).await?;
        if entries.is_empty() {
            return Ok(String::new());
        }

        let mut lines = vec!["Your MoltBook knowledge relevant to this conversation:".to_string()];
        for entry in &entries {
            lines.push(format!("\n[{}] {}", entry.topic, entry.title));
            if let Some(author) = entry.metadata.get("author").and_then(|a| a.as_str()) {
                if !author.is_empty() {
                    lines.push(format!("by {author}"));
                }
            }
            lines.push(truncate_chars(&entry.content, SUMMARY_CONTENT_CHARS).to_string());
        }
        Ok(lines.join("\n"))
    }

    async fn resolve<'a>(
        &self,
        rows: impl IntoIterator<Item = &'a IndexRow>,
    ) -> Result<Vec<KnowledgeEntry>, StorageError> {
        let mut entries = Vec::new();
        for row in rows {
            if let Some(entry) = self.get(&row.key).await? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    async fn load_index(&self) -> Result<Vec<IndexRow>, StorageError> {
        match self.storage.get(collections::KNOWLEDGE_BASE, INDEX_KEY).await? {
            Some(value) => serde_json::from_value(value).map_err(|e| StorageError::Corrupt {
                key: format!("{}/{INDEX_KEY}", collections::KNOWLEDGE_BASE),
                reason: e.to_string(),
            }),
            None => Ok(Vec::new()),
        }
    }

    async fn save_index(&self, index: &[IndexRow]) -> Result<(), StorageError> {
        let value = serde_json::to_value(index).map_err(|e| StorageError::Io(e.to_string()))?;
        self.storage.put(collections::KNOWLEDGE_BASE, INDEX_KEY, value).await
    }
}

fn entry_key(key: &str) -> String {
    format!("entry:{key}")
}
