//! Bounded History Store — per-conversation turn log capped at `max_history`.
//!
//! The whole conversation document is rewritten on every append, with the
//! cap applied before the write, so a reader never sees an oversized
//! history. Writers for one key are serialized by the dispatcher's per-key
//! queue; nothing here spans keys.

use clawdvc_core::error::StorageError;
use clawdvc_core::message::{Conversation, ConversationKey, Turn};
use clawdvc_core::storage::{Storage, collections};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

const COMMIT_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Whether a commit reached durable storage.
#[derive(Debug)]
pub enum Persistence {
    Durable,
    /// Both attempts failed; the turns were dropped from storage.
    Degraded(StorageError),
}

impl Persistence {
    pub fn is_durable(&self) -> bool {
        matches!(self, Persistence::Durable)
    }
}

pub struct HistoryStore {
    storage: Arc<dyn Storage>,
    max_history: usize,
}

impl HistoryStore {
    pub fn new(storage: Arc<dyn Storage>, max_history: usize) -> Self {
        Self {
            storage,
            max_history: max_history.max(1),
        }
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    /// Load the conversation, or a fresh one when none is stored.
    pub async fn load(&self, key: &ConversationKey) -> Result<Conversation, StorageError> {
        match self.storage.get(collections::CONVERSATIONS, key.as_str()).await? {
            Some(value) => serde_json::from_value(value).map_err(|e| StorageError::Corrupt {
                key: format!("{}/{}", collections::CONVERSATIONS, key),
                reason: e.to_string(),
            }),
            None => Ok(Conversation::new(key.clone())),
        }
    }

    /// Turns of the conversation, most recent last.
    pub async fn list(&self, key: &ConversationKey) -> Result<Vec<Turn>, StorageError> {
        Ok(self.load(key).await?.turns)
    }

    pub async fn append(&self, key: &ConversationKey, turn: Turn) -> Result<(), StorageError> {
        self.append_all(key, vec![turn]).await
    }

    /// Append several turns in one write.
    pub async fn append_all(&self, key: &ConversationKey, turns: Vec<Turn>) -> Result<(), StorageError> {
        let mut conversation = self.load(key).await?;
        conversation.push_capped(turns, self.max_history);
        self.save(&conversation).await
    }

    /// Clear turns and restore the default directive.
    pub async fn reset(&self, key: &ConversationKey) -> Result<(), StorageError> {
        let mut conversation = self.load(key).await?;
        conversation.reset();
        self.save(&conversation).await
    }

    /// Set (or with `None`, clear) the custom directive.
    pub async fn set_directive(&self, key: &ConversationKey, directive: Option<String>) -> Result<(), StorageError> {
        let mut conversation = self.load(key).await?;
        conversation.directive = directive.filter(|d| !d.trim().is_empty());
        conversation.last_activity = chrono::Utc::now();
        self.save(&conversation).await
    }

    pub async fn directive(&self, key: &ConversationKey) -> Result<Option<String>, StorageError> {
        Ok(self.load(key).await?.directive)
    }

    /// Append `turns`, retrying once on failure. Never returns an error:
    /// a second failure is logged and reported as [`Persistence::Degraded`]
    /// so the caller can still deliver its reply.
    pub async fn commit(&self, key: &ConversationKey, turns: Vec<Turn>) -> Persistence {
        match self.append_all(key, turns.clone()).await {
            Ok(()) => Persistence::Durable,
            Err(first) => {
                warn!(conversation = %key, error = %first, "History write failed, retrying once");
                tokio::time::sleep(COMMIT_RETRY_DELAY).await;
                match self.append_all(key, turns).await {
                    Ok(()) => Persistence::Durable,
                    Err(second) => {
                        error!(conversation = %key, error = %second, "History write dropped");
                        Persistence::Degraded(second)
                    }
                }
            }
        }
    }

    async fn save(&self, conversation: &Conversation) -> Result<(), StorageError> {
        let value = serde_json::to_value(conversation).map_err(|e| StorageError::Io(e.to_string()))?;
        self.storage
            .put(collections::CONVERSATIONS, conversation.key.as_str(), value)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::MemoryStorage;

    fn store(cap: usize) -> (Arc<MemoryStorage>, HistoryStore) {
        let storage = Arc::new(MemoryStorage::new());
        let history = HistoryStore::new(storage.clone(), cap);
        (storage, history)
    }

    fn contents(turns: &[Turn]) -> Vec<&str> {
        turns.iter().map(|t| t.content.as_str()).collect()
    }

    #[tokio::test]
    async fn cap_of_two_keeps_last_two() {
        let (_, history) = store(2);
        let key = ConversationKey::from("tg:1");
        for text in ["A", "B", "C"] {
            history.append(&key, Turn::user(text)).await.unwrap();
        }
        assert_eq!(contents(&history.list(&key).await.unwrap()), vec!["B", "C"]);
    }

    #[tokio::test]
    async fn many_appends_keep_most_recent_window() {
        let (_, history) = store(5);
        let key = ConversationKey::from("tg:1");
        for i in 0..23 {
            history.append(&key, Turn::user(format!("m{i}"))).await.unwrap();
        }
        let turns = history.list(&key).await.unwrap();
        assert_eq!(contents(&turns), vec!["m18", "m19", "m20", "m21", "m22"]);
    }

    #[tokio::test]
    async fn batch_larger_than_cap_is_trimmed_before_write() {
        let (storage, history) = store(2);
        let key = ConversationKey::from("tg:1");
        history
            .append_all(&key, vec![Turn::user("A"), Turn::assistant("B"), Turn::user("C")])
            .await
            .unwrap();
        let raw = storage.get(collections::CONVERSATIONS, "tg:1").await.unwrap().unwrap();
        assert_eq!(raw["turns"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn directive_survives_eviction_and_reset_restores_default() {
        let (_, history) = store(1);
        let key = ConversationKey::from("tg:1");
        history.set_directive(&key, Some("talk like a pirate".into())).await.unwrap();
        history.append(&key, Turn::user("A")).await.unwrap();
        history.append(&key, Turn::user("B")).await.unwrap();
        assert_eq!(history.directive(&key).await.unwrap().as_deref(), Some("talk like a pirate"));

        history.reset(&key).await.unwrap();
        assert!(history.list(&key).await.unwrap().is_empty());
        assert_eq!(history.directive(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn blank_directive_clears() {
        let (_, history) = store(10);
        let key = ConversationKey::from("tg:1");
        history.set_directive(&key, Some("x".into())).await.unwrap();
        history.set_directive(&key, Some("  ".into())).await.unwrap();
        assert_eq!(history.directive(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn conversations_are_independent() {
        let (_, history) = store(10);
        history.append(&ConversationKey::from("a"), Turn::user("1")).await.unwrap();
        assert!(history.list(&ConversationKey::from("b")).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn commit_reports_degraded_when_storage_fails() {
        let (storage, history) = store(10);
        let key = ConversationKey::from("tg:1");
        storage.set_fail_writes(true);
        let outcome = history.commit(&key, vec![Turn::user("hi")]).await;
        assert!(matches!(outcome, Persistence::Degraded(StorageError::Io(_))));

        storage.set_fail_writes(false);
        assert!(history.commit(&key, vec![Turn::user("hi")]).await.is_durable());
        assert_eq!(history.list(&key).await.unwrap().len(), 1);
    }
}
