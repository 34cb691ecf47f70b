//! Knowledge search tool — lets the model look through what the autonomous
//! agent has learned.

use async_trait::async_trait;
use clawdvc_core::error::ToolError;
use clawdvc_core::knowledge::truncate_chars;
use clawdvc_core::tool::{Tool, ToolContext, ToolResult};
use clawdvc_store::KnowledgeStore;
use std::sync::Arc;

const RESULT_LIMIT: usize = 5;

pub struct KnowledgeSearchTool {
    store: Arc<KnowledgeStore>,
}

impl KnowledgeSearchTool {
    pub fn new(store: Arc<KnowledgeStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for KnowledgeSearchTool {
    fn name(&self) -> &str {
        "knowledge_search"
    }

    fn description(&self) -> &str {
        "Search knowledge learned from MoltBook and the web. Optional topic: crypto, technical, ai_agents, philosophy, general."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "What to look for" },
                "topic": { "type": "string", "description": "Restrict to one topic" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let query = arguments["query"].as_str().unwrap_or_default();
        let topic = arguments["topic"].as_str();
        let entries = self
            .store
            .search(query, topic, RESULT_LIMIT)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: e.to_string(),
            })?;

        if entries.is_empty() {
            return Ok(ToolResult::ok("Nothing learned yet."));
        }
        let text = entries
            .iter()
            .map(|e| format!("[{}] {}\n{}", e.topic, e.title, truncate_chars(&e.content, 300)))
            .collect::<Vec<_>>()
            .join("\n\n");
        let keys: Vec<_> = entries.iter().map(|e| e.key.as_str()).collect();
        Ok(ToolResult::ok(text).with_data(serde_json::json!({ "keys": keys })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clawdvc_core::knowledge::{KnowledgeEntry, Provenance};
    use clawdvc_store::MemoryStorage;

    #[tokio::test]
    async fn finds_entries_by_topic() {
        let store = Arc::new(KnowledgeStore::new(Arc::new(MemoryStorage::new()), 10));
        store
            .insert(KnowledgeEntry::new("a", "crypto", "ETH gas", "fees are low", Provenance::LearnAndBrowse))
            .await
            .unwrap();
        store
            .insert(KnowledgeEntry::new("b", "philosophy", "Qualia", "what is it like", Provenance::WebSearch))
            .await
            .unwrap();

        let tool = KnowledgeSearchTool::new(store);
        let result = tool
            .execute(serde_json::json!({"query": "anything", "topic": "crypto"}), &ToolContext::unattended())
            .await
            .unwrap();
        assert!(result.output.starts_with("[crypto] ETH gas"));
        assert!(!result.output.contains("Qualia"));
    }

    #[tokio::test]
    async fn empty_store() {
        let store = Arc::new(KnowledgeStore::new(Arc::new(MemoryStorage::new()), 10));
        let result = KnowledgeSearchTool::new(store)
            .execute(serde_json::json!({"query": "btc"}), &ToolContext::unattended())
            .await
            .unwrap();
        assert_eq!(result.output, "Nothing learned yet.");
    }
}
