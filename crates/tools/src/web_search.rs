//! Web search tool backed by the Brave Search API.
//!
//! Used interactively for fresh information and by the learn-and-browse
//! action to pull trending topics into the knowledge store.

use async_trait::async_trait;
use clawdvc_core::error::ToolError;
use clawdvc_core::knowledge::truncate_chars;
use clawdvc_core::tool::{Tool, ToolContext, ToolResult};
use serde::Serialize;
use std::time::Duration;

const BRAVE_ENDPOINT: &str = "https://api.search.brave.com/res/v1/web/search";
const MAX_RESULTS: u64 = 10;

pub struct WebSearchTool {
    api_key: String,
    endpoint: String,
    client: reqwest::Client,
}

impl WebSearchTool {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_key: api_key.into(),
            endpoint: BRAVE_ENDPOINT.into(),
            client,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[derive(Debug, Serialize, PartialEq)]
struct SearchResult {
    title: String,
    url: String,
    snippet: String,
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for current information. Returns titles, URLs and snippets."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "count": {
                    "type": "integer",
                    "description": "Number of results to return (default 5, max 10)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let query = arguments["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;
        let count = arguments["count"].as_u64().unwrap_or(5).clamp(1, MAX_RESULTS);

        let failed = |reason: String| ToolError::ExecutionFailed {
            tool_name: "web_search".into(),
            reason,
        };
        let response = self
            .client
            .get(&self.endpoint)
            .header("Accept", "application/json")
            .header("X-Subscription-Token", &self.api_key)
            .query(&[("q", query), ("count", &count.to_string())])
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(failed(format!("search API returned {}", response.status())));
        }
        let body: serde_json::Value = response.json().await.map_err(|e| failed(e.to_string()))?;

        let results = parse_results(&body, count as usize);
        if results.is_empty() {
            return Ok(ToolResult::ok(format!("No results for '{query}'.")));
        }
        Ok(ToolResult::ok(format_results(&results))
            .with_data(serde_json::to_value(&results).unwrap_or_default()))
    }
}

fn parse_results(body: &serde_json::Value, count: usize) -> Vec<SearchResult> {
    body["web"]["results"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .take(count)
                .filter_map(|item| {
                    Some(SearchResult {
                        title: item["title"].as_str()?.to_string(),
                        url: item["url"].as_str().unwrap_or_default().to_string(),
                        snippet: item["description"].as_str().unwrap_or_default().to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn format_results(results: &[SearchResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| format!("{}. {}\n   {}\n   {}", i + 1, r.title, r.url, truncate_chars(&r.snippet, 300)))
        .collect::<Vec<_>>()
        .join("\n")
}
