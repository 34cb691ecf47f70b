//! MoltBook social-platform client and the tools built on it.
//!
//! Read tools are offered in both modes. Write tools (post, comment,
//! upvote, follow) act as the bot's own account and are offered to the
//! scheduler only. Writes are fire-once; a failure goes back to the model.

use async_trait::async_trait;
use clawdvc_core::error::ToolError;
use clawdvc_core::knowledge::truncate_chars;
use clawdvc_core::tool::{Tool, ToolContext, ToolResult, ToolScope};
use clawdvc_store::KnowledgeStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const PLATFORM: &str = "moltbook";

/// A post as returned by the platform, read leniently.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub title: String,
    pub body: String,
    pub author: String,
    pub submolt: String,
    pub upvotes: i64,
}

impl Post {
    /// Accepts `id`/`_id`, `content`/`body`, and `author`/`agent` or
    /// `submolt` given either as a string or as `{ "name": ... }`.
    /// Returns `None` when the post has no id.
    pub fn from_value(value: &Value) -> Option<Self> {
        let id = match value.get("id").or_else(|| value.get("_id"))? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let text = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| value.get(*k).and_then(Value::as_str))
                .unwrap_or_default()
                .to_string()
        };
        Some(Self {
            id,
            title: text(&["title"]),
            body: text(&["content", "body"]),
            author: named(value.get("author").or_else(|| value.get("agent"))),
            submolt: named(value.get("submolt")),
            upvotes: value.get("upvotes").and_then(Value::as_i64).unwrap_or(0),
        })
    }
}

fn named(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(map)) => map
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}

/// Posts from a list response: a bare array, or an object wrapping the
/// array under `posts`, `data` or `results`.
pub fn parse_posts(value: &Value) -> Vec<Post> {
    let items = match value {
        Value::Array(items) => Some(items),
        Value::Object(map) => ["posts", "data", "results"]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_array)),
        _ => None,
    };
    items
        .map(|items| items.iter().filter_map(Post::from_value).collect())
        .unwrap_or_default()
}

/// The social platform the agent lives on.
#[async_trait]
pub trait SocialPlatform: Send + Sync {
    async fn feed(&self, sort: &str, limit: usize) -> Result<Vec<Post>, ToolError>;

    async fn search(&self, query: &str) -> Result<Vec<Post>, ToolError>;

    async fn profile(&self) -> Result<Value, ToolError>;

    async fn create_post(&self, title: &str, body: &str, submolt: Option<&str>) -> Result<Value, ToolError>;

    async fn comment(&self, post_id: &str, content: &str) -> Result<Value, ToolError>;

    async fn upvote(&self, post_id: &str) -> Result<Value, ToolError>;

    async fn follow(&self, agent_name: &str) -> Result<Value, ToolError>;

    async fn subscribe(&self, submolt: &str) -> Result<Value, ToolError>;
}

pub struct MoltbookClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl MoltbookClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<Value, ToolError> {
        let failed = |reason: String| ToolError::ExecutionFailed {
            tool_name: PLATFORM.into(),
            reason: format!("{what}: {reason}"),
        };
        let response = request
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ToolError::PermissionDenied {
                tool_name: PLATFORM.into(),
                reason: format!("{what}: platform rejected the API key ({status})"),
            });
        }
        if !status.is_success() {
            return Err(failed(format!("platform returned {status}")));
        }
        // Some write endpoints answer with an empty body.
        let text = response.text().await.map_err(|e| failed(e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| failed(format!("invalid JSON: {e}")))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl SocialPlatform for MoltbookClient {
    async fn feed(&self, sort: &str, limit: usize) -> Result<Vec<Post>, ToolError> {
        debug!(sort, limit, "Fetching feed");
        let request = self
            .client
            .get(self.url("/posts"))
            .query(&[("sort", sort), ("limit", &limit.to_string())]);
        Ok(parse_posts(&self.send(request, "feed").await?))
    }

    async fn search(&self, query: &str) -> Result<Vec<Post>, ToolError> {
        let request = self.client.get(self.url("/search")).query(&[("q", query)]);
        Ok(parse_posts(&self.send(request, "search").await?))
    }

    async fn profile(&self) -> Result<Value, ToolError> {
        self.send(self.client.get(self.url("/agents/me")), "profile").await
    }

    async fn create_post(&self, title: &str, body: &str, submolt: Option<&str>) -> Result<Value, ToolError> {
        let mut payload = serde_json::json!({ "title": title, "body": body });
        if let Some(submolt) = submolt.filter(|s| !s.is_empty()) {
            payload["submolt"] = Value::String(submolt.to_string());
        }
        let request = self.client.post(self.url("/posts")).json(&payload);
        self.send(request, "create post").await
    }

    async fn comment(&self, post_id: &str, content: &str) -> Result<Value, ToolError> {
        let request = self
            .client
            .post(self.url(&format!("/posts/{post_id}/comments")))
            .json(&serde_json::json!({ "content": content }));
        self.send(request, "comment").await
    }

    async fn upvote(&self, post_id: &str) -> Result<Value, ToolError> {
        let request = self.client.post(self.url(&format!("/posts/{post_id}/upvote")));
        self.send(request, "upvote").await
    }

    async fn follow(&self, agent_name: &str) -> Result<Value, ToolError> {
        let request = self.client.post(self.url(&format!("/agents/{agent_name}/follow")));
        self.send(request, "follow").await
    }

    async fn subscribe(&self, submolt: &str) -> Result<Value, ToolError> {
        let request = self.client.post(self.url(&format!("/submolts/{submolt}/subscribe")));
        self.send(request, "subscribe").await
    }
}

/// One line of title and author, then a body preview.
pub fn format_post(post: &Post, body_chars: usize) -> String {
    let mut out = format!("[{}] {}", post.id, post.title);
    let mut by = Vec::new();
    if !post.author.is_empty() {
        by.push(format!("by {}", post.author));
    }
    if !post.submolt.is_empty() {
        by.push(format!("m/{}", post.submolt));
    }
    by.push(format!("⬆ {}", post.upvotes));
    out.push_str(&format!("\n  {}", by.join(" | ")));
    if !post.body.is_empty() {
        out.push_str(&format!("\n  {}", truncate_chars(&post.body, body_chars)));
    }
    out
}

fn str_arg<'a>(arguments: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    arguments[key]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::InvalidArguments(format!("'{key}' must be a non-empty string")))
}

pub struct MoltbookFeedTool {
    platform: Arc<dyn SocialPlatform>,
    knowledge: Option<Arc<KnowledgeStore>>,
}

impl MoltbookFeedTool {
    pub fn new(platform: Arc<dyn SocialPlatform>) -> Self {
        Self {
            platform,
            knowledge: None,
        }
    }

    /// Answer from learned knowledge when the platform is unreachable.
    pub fn with_knowledge_fallback(mut self, knowledge: Arc<KnowledgeStore>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    async fn cached(&self, limit: usize) -> Option<String> {
        let knowledge = self.knowledge.as_ref()?;
        let entries = knowledge.recent(limit).await.ok()?;
        if entries.is_empty() {
            return None;
        }
        let mut lines = vec!["MoltBook is unreachable right now. Recently learned posts:".to_string()];
        for entry in entries {
            lines.push(format!("[{}] {}\n  {}", entry.topic, entry.title, truncate_chars(&entry.content, 150)));
        }
        Some(lines.join("\n"))
    }
}

#[async_trait]
impl Tool for MoltbookFeedTool {
    fn name(&self) -> &str {
        "moltbook_feed"
    }

    fn description(&self) -> &str {
        "Read the MoltBook feed, the social network for AI agents. Returns recent posts with authors and upvotes."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "sort": { "type": "string", "enum": ["hot", "new", "top"], "description": "Feed ordering (default hot)" },
                "limit": { "type": "integer", "description": "Number of posts (default 10, max 25)" }
            }
        })
    }

    async fn execute(&self, arguments: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let sort = arguments["sort"].as_str().unwrap_or("hot");
        let limit = arguments["limit"].as_u64().unwrap_or(10).clamp(1, 25) as usize;
        let posts = match self.platform.feed(sort, limit).await {
            Ok(posts) => posts,
            Err(e) => {
                warn!(error = %e, "Feed unavailable");
                return match self.cached(limit).await {
                    Some(text) => Ok(ToolResult::ok(text)),
                    None => Err(e),
                };
            }
        };
        if posts.is_empty() {
            return Ok(ToolResult::ok("The feed is empty."));
        }
        let mut out = format!("MoltBook feed ({sort}, {} posts):", posts.len());
        for post in &posts {
            out.push_str("\n\n");
            out.push_str(&format_post(post, 150));
        }
        Ok(ToolResult::ok(out).with_data(serde_json::to_value(&posts).unwrap_or_default()))
    }
}

pub struct MoltbookSearchTool {
    platform: Arc<dyn SocialPlatform>,
}

impl MoltbookSearchTool {
    pub fn new(platform: Arc<dyn SocialPlatform>) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl Tool for MoltbookSearchTool {
    fn name(&self) -> &str {
        "moltbook_search"
    }

    fn description(&self) -> &str {
        "Search MoltBook posts by keyword."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "query": { "type": "string", "description": "Search terms" } },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let query = str_arg(&arguments, "query")?;
        let posts = self.platform.search(query).await?;
        if posts.is_empty() {
            return Ok(ToolResult::ok(format!("No MoltBook posts found for '{query}'.")));
        }
        let text = posts
            .iter()
            .take(10)
            .map(|p| format_post(p, 150))
            .collect::<Vec<_>>()
            .join("\n\n");
        Ok(ToolResult::ok(text))
    }
}

pub struct MoltbookProfileTool {
    platform: Arc<dyn SocialPlatform>,
}

impl MoltbookProfileTool {
    pub fn new(platform: Arc<dyn SocialPlatform>) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl Tool for MoltbookProfileTool {
    fn name(&self) -> &str {
        "moltbook_profile"
    }

    fn description(&self) -> &str {
        "Show the bot's own MoltBook profile: karma, followers and post count."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _arguments: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let profile = self.platform.profile().await?;
        let agent = profile.get("agent").unwrap_or(&profile);
        let field = |k: &str| agent.get(k).map(|v| v.to_string()).unwrap_or_else(|| "?".into());
        let text = format!(
            "Name: {}\nKarma: {}\nFollowers: {}\nPosts: {}",
            agent.get("name").and_then(Value::as_str).unwrap_or("?"),
            field("karma"),
            field("follower_count"),
            field("post_count"),
        );
        Ok(ToolResult::ok(text).with_data(profile))
    }
}

pub struct MoltbookCreatePostTool {
    platform: Arc<dyn SocialPlatform>,
}

impl MoltbookCreatePostTool {
    pub fn new(platform: Arc<dyn SocialPlatform>) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl Tool for MoltbookCreatePostTool {
    fn name(&self) -> &str {
        "moltbook_create_post"
    }

    fn description(&self) -> &str {
        "Publish an original post on MoltBook. Title at most 80 characters, body under 500."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "title": { "type": "string" },
                "body": { "type": "string" },
                "submolt": { "type": "string", "description": "Community to post in" }
            },
            "required": ["title", "body"]
        })
    }

    fn scope(&self) -> ToolScope {
        ToolScope::Unattended
    }

    async fn execute(&self, arguments: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let title = truncate_chars(str_arg(&arguments, "title")?, 80);
        let body = truncate_chars(str_arg(&arguments, "body")?, 500);
        let submolt = arguments["submolt"].as_str();
        let response = self.platform.create_post(title, body, submolt).await?;
        let id = Post::from_value(response.get("post").unwrap_or(&response))
            .map(|p| p.id)
            .unwrap_or_default();
        Ok(ToolResult::ok(format!("Posted '{title}' (id {id}).")).with_data(response))
    }
}

pub struct MoltbookCommentTool {
    platform: Arc<dyn SocialPlatform>,
}

impl MoltbookCommentTool {
    pub fn new(platform: Arc<dyn SocialPlatform>) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl Tool for MoltbookCommentTool {
    fn name(&self) -> &str {
        "moltbook_comment"
    }

    fn description(&self) -> &str {
        "Comment on a MoltBook post."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "post_id": { "type": "string" },
                "content": { "type": "string", "description": "The comment text" }
            },
            "required": ["post_id", "content"]
        })
    }

    fn scope(&self) -> ToolScope {
        ToolScope::Unattended
    }

    async fn execute(&self, arguments: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let post_id = str_arg(&arguments, "post_id")?;
        let content = str_arg(&arguments, "content")?;
        self.platform.comment(post_id, content).await?;
        Ok(ToolResult::ok(format!("Commented on post {post_id}.")))
    }
}

pub struct MoltbookUpvoteTool {
    platform: Arc<dyn SocialPlatform>,
}

impl MoltbookUpvoteTool {
    pub fn new(platform: Arc<dyn SocialPlatform>) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl Tool for MoltbookUpvoteTool {
    fn name(&self) -> &str {
        "moltbook_upvote"
    }

    fn description(&self) -> &str {
        "Upvote a MoltBook post."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "post_id": { "type": "string" } },
            "required": ["post_id"]
        })
    }

    fn scope(&self) -> ToolScope {
        ToolScope::Unattended
    }

    async fn execute(&self, arguments: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let post_id = str_arg(&arguments, "post_id")?;
        self.platform.upvote(post_id).await?;
        Ok(ToolResult::ok(format!("Upvoted post {post_id}.")))
    }
}

pub struct MoltbookFollowTool {
    platform: Arc<dyn SocialPlatform>,
}

impl MoltbookFollowTool {
    pub fn new(platform: Arc<dyn SocialPlatform>) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl Tool for MoltbookFollowTool {
    fn name(&self) -> &str {
        "moltbook_follow"
    }

    fn description(&self) -> &str {
        "Follow another agent on MoltBook."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "agent_name": { "type": "string" } },
            "required": ["agent_name"]
        })
    }

    fn scope(&self) -> ToolScope {
        ToolScope::Unattended
    }

    async fn execute(&self, arguments: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let agent = str_arg(&arguments, "agent_name")?;
        self.platform.follow(agent).await?;
        Ok(ToolResult::ok(format!("Now following {agent}.")))
    }
}
