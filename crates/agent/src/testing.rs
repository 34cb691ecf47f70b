//! Scripted collaborators for tests: a model that plays back canned
//! rounds, a transport that records what it was asked to send, tools with
//! controlled latency, and in-memory market and social platforms.
//!
//! Compiled for this crate's tests and, with the `testing` feature, for
//! other crates' tests.

use async_trait::async_trait;
use clawdvc_core::channel::{ChatTransport, InboundEvent, MessageHandle};
use clawdvc_core::error::{ChannelError, ProviderError, ToolError};
use clawdvc_core::message::{ConversationKey, Turn};
use clawdvc_core::provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage};
use clawdvc_core::tool::{Tool, ToolCall, ToolContext, ToolResult, ToolScope};
use clawdvc_tools::market::{CoinMatch, MarketData, PriceSnapshot};
use clawdvc_tools::moltbook::{Post, SocialPlatform};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Build a tool call.
pub fn tool_call(id: &str, name: &str, arguments: Value) -> ToolCall {
    ToolCall {
        id: id.into(),
        name: name.into(),
        arguments,
    }
}

/// One scripted model round.
#[derive(Debug, Clone)]
pub enum Script {
    /// Answer with text, streamed word by word
    Text(String),
    /// Request tool calls
    Tools(Vec<ToolCall>),
    /// Fail before producing anything
    Fail(ProviderError),
    /// Stream some text, then fail
    FailAfter(String, ProviderError),
    /// Wait, then answer with text
    Slow(Duration, String),
}

impl Script {
    pub fn text(text: &str) -> Self {
        Script::Text(text.into())
    }

    pub fn tools(calls: Vec<ToolCall>) -> Self {
        Script::Tools(calls)
    }

    pub fn fail(error: ProviderError) -> Self {
        Script::Fail(error)
    }

    pub fn fail_after(partial: &str, error: ProviderError) -> Self {
        Script::FailAfter(partial.into(), error)
    }

    pub fn slow(delay: Duration, text: &str) -> Self {
        Script::Slow(delay, text.into())
    }
}

/// A model that plays back scripted rounds in order and records every
/// request it receives. An exhausted script fails with `InvalidResponse`.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Script>>,
    repeat_tool: Option<String>,
    requests: Mutex<Vec<ProviderRequest>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Script>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            repeat_tool: None,
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// A model that requests `tool` on every round, forever.
    pub fn always_tools(tool: &str) -> Self {
        Self {
            repeat_tool: Some(tool.into()),
            ..Self::new(Vec::new())
        }
    }

    /// Append more rounds to the script.
    pub fn push(&self, script: Script) {
        self.script.lock().unwrap().push_back(script);
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next(&self, request: &ProviderRequest) -> Script {
        self.requests.lock().unwrap().push(request.clone());
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(tool) = &self.repeat_tool {
            return Script::Tools(vec![tool_call(&format!("call_{n}"), tool, serde_json::json!({}))]);
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Script::Fail(ProviderError::InvalidResponse("script exhausted".into())))
    }
}

fn usage() -> Usage {
    Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let turn = match self.next(&request) {
            Script::Text(text) => Turn::assistant(text),
            Script::Slow(delay, text) => {
                tokio::time::sleep(delay).await;
                Turn::assistant(text)
            }
            Script::Tools(calls) => Turn::tool_request("", calls),
            Script::Fail(e) | Script::FailAfter(_, e) => return Err(e),
        };
        Ok(ProviderResponse {
            turn,
            usage: Some(usage()),
            model: request.model,
        })
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> Result<mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError> {
        let script = self.next(&request);
        let (tx, rx) = mpsc::channel(64);
        let (text, calls, error, delay) = match script {
            Script::Fail(e) => return Err(e),
            Script::Text(text) => (text, Vec::new(), None, Duration::ZERO),
            Script::Slow(delay, text) => (text, Vec::new(), None, delay),
            Script::Tools(calls) => (String::new(), calls, None, Duration::ZERO),
            Script::FailAfter(text, e) => (text, Vec::new(), Some(e), Duration::ZERO),
        };
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            for word in text.split_inclusive(' ') {
                let chunk = StreamChunk {
                    content: Some(word.to_string()),
                    ..Default::default()
                };
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }
            let last = match error {
                Some(e) => Err(e),
                None => Ok(StreamChunk {
                    tool_calls: calls,
                    done: true,
                    usage: Some(usage()),
                    ..Default::default()
                }),
            };
            let _ = tx.send(last).await;
        });
        Ok(rx)
    }
}

/// A message as the recording transport last saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub conversation: ConversationKey,
    pub message_id: String,
    pub text: String,
    pub edits: usize,
}

/// A transport that records deliveries and edits, and replays pushed
/// inbound events from `start`.
pub struct RecordingTransport {
    sent: Mutex<Vec<SentMessage>>,
    inbound_tx: mpsc::Sender<Result<InboundEvent, ChannelError>>,
    inbound_rx: Mutex<Option<mpsc::Receiver<Result<InboundEvent, ChannelError>>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(64);
        Self {
            sent: Mutex::new(Vec::new()),
            inbound_tx: tx,
            inbound_rx: Mutex::new(Some(rx)),
        }
    }

    /// Queue an inbound event for the receiver returned by `start`.
    pub async fn push(&self, event: InboundEvent) {
        let _ = self.inbound_tx.send(Ok(event)).await;
    }

    /// Final text of every message sent to `conversation`, oldest first.
    pub fn texts(&self, conversation: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.conversation.as_str() == conversation)
            .map(|m| m.text.clone())
            .collect()
    }

    pub fn messages(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn last_text(&self, conversation: &str) -> Option<String> {
        self.texts(conversation).pop()
    }
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    async fn start(&self) -> Result<mpsc::Receiver<Result<InboundEvent, ChannelError>>, ChannelError> {
        self.inbound_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| ChannelError::ConnectionLost("already started".into()))
    }

    async fn deliver(&self, conversation: &ConversationKey, text: &str) -> Result<MessageHandle, ChannelError> {
        let mut sent = self.sent.lock().unwrap();
        let message_id = (sent.len() + 1).to_string();
        sent.push(SentMessage {
            conversation: conversation.clone(),
            message_id: message_id.clone(),
            text: text.to_string(),
            edits: 0,
        });
        Ok(MessageHandle {
            conversation: conversation.clone(),
            message_id,
        })
    }

    async fn edit(&self, handle: &MessageHandle, text: &str) -> Result<(), ChannelError> {
        let mut sent = self.sent.lock().unwrap();
        let message = sent
            .iter_mut()
            .find(|m| m.message_id == handle.message_id)
            .ok_or_else(|| ChannelError::InvalidPayload(format!("unknown message {}", handle.message_id)))?;
        message.text = text.to_string();
        message.edits += 1;
        Ok(())
    }
}

/// A tool that sleeps, then succeeds with its own name as output.
pub struct DelayTool {
    name: String,
    delay: Duration,
    scope: ToolScope,
    mutating: bool,
    finished: Option<Arc<Mutex<Vec<String>>>>,
}

impl DelayTool {
    pub fn new(name: &str, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
            scope: ToolScope::Both,
            mutating: false,
            finished: None,
        }
    }

    /// Push the tool name onto `log` when an invocation finishes.
    pub fn recording(mut self, log: Arc<Mutex<Vec<String>>>) -> Self {
        self.finished = Some(log);
        self
    }

    pub fn mutating(mut self) -> Self {
        self.mutating = true;
        self
    }

    pub fn with_scope(mut self, scope: ToolScope) -> Self {
        self.scope = scope;
        self
    }
}

#[async_trait]
impl Tool for DelayTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Sleeps, then echoes its name"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    fn scope(&self) -> ToolScope {
        self.scope
    }

    fn mutates_account(&self) -> bool {
        self.mutating
    }

    async fn execute(&self, _arguments: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        tokio::time::sleep(self.delay).await;
        if let Some(log) = &self.finished {
            log.lock().unwrap().push(self.name.clone());
        }
        Ok(ToolResult::ok(self.name.clone()))
    }
}

/// Market data with fixed USD prices.
#[derive(Default)]
pub struct FakeMarket {
    pub fail: bool,
}

#[async_trait]
impl MarketData for FakeMarket {
    async fn prices(&self, coin_ids: &[String], currency: &str) -> Result<Vec<PriceSnapshot>, ToolError> {
        if self.fail {
            return Err(ToolError::ExecutionFailed {
                tool_name: "market".into(),
                reason: "unreachable".into(),
            });
        }
        Ok(coin_ids
            .iter()
            .filter_map(|id| {
                let price = match id.as_str() {
                    "bitcoin" => 97000.0,
                    "ethereum" => 3100.0,
                    _ => return None,
                };
                Some(PriceSnapshot {
                    coin_id: id.clone(),
                    currency: currency.into(),
                    price,
                    change_24h: Some(1.5),
                    volume_24h: None,
                    market_cap: None,
                    last_updated_at: None,
                })
            })
            .collect())
    }

    async fn search(&self, query: &str) -> Result<Vec<CoinMatch>, ToolError> {
        Ok(vec![CoinMatch {
            id: query.to_lowercase(),
            name: query.into(),
            symbol: query.to_uppercase(),
        }])
    }
}

/// An in-memory social platform with a fixed feed. Writes are recorded
/// as `"<action>:<target>"` strings.
#[derive(Default)]
pub struct FakePlatform {
    pub posts: Vec<Post>,
    pub fail_reads: bool,
    writes: Mutex<Vec<String>>,
}

impl FakePlatform {
    pub fn with_posts(posts: Vec<Post>) -> Self {
        Self {
            posts,
            ..Default::default()
        }
    }

    /// A platform whose reads all fail.
    pub fn failing() -> Self {
        Self {
            fail_reads: true,
            ..Default::default()
        }
    }

    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    fn record(&self, entry: String) -> Result<Value, ToolError> {
        self.writes.lock().unwrap().push(entry);
        Ok(serde_json::json!({ "success": true }))
    }

    fn read(&self, limit: usize) -> Result<Vec<Post>, ToolError> {
        if self.fail_reads {
            return Err(ToolError::ExecutionFailed {
                tool_name: "moltbook".into(),
                reason: "unreachable".into(),
            });
        }
        Ok(self.posts.iter().take(limit).cloned().collect())
    }
}

/// A post fixture.
pub fn post(id: &str, title: &str, author: &str, submolt: &str) -> Post {
    Post {
        id: id.into(),
        title: title.into(),
        body: format!("{title} body"),
        author: author.into(),
        submolt: submolt.into(),
        upvotes: 3,
    }
}

#[async_trait]
impl SocialPlatform for FakePlatform {
    async fn feed(&self, _sort: &str, limit: usize) -> Result<Vec<Post>, ToolError> {
        self.read(limit)
    }

    async fn search(&self, query: &str) -> Result<Vec<Post>, ToolError> {
        let q = query.to_lowercase();
        Ok(self
            .read(usize::MAX)?
            .into_iter()
            .filter(|p| p.title.to_lowercase().contains(&q))
            .collect())
    }

    async fn profile(&self) -> Result<Value, ToolError> {
        Ok(serde_json::json!({ "agent": { "name": "ClawdVC", "karma": 1 } }))
    }

    async fn create_post(&self, title: &str, _body: &str, submolt: Option<&str>) -> Result<Value, ToolError> {
        self.record(format!("post:{}:{title}", submolt.unwrap_or("")))
    }

    async fn comment(&self, post_id: &str, _content: &str) -> Result<Value, ToolError> {
        self.record(format!("comment:{post_id}"))
    }

    async fn upvote(&self, post_id: &str) -> Result<Value, ToolError> {
        self.record(format!("upvote:{post_id}"))
    }

    async fn follow(&self, agent_name: &str) -> Result<Value, ToolError> {
        self.record(format!("follow:{agent_name}"))
    }

    async fn subscribe(&self, submolt: &str) -> Result<Value, ToolError> {
        self.record(format!("subscribe:{submolt}"))
    }
}
