//! Tool trait — the abstraction over callable capabilities.
//!
//! Tools give the model the ability to act: look up prices, search the web,
//! read and write on the social platform, use a linked account. Each tool
//! declares which execution modes may call it and whether it mutates
//! account-scoped external state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::ToolError;
use crate::message::{ConversationKey, Identity};
use crate::provider::ToolDefinition;

/// A request to execute a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the model's tool_use id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content
    pub output: String,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            call_id: String::new(),
            success: true,
            output: output.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Who is running the orchestration loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// A human requester on a chat transport
    Interactive,
    /// The background scheduler, acting as the bot's own account
    Unattended,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Interactive => write!(f, "interactive"),
            ExecutionMode::Unattended => write!(f, "unattended"),
        }
    }
}

/// Which execution modes a tool is offered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolScope {
    Interactive,
    Unattended,
    Both,
}

impl ToolScope {
    pub fn allows(self, mode: ExecutionMode) -> bool {
        matches!(
            (self, mode),
            (ToolScope::Both, _)
                | (ToolScope::Interactive, ExecutionMode::Interactive)
                | (ToolScope::Unattended, ExecutionMode::Unattended)
        )
    }
}

/// Per-invocation context handed to a tool.
///
/// Tools that act on a linked account must resolve the credential from
/// `identity` and nothing else.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub identity: Identity,
    pub mode: ExecutionMode,
    pub conversation: Option<ConversationKey>,
}

impl ToolContext {
    pub fn interactive(identity: Identity, conversation: ConversationKey) -> Self {
        Self {
            identity,
            mode: ExecutionMode::Interactive,
            conversation: Some(conversation),
        }
    }

    pub fn unattended() -> Self {
        Self {
            identity: Identity::agent(),
            mode: ExecutionMode::Unattended,
            conversation: None,
        }
    }
}

/// The core Tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "get_crypto_price").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Which execution modes may call this tool.
    fn scope(&self) -> ToolScope {
        ToolScope::Both
    }

    /// Whether this tool changes state on the requester's linked account.
    /// Such invocations run one at a time per identity.
    fn mutates_account(&self) -> bool {
        false
    }

    /// Execute the tool with already-validated arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> std::result::Result<ToolResult, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Check `arguments` against the subset of JSON Schema tools declare:
/// an object with `required` keys, typed `properties` and string `enum`s.
pub fn validate_arguments(
    schema: &serde_json::Value,
    arguments: &serde_json::Value,
) -> std::result::Result<(), ToolError> {
    let Some(args) = arguments.as_object() else {
        return Err(ToolError::InvalidArguments("arguments must be a JSON object".into()));
    };

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for key in required.iter().filter_map(|k| k.as_str()) {
            if args.get(key).is_none_or(|v| v.is_null()) {
                return Err(ToolError::InvalidArguments(format!("missing required field '{key}'")));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) else {
        return Ok(());
    };
    for (key, value) in args {
        let Some(spec) = properties.get(key) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        if let Some(expected) = spec.get("type").and_then(|t| t.as_str()) {
            let matches = match expected {
                "string" => value.is_string(),
                "integer" => value.is_i64() || value.is_u64(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !matches {
                return Err(ToolError::InvalidArguments(format!("field '{key}' must be of type {expected}")));
            }
        }
        if let Some(allowed) = spec.get("enum").and_then(|e| e.as_array()) {
            if !allowed.contains(value) {
                return Err(ToolError::InvalidArguments(format!("field '{key}' has unsupported value {value}")));
            }
        }
    }
    Ok(())
}

/// A registry of available tools.
///
/// The orchestration loop uses this to:
/// 1. Get the tool definitions offered in its execution mode
/// 2. Validate and execute the calls the model requests
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
    account_locks: Mutex<HashMap<Identity, Arc<tokio::sync::Mutex<()>>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            account_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Definitions of the tools offered in `mode`, sorted by name.
    pub fn definitions_for(&self, mode: ExecutionMode) -> Vec<ToolDefinition> {
        let mut defs: Vec<_> = self
            .tools
            .values()
            .filter(|t| t.scope().allows(mode))
            .map(|t| t.to_definition())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Whether the named tool mutates account-scoped state.
    pub fn mutates_account(&self, name: &str) -> bool {
        self.tools.get(name).is_some_and(|t| t.mutates_account())
    }

    /// Validate and execute a tool call.
    ///
    /// Account-mutating tools hold a per-identity lock for the duration of
    /// the call.
    pub async fn execute(
        &self,
        call: &ToolCall,
        ctx: &ToolContext,
    ) -> std::result::Result<ToolResult, ToolError> {
        let tool = self.tools.get(&call.name).ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
        if !tool.scope().allows(ctx.mode) {
            return Err(ToolError::NotAvailable {
                tool_name: call.name.clone(),
                mode: ctx.mode.to_string(),
            });
        }
        validate_arguments(&tool.parameters_schema(), &call.arguments)?;
        tracing::debug!(tool = %call.name, identity = %ctx.identity, mode = %ctx.mode, "Executing tool");

        let _guard = if tool.mutates_account() {
            let lock = self.account_lock(&ctx.identity);
            Some(lock.lock_owned().await)
        } else {
            None
        };

        let mut result = tool.execute(call.arguments.clone(), ctx).await?;
        result.call_id = call.id.clone();
        Ok(result)
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    fn account_lock(&self, identity: &Identity) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.account_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(identity.clone()).or_default().clone()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str { "echo" }
        fn description(&self) -> &str { "Echoes back the input" }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" },
                    "times": { "type": "integer" }
                },
                "required": ["text"]
            })
        }
        async fn execute(&self, arguments: serde_json::Value, _ctx: &ToolContext) -> std::result::Result<ToolResult, ToolError> {
            Ok(ToolResult::ok(arguments["text"].as_str().unwrap_or("")))
        }
    }

    /// Counts how many calls are inside `execute` at once.
    struct PostTool {
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for PostTool {
        fn name(&self) -> &str { "post" }
        fn description(&self) -> &str { "Posts on the linked account" }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({ "type": "object", "properties": {} })
        }
        fn scope(&self) -> ToolScope { ToolScope::Interactive }
        fn mutates_account(&self) -> bool { true }
        async fn execute(&self, _arguments: serde_json::Value, _ctx: &ToolContext) -> std::result::Result<ToolResult, ToolError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(ToolResult::ok("posted"))
        }
    }

    fn call(name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall { id: "call_1".into(), name: name.into(), arguments }
    }

    fn ctx() -> ToolContext {
        ToolContext::interactive(Identity::from("u1"), ConversationKey::from("c1"))
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn definitions_filter_by_mode() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        registry.register(Box::new(PostTool {
            active: Arc::default(),
            peak: Arc::default(),
        }));
        let interactive: Vec<_> = registry
            .definitions_for(ExecutionMode::Interactive)
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(interactive, vec!["echo", "post"]);
        let unattended = registry.definitions_for(ExecutionMode::Unattended);
        assert_eq!(unattended.len(), 1);
        assert_eq!(unattended[0].name, "echo");
    }

    #[tokio::test]
    async fn registry_execute_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        let result = registry
            .execute(&call("echo", serde_json::json!({"text": "hello world"})), &ctx())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output, "hello world");
        assert_eq!(result.call_id, "call_1");
    }

    #[tokio::test]
    async fn registry_execute_missing_tool() {
        let registry = ToolRegistry::new();
        let err = registry.execute(&call("nonexistent", serde_json::json!({})), &ctx()).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn rejects_out_of_scope_call() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(PostTool {
            active: Arc::default(),
            peak: Arc::default(),
        }));
        let err = registry
            .execute(&call("post", serde_json::json!({})), &ToolContext::unattended())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotAvailable { .. }));
    }

    #[test]
    fn validation_checks_required_and_types() {
        let schema = EchoTool.parameters_schema();
        assert!(validate_arguments(&schema, &serde_json::json!({"text": "x"})).is_ok());
        assert!(validate_arguments(&schema, &serde_json::json!({})).is_err());
        assert!(validate_arguments(&schema, &serde_json::json!({"text": 5})).is_err());
        assert!(validate_arguments(&schema, &serde_json::json!({"text": "x", "times": 1.5})).is_err());
        assert!(validate_arguments(&schema, &serde_json::json!("text")).is_err());
    }

    #[test]
    fn validation_checks_enums() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": { "sort": { "type": "string", "enum": ["hot", "new"] } }
        });
        assert!(validate_arguments(&schema, &serde_json::json!({"sort": "hot"})).is_ok());
        assert!(validate_arguments(&schema, &serde_json::json!({"sort": "top"})).is_err());
    }

    #[tokio::test]
    async fn account_mutations_run_one_at_a_time_per_identity() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(PostTool {
            active: active.clone(),
            peak: peak.clone(),
        }));

        let c = call("post", serde_json::json!({}));
        let context = ctx();
        let results = futures::future::join_all((0..3).map(|_| registry.execute(&c, &context))).await;
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }
}
