//! X (Twitter) tools acting on the requester's own linked account.
//!
//! Each invocation resolves the credential linked by `ctx.identity` and
//! hands it to the `bird` CLI through its environment, never its argv.
//! Output is scrubbed of the credential before it reaches the model.

use async_trait::async_trait;
use clawdvc_core::account::SessionCredential;
use clawdvc_core::error::ToolError;
use clawdvc_core::knowledge::truncate_chars;
use clawdvc_core::tool::{Tool, ToolContext, ToolResult, ToolScope};
use clawdvc_security::SecretsManager;
use clawdvc_store::AccountStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Platform name under which X credentials are linked.
pub const PLATFORM: &str = "x";

const MAX_OUTPUT_CHARS: usize = 4000;
const AUTH_ERROR_PATTERNS: &[&str] = &[
    "unauthorized",
    "authentication failed",
    "forbidden",
    "not authenticated",
    "login required",
    "could not authenticate",
];

/// The two session cookies the CLI needs.
#[derive(Clone, PartialEq, Eq)]
pub struct XCookies {
    pub auth_token: String,
    pub ct0: String,
}

impl XCookies {
    pub fn new(auth_token: impl Into<String>, ct0: impl Into<String>) -> Self {
        Self {
            auth_token: auth_token.into(),
            ct0: ct0.into(),
        }
    }

    /// Parse `auth_token=<a>; ct0=<b>` (either order).
    pub fn parse(credential: &SessionCredential) -> Option<Self> {
        let mut auth_token = None;
        let mut ct0 = None;
        for part in credential.expose().split(';') {
            match part.trim().split_once('=') {
                Some(("auth_token", v)) if !v.is_empty() => auth_token = Some(v.to_string()),
                Some(("ct0", v)) if !v.is_empty() => ct0 = Some(v.to_string()),
                _ => {}
            }
        }
        Some(Self::new(auth_token?, ct0?))
    }

    pub fn to_credential(&self) -> SessionCredential {
        SessionCredential::new(format!("auth_token={}; ct0={}", self.auth_token, self.ct0))
    }
}

/// Runs account commands with one identity's credential.
#[async_trait]
pub trait AccountClient: Send + Sync {
    async fn run(&self, cookies: &XCookies, args: &[String]) -> Result<String, ToolError>;
}

/// The `bird` command-line client.
pub struct BirdCli {
    program: String,
    timeout: Duration,
}

impl BirdCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl AccountClient for BirdCli {
    async fn run(&self, cookies: &XCookies, args: &[String]) -> Result<String, ToolError> {
        let failed = |reason: String| ToolError::ExecutionFailed {
            tool_name: self.program.clone(),
            reason,
        };
        debug!(program = %self.program, command = args.first().map(String::as_str).unwrap_or(""), "Running account command");

        let mut command = Command::new(&self.program);
        command
            .arg("--plain")
            .arg("--")
            .args(args)
            .env("AUTH_TOKEN", &cookies.auth_token)
            .env("CT0", &cookies.ct0)
            .kill_on_drop(true);
        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| ToolError::Timeout {
                tool_name: self.program.clone(),
                timeout_secs: self.timeout.as_secs(),
            })?
            .map_err(|e| failed(format!("could not start: {e}")))?;

        let secrets = [cookies.auth_token.as_str(), cookies.ct0.as_str()];
        let stdout = SecretsManager::redact(&String::from_utf8_lossy(&output.stdout), &secrets);
        let stderr = SecretsManager::redact(&String::from_utf8_lossy(&output.stderr), &secrets);

        let combined = format!("{stdout}\n{stderr}").to_lowercase();
        if AUTH_ERROR_PATTERNS.iter().any(|p| combined.contains(p)) {
            warn!(program = %self.program, "Linked X session rejected");
            return Err(ToolError::PermissionDenied {
                tool_name: self.program.clone(),
                reason: "X session expired or invalid. Reconnect with /connect_x <auth_token> <ct0>.".into(),
            });
        }
        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            return Err(failed(format!("exit code {code}: {}", stderr.trim())));
        }
        let text = stdout.trim();
        Ok(if text.is_empty() { "(no output)".into() } else { truncate_chars(text, MAX_OUTPUT_CHARS).to_string() })
    }
}

/// Which X action a tool performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XAction {
    HomeTimeline,
    ReadPost,
    Search,
    Mentions,
    Whoami,
    PostTweet,
}

impl XAction {
    pub const ALL: [XAction; 6] = [
        XAction::HomeTimeline,
        XAction::ReadPost,
        XAction::Search,
        XAction::Mentions,
        XAction::Whoami,
        XAction::PostTweet,
    ];

    fn name(self) -> &'static str {
        match self {
            XAction::HomeTimeline => "x_home_timeline",
            XAction::ReadPost => "x_read_post",
            XAction::Search => "x_search",
            XAction::Mentions => "x_mentions",
            XAction::Whoami => "x_whoami",
            XAction::PostTweet => "x_post_tweet",
        }
    }

    fn description(self) -> &'static str {
        match self {
            XAction::HomeTimeline => "Read the home timeline of the user's linked X account.",
            XAction::ReadPost => "Read a single X post by URL or id.",
            XAction::Search => "Search X posts.",
            XAction::Mentions => "Read recent mentions of the user's linked X account.",
            XAction::Whoami => "Show which X account the user has linked.",
            XAction::PostTweet => "Post a tweet from the user's linked X account. Only do this when the user asks.",
        }
    }

    fn schema(self) -> serde_json::Value {
        let count = serde_json::json!({ "type": "integer", "description": "Number of posts (default 10, max 50)" });
        match self {
            XAction::HomeTimeline | XAction::Mentions => serde_json::json!({
                "type": "object",
                "properties": { "count": count }
            }),
            XAction::ReadPost => serde_json::json!({
                "type": "object",
                "properties": { "url": { "type": "string" } },
                "required": ["url"]
            }),
            XAction::Search => serde_json::json!({
                "type": "object",
                "properties": { "query": { "type": "string" }, "count": count },
                "required": ["query"]
            }),
            XAction::Whoami => serde_json::json!({ "type": "object", "properties": {} }),
            XAction::PostTweet => serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string", "description": "Tweet text, at most 280 characters" } },
                "required": ["text"]
            }),
        }
    }

    /// CLI arguments for this action.
    fn cli_args(self, arguments: &serde_json::Value) -> Result<Vec<String>, ToolError> {
        let count = arguments["count"].as_u64().unwrap_or(10).clamp(1, 50).to_string();
        let text = |key: &str| {
            arguments[key]
                .as_str()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .ok_or_else(|| ToolError::InvalidArguments(format!("'{key}' must be a non-empty string")))
        };
        Ok(match self {
            XAction::HomeTimeline => vec!["home".into(), "--count".into(), count],
            XAction::ReadPost => vec!["read".into(), text("url")?],
            XAction::Search => vec!["search".into(), text("query")?, "--count".into(), count],
            XAction::Mentions => vec!["mentions".into(), "--count".into(), count],
            XAction::Whoami => vec!["whoami".into()],
            XAction::PostTweet => {
                let tweet = text("text")?;
                if tweet.chars().count() > 280 {
                    return Err(ToolError::InvalidArguments("tweet exceeds 280 characters".into()));
                }
                vec!["tweet".into(), tweet]
            }
        })
    }
}

pub struct XAccountTool {
    action: XAction,
    accounts: Arc<AccountStore>,
    client: Arc<dyn AccountClient>,
}

impl XAccountTool {
    pub fn new(action: XAction, accounts: Arc<AccountStore>, client: Arc<dyn AccountClient>) -> Self {
        Self {
            action,
            accounts,
            client,
        }
    }
}

#[async_trait]
impl Tool for XAccountTool {
    fn name(&self) -> &str {
        self.action.name()
    }

    fn description(&self) -> &str {
        self.action.description()
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.action.schema()
    }

    fn scope(&self) -> ToolScope {
        ToolScope::Interactive
    }

    fn mutates_account(&self) -> bool {
        self.action == XAction::PostTweet
    }

    async fn execute(&self, arguments: serde_json::Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let args = self.action.cli_args(&arguments)?;
        let credential = self
            .accounts
            .credential_for(&ctx.identity, PLATFORM)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: e.to_string(),
            })?
            .ok_or_else(|| ToolError::AccountNotLinked {
                platform: PLATFORM.into(),
            })?;
        let cookies = XCookies::parse(&credential).ok_or_else(|| ToolError::PermissionDenied {
            tool_name: self.name().into(),
            reason: "stored X session is malformed. Reconnect with /connect_x <auth_token> <ct0>.".into(),
        })?;
        let output = self.client.run(&cookies, &args).await?;
        Ok(ToolResult::ok(output))
    }
}
