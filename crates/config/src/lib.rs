//! Configuration loading, validation, and management for ClawdVC.
//!
//! Loads configuration from `~/.clawdvc/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.clawdvc/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Anthropic API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model for interactive conversations
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub moltbook: MoltbookConfig,

    #[serde(default)]
    pub market: MarketConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub accounts: AccountsConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

fn default_model() -> String {
    "claude-opus-4-5-20251101".into()
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("agent", &self.agent)
            .field("history", &self.history)
            .field("rate_limit", &self.rate_limit)
            .field("knowledge", &self.knowledge)
            .field("telegram", &self.telegram)
            .field("moltbook", &self.moltbook)
            .field("market", &self.market)
            .field("search", &self.search)
            .field("accounts", &self.accounts)
            .field("storage", &self.storage)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

/// Orchestration loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model used by the autonomous agent
    #[serde(default = "default_unattended_model")]
    pub unattended_model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Model rounds per turn before the fallback answer
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,

    #[serde(default = "default_model_retry_backoff_ms")]
    pub model_retry_backoff_ms: u64,

    /// Minimum gap between edits of a streaming reply
    #[serde(default = "default_stream_edit_interval_ms")]
    pub stream_edit_interval_ms: u64,
}

fn default_unattended_model() -> String {
    "claude-haiku-4-5-20251001".into()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tool_rounds() -> u32 {
    8
}
fn default_model_retry_backoff_ms() -> u64 {
    1500
}
fn default_stream_edit_interval_ms() -> u64 {
    1000
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            unattended_model: default_unattended_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            max_tool_rounds: default_max_tool_rounds(),
            model_retry_backoff_ms: default_model_retry_backoff_ms(),
            stream_edit_interval_ms: default_stream_edit_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Turns kept per conversation
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

fn default_max_history() -> usize {
    50
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests admitted per identity per 60 seconds
    #[serde(default = "default_per_minute")]
    pub per_minute: usize,
}

fn default_per_minute() -> usize {
    10
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: default_per_minute(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Entries folded into a chat context
    #[serde(default = "default_summary_entries")]
    pub summary_entries: usize,
}

fn default_max_entries() -> usize {
    2000
}
fn default_summary_entries() -> usize {
    5
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            summary_entries: default_summary_entries(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,

    /// User ids allowed to run admin commands
    #[serde(default)]
    pub admin_ids: Vec<String>,

    /// Channel that `/post` and `/news` publish to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,

    /// Allowed sender ids; `["*"]` admits everyone, an empty list nobody
    #[serde(default = "default_allowed_users")]
    pub allowed_users: Vec<String>,
}

fn default_allowed_users() -> Vec<String> {
    vec!["*".into()]
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            admin_ids: Vec::new(),
            channel_id: None,
            allowed_users: default_allowed_users(),
        }
    }
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &redact(&self.bot_token))
            .field("admin_ids", &self.admin_ids)
            .field("channel_id", &self.channel_id)
            .field("allowed_users", &self.allowed_users)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct MoltbookConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_moltbook_url")]
    pub base_url: String,
}

fn default_moltbook_url() -> String {
    "https://www.moltbook.com/api/v1".into()
}

impl Default for MoltbookConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_moltbook_url(),
        }
    }
}

impl std::fmt::Debug for MoltbookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MoltbookConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    #[serde(default = "default_market_url")]
    pub base_url: String,
}

fn default_market_url() -> String {
    "https://api.coingecko.com/api/v3".into()
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            base_url: default_market_url(),
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brave_api_key: Option<String>,
}

impl std::fmt::Debug for SearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchConfig")
            .field("brave_api_key", &redact(&self.brave_api_key))
            .finish()
    }
}

/// Linked-account settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct AccountsConfig {
    /// External CLI used for linked-account actions
    #[serde(default = "default_cli_path")]
    pub cli_path: String,

    /// Secret the credential key is derived from; a key file is generated
    /// next to the database when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

fn default_cli_path() -> String {
    "bird".into()
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            cli_path: default_cli_path(),
            secret: None,
        }
    }
}

impl std::fmt::Debug for AccountsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountsConfig")
            .field("cli_path", &self.cli_path)
            .field("secret", &redact(&self.secret))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "sqlite", "file" or "memory"
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Database file (sqlite) or directory (file)
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

fn default_storage_backend() -> String {
    "sqlite".into()
}
fn default_storage_path() -> PathBuf {
    PathBuf::from("data/bot.db")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: default_storage_path(),
        }
    }
}

/// Autonomous agent timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_learn_interval")]
    pub learn_interval_minutes: u64,

    #[serde(default = "default_engage_interval")]
    pub engage_interval_minutes: u64,

    #[serde(default = "default_post_interval")]
    pub post_interval_minutes: u64,

    /// Share of an action's interval it may run before being aborted
    #[serde(default = "default_timeout_fraction")]
    pub timeout_fraction: f64,

    /// Posts considered per engage run
    #[serde(default = "default_engage_batch")]
    pub engage_batch: usize,

    /// Communities subscribed to during startup setup
    #[serde(default = "default_submolts")]
    pub submolts: Vec<String>,
}

fn default_true() -> bool {
    true
}
fn default_learn_interval() -> u64 {
    10
}
fn default_engage_interval() -> u64 {
    20
}
fn default_post_interval() -> u64 {
    40
}
fn default_timeout_fraction() -> f64 {
    0.8
}
fn default_engage_batch() -> usize {
    8
}
fn default_submolts() -> Vec<String> {
    ["general", "crypto", "ai", "agents"].into_iter().map(String::from).collect()
}

impl SchedulerConfig {
    pub fn learn_interval(&self) -> Duration {
        Duration::from_secs(self.learn_interval_minutes * 60)
    }

    pub fn engage_interval(&self) -> Duration {
        Duration::from_secs(self.engage_interval_minutes * 60)
    }

    pub fn post_interval(&self) -> Duration {
        Duration::from_secs(self.post_interval_minutes * 60)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            learn_interval_minutes: default_learn_interval(),
            engage_interval_minutes: default_engage_interval(),
            post_interval_minutes: default_post_interval(),
            timeout_fraction: default_timeout_fraction(),
            engage_batch: default_engage_batch(),
            submolts: default_submolts(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path, then apply environment
    /// overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides. `lookup` resolves a variable name.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("ANTHROPIC_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(model) = get("CLAUDE_MODEL") {
            self.model = model;
        }
        if let Some(model) = get("AGENT_MODEL") {
            self.agent.unattended_model = model;
        }
        if let Some(n) = get("MAX_HISTORY").and_then(|v| v.trim().parse().ok()) {
            self.history.max_history = n;
        }
        if let Some(n) = get("RATE_LIMIT").and_then(|v| v.trim().parse().ok()) {
            self.rate_limit.per_minute = n;
        }
        if let Some(token) = get("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = Some(token);
        }
        if let Some(ids) = get("ADMIN_IDS") {
            self.telegram.admin_ids = ids
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(channel) = get("CHANNEL_ID") {
            self.telegram.channel_id = Some(channel);
        }
        if let Some(key) = get("MOLTBOOK_API_KEY") {
            self.moltbook.api_key = Some(key);
        }
        if let Some(key) = get("BRAVE_SEARCH_API_KEY") {
            self.search.brave_api_key = Some(key);
        }
        if let Some(secret) = get("X_COOKIE_SECRET") {
            self.accounts.secret = Some(secret);
        }
        if let Some(path) = get("DB_PATH") {
            self.storage.path = PathBuf::from(path);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".clawdvc")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.temperature < 0.0 || self.agent.temperature > 1.0 {
            return Err(ConfigError::ValidationError(
                "agent.temperature must be between 0.0 and 1.0".into(),
            ));
        }
        if self.agent.max_tool_rounds == 0 {
            return Err(ConfigError::ValidationError("agent.max_tool_rounds must be > 0".into()));
        }
        if self.history.max_history == 0 {
            return Err(ConfigError::ValidationError("history.max_history must be > 0".into()));
        }
        if self.rate_limit.per_minute == 0 {
            return Err(ConfigError::ValidationError("rate_limit.per_minute must be > 0".into()));
        }
        if self.knowledge.max_entries == 0 {
            return Err(ConfigError::ValidationError("knowledge.max_entries must be > 0".into()));
        }
        let s = &self.scheduler;
        if s.learn_interval_minutes == 0 || s.engage_interval_minutes == 0 || s.post_interval_minutes == 0 {
            return Err(ConfigError::ValidationError("scheduler intervals must be > 0".into()));
        }
        if !(s.timeout_fraction > 0.0 && s.timeout_fraction <= 1.0) {
            return Err(ConfigError::ValidationError(
                "scheduler.timeout_fraction must be in (0, 1]".into(),
            ));
        }
        if !matches!(self.storage.backend.as_str(), "sqlite" | "file" | "memory") {
            return Err(ConfigError::ValidationError(format!(
                "unknown storage.backend '{}'",
                self.storage.backend
            )));
        }
        Ok(())
    }

    /// Check if an API key is available.
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Whether `sender` may run admin commands.
    pub fn is_admin(&self, sender: &str) -> bool {
        self.telegram.admin_ids.iter().any(|id| id == sender)
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            agent: AgentConfig::default(),
            history: HistoryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            knowledge: KnowledgeConfig::default(),
            telegram: TelegramConfig::default(),
            moltbook: MoltbookConfig::default(),
            market: MarketConfig::default(),
            search: SearchConfig::default(),
            accounts: AccountsConfig::default(),
            storage: StorageConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
