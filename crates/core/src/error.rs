//! Error types for the ClawdVC engine.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the top-level [`Error`]
//! carries the engine's failure taxonomy on top of them.

use thiserror::Error;

/// The top-level error type for all engine operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Engine taxonomy ---
    #[error("Admission denied for {identity}")]
    AdmissionDenied { identity: String },

    #[error("Model call failed after {attempts} attempt(s): {source}")]
    ModelCallFailed {
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    #[error("Tool invocation failed: {0}")]
    ToolInvocationFailed(#[from] ToolError),

    #[error("Round limit of {limit} exceeded without a final answer")]
    RoundLimitExceeded { limit: u32 },

    #[error("Storage write failed: {0}")]
    StorageWriteFailed(#[source] StorageError),

    #[error("Scheduled action {kind} failed: {reason}")]
    ScheduledActionFailed { kind: String, reason: String },

    // --- Collaborator errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this failure should be shown to the requester as its own message.
    pub fn is_user_visible(&self) -> bool {
        matches!(self, Error::AdmissionDenied { .. } | Error::ModelCallFailed { .. })
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    #[error("Message delivery failed to {channel}: {reason}")]
    DeliveryFailed { channel: String, reason: String },

    #[error("Unauthorized sender: {sender_id} on {channel}")]
    Unauthorized { channel: String, sender_id: String },

    #[error("Channel connection lost: {0}")]
    ConnectionLost(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("Storage I/O failed: {0}")]
    Io(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Stored value for {key} is corrupt: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Credential sealing failed: {0}")]
    Crypto(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool {tool_name} is not available in {mode} mode")]
    NotAvailable { tool_name: String, mode: String },

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Permission denied: {tool_name}: {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("No linked {platform} account for this user")]
    AccountNotLinked { platform: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}
