//! # ClawdVC Core
//!
//! Domain types, collaborator traits and error definitions for the ClawdVC
//! conversation and autonomous-agent engine. This crate has no framework
//! dependencies; it defines the model every other crate implements against.
//!
//! Every external collaborator (model, chat transport, storage, tools) is a
//! trait here. Implementations live in their own crates, which keeps the
//! orchestration logic testable with scripted stand-ins.

pub mod account;
pub mod channel;
pub mod error;
pub mod event;
pub mod knowledge;
pub mod message;
pub mod metrics;
pub mod provider;
pub mod storage;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use account::{LinkedAccount, SessionCredential};
pub use channel::{ChatKind, ChatTransport, InboundEvent, MessageHandle};
pub use error::{ChannelError, Error, ProviderError, Result, StorageError, ToolError};
pub use event::{DomainEvent, EventBus};
pub use knowledge::{KnowledgeEntry, Provenance};
pub use message::{Conversation, ConversationKey, Identity, Role, Turn};
pub use metrics::{ActionKind, GrowthMetric, Outcome};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolDefinition, Usage};
pub use storage::Storage;
pub use tool::{ExecutionMode, Tool, ToolCall, ToolContext, ToolRegistry, ToolResult, ToolScope};
