//! ChatTransport trait — the abstraction over chat platforms.
//!
//! A transport connects the engine to a messaging platform (Telegram, the
//! terminal). It yields inbound events and delivers replies, editing a
//! delivered message in place while an answer streams in.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;
use crate::message::{ConversationKey, Identity};

/// Whether an event came from a one-to-one chat or a multi-party one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Private,
    Group,
}

/// An event received from a transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub conversation: ConversationKey,

    pub sender: Identity,

    /// Human-readable sender name (if available)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,

    pub chat_kind: ChatKind,

    /// Raw text, including a leading `/command` when present
    pub text: String,

    /// Username of the bot account that received the event, when the
    /// transport knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_username: Option<String>,

    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    pub fn new(
        conversation: ConversationKey,
        sender: Identity,
        chat_kind: ChatKind,
        text: impl Into<String>,
    ) -> Self {
        Self {
            conversation,
            sender,
            sender_name: None,
            chat_kind,
            text: text.into(),
            bot_username: None,
            received_at: Utc::now(),
        }
    }

    /// Split `/name@bot args` into `("name", "args")`.
    ///
    /// Returns `None` for free-form text.
    pub fn command(&self) -> Option<(&str, &str)> {
        let text = self.text.trim_start();
        let rest = text.strip_prefix('/')?;
        let (head, args) = match rest.find(char::is_whitespace) {
            Some(idx) => (&rest[..idx], rest[idx..].trim()),
            None => (rest, ""),
        };
        let name = head.split('@').next().unwrap_or(head);
        if name.is_empty() {
            return None;
        }
        Some((name, args))
    }

    /// The `bot` in `/name@bot`, if the command names one.
    pub fn command_target(&self) -> Option<&str> {
        let rest = self.text.trim_start().strip_prefix('/')?;
        let head = rest.split(char::is_whitespace).next().unwrap_or(rest);
        head.split_once('@').map(|(_, target)| target).filter(|t| !t.is_empty())
    }

    /// Whether this is a `/name@bot` command meant for a different bot.
    /// Without a known username nothing is treated as addressed elsewhere.
    pub fn addressed_elsewhere(&self) -> bool {
        match (self.command_target(), self.bot_username.as_deref()) {
            (Some(target), Some(me)) => !target.eq_ignore_ascii_case(me.trim_start_matches('@')),
            _ => false,
        }
    }
}

/// Points at a delivered message so it can be edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHandle {
    pub conversation: ConversationKey,
    pub message_id: String,
}

/// The core transport trait.
///
/// Implementations own connection handling and reconnects; the receiver
/// returned by `start` is consumed once and not restarted.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Human-readable transport name (e.g., "telegram", "cli").
    fn name(&self) -> &str;

    /// Start receiving inbound events.
    async fn start(
        &self,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<InboundEvent, ChannelError>>,
        ChannelError,
    >;

    /// Send a new message to a conversation.
    async fn deliver(
        &self,
        conversation: &ConversationKey,
        text: &str,
    ) -> std::result::Result<MessageHandle, ChannelError>;

    /// Replace the text of a previously delivered message.
    async fn edit(&self, handle: &MessageHandle, text: &str) -> std::result::Result<(), ChannelError>;

    /// Send a typing indicator (if the platform supports it).
    async fn send_typing(&self, _conversation: &ConversationKey) -> std::result::Result<(), ChannelError> {
        Ok(())
    }
}
