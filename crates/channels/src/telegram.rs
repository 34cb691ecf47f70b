//! Telegram transport over the Bot API.
//!
//! Inbound events come from a `getUpdates` long-poll loop; replies go out
//! through `sendMessage` and are revised with `editMessageText`.

use async_trait::async_trait;
use clawdvc_core::channel::{ChatKind, ChatTransport, InboundEvent, MessageHandle};
use clawdvc_core::error::ChannelError;
use clawdvc_core::message::{ConversationKey, Identity};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Telegram rejects messages longer than this many characters.
pub const MAX_MESSAGE_CHARS: usize = 4096;

const POLL_TIMEOUT_SECS: u64 = 30;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(POLL_TIMEOUT_SECS + 10);
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct TelegramTransport {
    bot_token: String,
    api_base: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for TelegramTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramTransport")
            .field("bot_token", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl TelegramTransport {
    pub fn new(bot_token: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            bot_token: bot_token.into(),
            api_base: DEFAULT_API_BASE.into(),
            client,
        }
    }

    /// Point the transport at a different Bot API server.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    async fn call(&self, method: &str, body: &Value) -> Result<Value, ChannelError> {
        let url = format!("{}/bot{}/{method}", self.api_base, self.bot_token);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            // reqwest errors embed the URL, and with it the token
            .map_err(|e| ChannelError::ConnectionLost(format!("{method}: {}", e.without_url())))?;
        let envelope: ApiResponse = response
            .json()
            .await
            .map_err(|e| ChannelError::InvalidPayload(format!("{method}: {}", e.without_url())))?;
        envelope.into_result(method)
    }

    async fn poll_loop(self, tx: mpsc::Sender<Result<InboundEvent, ChannelError>>, bot_username: Option<String>) {
        let mut offset: i64 = 0;
        let mut backoff = INITIAL_BACKOFF;

        while !tx.is_closed() {
            let body = json!({
                "offset": offset,
                "timeout": POLL_TIMEOUT_SECS,
                "allowed_updates": ["message"],
            });
            let updates = match self.call("getUpdates", &body).await {
                Ok(updates) => {
                    backoff = INITIAL_BACKOFF;
                    updates
                }
                Err(e @ ChannelError::Unauthorized { .. }) => {
                    let _ = tx.send(Err(e)).await;
                    break;
                }
                Err(e) => {
                    warn!(error = %e, retry_in = ?backoff, "Telegram poll failed");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    continue;
                }
            };

            let Some(updates) = updates.as_array() else {
                continue;
            };
            for update in updates {
                if let Some(id) = update.get("update_id").and_then(Value::as_i64) {
                    offset = offset.max(id + 1);
                }
                let Some(mut event) = parse_update(update) else {
                    continue;
                };
                event.bot_username = bot_username.clone();
                if tx.send(Ok(event)).await.is_err() {
                    return;
                }
            }
        }
        info!("Telegram polling stopped");
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<u16>,
}

impl ApiResponse {
    fn into_result(self, method: &str) -> Result<Value, ChannelError> {
        if self.ok {
            return Ok(self.result);
        }
        let reason = self.description.unwrap_or_else(|| "unknown error".into());
        Err(match self.error_code {
            Some(401) | Some(403) => ChannelError::Unauthorized {
                channel: "telegram".into(),
                sender_id: format!("{method}: {reason}"),
            },
            _ => ChannelError::DeliveryFailed {
                channel: "telegram".into(),
                reason: format!("{method}: {reason}"),
            },
        })
    }
}

/// Map one `getUpdates` entry to an inbound event.
///
/// Updates without a text message (joins, stickers, edits) yield `None`.
pub fn parse_update(update: &Value) -> Option<InboundEvent> {
    let message = update.get("message")?;
    let text = message.get("text")?.as_str()?;
    let chat = message.get("chat")?;
    let chat_id = chat.get("id")?.as_i64()?;
    let chat_kind = match chat.get("type").and_then(Value::as_str) {
        Some("private") => ChatKind::Private,
        _ => ChatKind::Group,
    };
    let from = message.get("from")?;
    let sender_id = from.get("id")?.as_i64()?;

    let mut event = InboundEvent::new(
        ConversationKey(chat_id.to_string()),
        Identity(sender_id.to_string()),
        chat_kind,
        text,
    );
    event.sender_name = from
        .get("username")
        .or_else(|| from.get("first_name"))
        .and_then(Value::as_str)
        .map(str::to_string);
    Some(event)
}

/// Cut `text` to the platform limit, marking the cut.
pub fn clamp_message(text: &str) -> String {
    if text.chars().count() <= MAX_MESSAGE_CHARS {
        return text.to_string();
    }
    let mut clamped: String = text.chars().take(MAX_MESSAGE_CHARS - 1).collect();
    clamped.push('…');
    clamped
}

fn is_not_modified(err: &ChannelError) -> bool {
    matches!(err, ChannelError::DeliveryFailed { reason, .. } if reason.contains("message is not modified"))
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<mpsc::Receiver<Result<InboundEvent, ChannelError>>, ChannelError> {
        if self.bot_token.is_empty() {
            return Err(ChannelError::NotConfigured("telegram bot token".into()));
        }
        let me = self.call("getMe", &json!({})).await?;
        let bot_username = me.get("username").and_then(Value::as_str).map(str::to_string);
        info!(bot = bot_username.as_deref().unwrap_or("?"), "Telegram transport starting");
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(self.clone().poll_loop(tx, bot_username));
        Ok(rx)
    }

    async fn deliver(&self, conversation: &ConversationKey, text: &str) -> Result<MessageHandle, ChannelError> {
        let body = json!({
            "chat_id": conversation.as_str(),
            "text": clamp_message(text),
        });
        let sent = self.call("sendMessage", &body).await?;
        let message_id = sent
            .get("message_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| ChannelError::InvalidPayload("sendMessage: missing message_id".into()))?;
        debug!(conversation = %conversation, message_id, "Delivered message");
        Ok(MessageHandle {
            conversation: conversation.clone(),
            message_id: message_id.to_string(),
        })
    }

    async fn edit(&self, handle: &MessageHandle, text: &str) -> Result<(), ChannelError> {
        let body = json!({
            "chat_id": handle.conversation.as_str(),
            "message_id": handle.message_id.parse::<i64>().unwrap_or_default(),
            "text": clamp_message(text),
        });
        match self.call("editMessageText", &body).await {
            Err(e) if is_not_modified(&e) => Ok(()),
            other => other.map(|_| ()),
        }
    }

    async fn send_typing(&self, conversation: &ConversationKey) -> Result<(), ChannelError> {
        let body = json!({ "chat_id": conversation.as_str(), "action": "typing" });
        self.call("sendChatAction", &body).await.map(|_| ())
    }
}
