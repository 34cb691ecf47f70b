//! Streamed reply delivery: one transport message, edited in place as the
//! answer arrives.

use clawdvc_core::channel::{ChatTransport, MessageHandle};
use clawdvc_core::message::ConversationKey;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::stream_event::AgentStreamEvent;

/// Text of the message delivered before the first delta.
pub const PLACEHOLDER: &str = "…";

/// Shown when a turn is abandoned before any text streamed.
pub const STOPPED: &str = "(stopped)";

pub struct ReplyWriter {
    transport: Arc<dyn ChatTransport>,
    conversation: ConversationKey,
    edit_interval: Duration,
    handle: Option<MessageHandle>,
    buffer: String,
    shown: String,
}

impl ReplyWriter {
    pub fn new(transport: Arc<dyn ChatTransport>, conversation: ConversationKey, edit_interval: Duration) -> Self {
        Self {
            transport,
            conversation,
            edit_interval,
            handle: None,
            buffer: String::new(),
            shown: String::new(),
        }
    }

    /// Deliver the placeholder message that later edits replace.
    pub async fn begin(&mut self) {
        let _ = self.transport.send_typing(&self.conversation).await;
        match self.transport.deliver(&self.conversation, PLACEHOLDER).await {
            Ok(handle) => {
                self.shown = PLACEHOLDER.to_string();
                self.handle = Some(handle);
            }
            Err(e) => warn!(conversation = %self.conversation, error = %e, "Placeholder delivery failed"),
        }
    }

    /// Consume turn events until the sender closes, editing the message at
    /// most once per edit interval.
    pub async fn pump(&mut self, mut events: mpsc::Receiver<AgentStreamEvent>) {
        let mut last_edit = Instant::now();
        while let Some(event) = events.recv().await {
            match event {
                AgentStreamEvent::Chunk { content } => {
                    self.buffer.push_str(&content);
                    if last_edit.elapsed() >= self.edit_interval {
                        self.show_buffer().await;
                        last_edit = Instant::now();
                    }
                }
                AgentStreamEvent::ToolCall { name, .. } => {
                    debug!(conversation = %self.conversation, tool = %name, "Tool call in progress");
                    let _ = self.transport.send_typing(&self.conversation).await;
                }
                AgentStreamEvent::ToolResult { .. } | AgentStreamEvent::Done { .. } => {}
                AgentStreamEvent::Error { message } => {
                    debug!(conversation = %self.conversation, error = %message, "Turn reported an error");
                }
            }
        }
    }

    /// Text streamed so far.
    pub fn streamed(&self) -> &str {
        &self.buffer
    }

    /// Replace the message with the final answer.
    pub async fn finish(&mut self, text: &str) {
        let text = if text.trim().is_empty() { STOPPED } else { text };
        self.show(text).await;
    }

    /// Finalize an abandoned turn with whatever streamed.
    pub async fn finish_partial(&mut self) {
        let text = if self.buffer.trim().is_empty() {
            STOPPED.to_string()
        } else {
            self.buffer.clone()
        };
        self.show(&text).await;
    }

    async fn show_buffer(&mut self) {
        if self.buffer.trim().is_empty() {
            return;
        }
        let text = self.buffer.clone();
        self.show(&text).await;
    }

    async fn show(&mut self, text: &str) {
        if self.shown == text {
            return;
        }
        if let Some(handle) = &self.handle {
            match self.transport.edit(handle, text).await {
                Ok(()) => {
                    self.shown = text.to_string();
                    return;
                }
                Err(e) => warn!(conversation = %self.conversation, error = %e, "Edit failed, sending a new message"),
            }
        }
        match self.transport.deliver(&self.conversation, text).await {
            Ok(handle) => {
                self.handle = Some(handle);
                self.shown = text.to_string();
            }
            Err(e) => warn!(conversation = %self.conversation, error = %e, "Reply delivery failed"),
        }
    }
}
