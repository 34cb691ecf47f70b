//! Terminal transport: one private conversation over stdin/stdout.
//!
//! Used by `clawdvc chat`. Streaming edits are rendered by printing only
//! the text appended since the last render, so the reply grows in place.

use async_trait::async_trait;
use clawdvc_core::channel::{ChatKind, ChatTransport, InboundEvent, MessageHandle};
use clawdvc_core::error::ChannelError;
use clawdvc_core::message::{ConversationKey, Identity};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

pub const TERMINAL_CONVERSATION: &str = "terminal";
pub const TERMINAL_USER: &str = "local_user";

#[derive(Default)]
struct Rendered {
    next_id: u64,
    /// Text already on screen, per message
    shown: HashMap<String, String>,
}

/// Interactive terminal transport.
#[derive(Default)]
pub struct TerminalTransport {
    rendered: Mutex<Rendered>,
}

impl TerminalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// The conversation every terminal event belongs to.
    pub fn conversation() -> ConversationKey {
        ConversationKey::from(TERMINAL_CONVERSATION)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Rendered> {
        self.rendered.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// What to print to move the screen from `shown` to `next`.
///
/// Appends print the new suffix; anything else reprints the whole text on
/// a fresh line.
pub fn render_edit(shown: &str, next: &str) -> String {
    match next.strip_prefix(shown) {
        Some(suffix) => suffix.to_string(),
        None => format!("\n{next}"),
    }
}

fn print_flush(text: &str) {
    let mut out = std::io::stdout().lock();
    let _ = out.write_all(text.as_bytes());
    let _ = out.flush();
}

fn is_exit(line: &str) -> bool {
    matches!(line, "exit" | "quit" | "/exit" | "/quit" | ":q")
}

#[async_trait]
impl ChatTransport for TerminalTransport {
    fn name(&self) -> &str {
        "terminal"
    }

    async fn start(&self) -> Result<mpsc::Receiver<Result<InboundEvent, ChannelError>>, ChannelError> {
        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let mut lines = BufReader::new(io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        if is_exit(line) {
                            break;
                        }
                        let mut event = InboundEvent::new(
                            TerminalTransport::conversation(),
                            Identity::from(TERMINAL_USER),
                            ChatKind::Private,
                            line,
                        );
                        event.sender_name = Some("You".into());
                        if tx.send(Ok(event)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(Err(ChannelError::ConnectionLost(e.to_string()))).await;
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn deliver(&self, conversation: &ConversationKey, text: &str) -> Result<MessageHandle, ChannelError> {
        let message_id = {
            let mut rendered = self.lock();
            rendered.next_id += 1;
            let id = rendered.next_id.to_string();
            rendered.shown.insert(id.clone(), text.to_string());
            id
        };
        print_flush(&format!("\n{text}"));
        Ok(MessageHandle {
            conversation: conversation.clone(),
            message_id,
        })
    }

    async fn edit(&self, handle: &MessageHandle, text: &str) -> Result<(), ChannelError> {
        let output = {
            let mut rendered = self.lock();
            let shown = rendered.shown.entry(handle.message_id.clone()).or_default();
            let output = render_edit(shown, text);
            *shown = text.to_string();
            output
        };
        print_flush(&output);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_print_only_the_suffix() {
        assert_eq!(render_edit("Hello", "Hello, world"), ", world");
        assert_eq!(render_edit("", "Hi"), "Hi");
    }

    #[test]
    fn rewrites_reprint_everything() {
        assert_eq!(render_edit("…", "Bitcoin is up"), "\nBitcoin is up");
    }

    #[test]
    fn exit_words() {
        assert!(is_exit("/quit"));
        assert!(is_exit(":q"));
        assert!(!is_exit("quit smoking"));
    }

    #[tokio::test]
    async fn edits_track_what_is_on_screen() {
        let transport = TerminalTransport::new();
        let handle = transport.deliver(&TerminalTransport::conversation(), "…").await.unwrap();
        transport.edit(&handle, "partial").await.unwrap();
        transport.edit(&handle, "partial answer").await.unwrap();
        assert_eq!(transport.lock().shown[&handle.message_id], "partial answer");

        let second = transport.deliver(&TerminalTransport::conversation(), "next").await.unwrap();
        assert_ne!(second.message_id, handle.message_id);
    }
}
