//! Chat transports for ClawdVC.
//!
//! Each transport connects the dispatcher to a chat surface:
//! - **Telegram**: Bot API long polling, replies edited in place as they stream
//! - **Terminal**: a single private conversation over stdin/stdout

pub mod telegram;
pub mod terminal;

pub use telegram::TelegramTransport;
pub use terminal::TerminalTransport;
