//! Inbound text → dispatcher command.

use clawdvc_core::channel::InboundEvent;

pub const HELP_TEXT: &str = "\
I'm ClawdVC. Talk to me in a private chat, or use:
/q <question> ask me anything (works in groups)
/price <coin[,coin...]> live prices
/knowledge [query] what I've learned on MoltBook
/connect_x <auth_token> <ct0> link your X account (private chat)
/disconnect_x unlink your X account
/system <text> set my instructions for this chat (empty resets)
/reset clear this conversation";

pub const SLOW_DOWN: &str = "Slow down a little, try again in a minute.";
pub const APOLOGY: &str = "Something went wrong. Please try again.";
pub const UNKNOWN_HINT: &str = "Unknown command. Try /help.";
pub const ADMIN_ONLY: &str = "That command is for admins.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Reset,
    /// Empty text restores the default directive
    System(String),
    Ask(String),
    Price(String),
    Knowledge(String),
    ConnectX { auth_token: String, ct0: String },
    /// `/connect_x` with missing arguments
    ConnectXUsage,
    DisconnectX,
    Stats,
    Post(String),
    News(String),
    Unknown(String),
    /// Free text
    Chat(String),
}

impl Command {
    /// Group free text is not addressed to the bot.
    pub fn is_ignored_in_group(&self) -> bool {
        matches!(self, Command::Chat(_))
    }

    /// `raw` with any cookie arguments masked, for events and logs.
    pub fn loggable<'a>(&self, raw: &'a str) -> &'a str {
        match self {
            Command::ConnectX { .. } | Command::ConnectXUsage => "/connect_x [REDACTED]",
            _ => raw,
        }
    }

    pub fn parse(event: &InboundEvent) -> Self {
        let Some((name, args)) = event.command() else {
            return Command::Chat(event.text.trim().to_string());
        };
        let args = args.to_string();
        match name.to_ascii_lowercase().as_str() {
            "start" | "help" => Command::Help,
            "reset" => Command::Reset,
            "system" => Command::System(args),
            "q" | "ask" => Command::Ask(args),
            "price" => Command::Price(args),
            "knowledge" => Command::Knowledge(args),
            "connect_x" => {
                let mut parts = args.split_whitespace();
                match (parts.next(), parts.next()) {
                    (Some(auth_token), Some(ct0)) => Command::ConnectX {
                        auth_token: auth_token.to_string(),
                        ct0: ct0.to_string(),
                    },
                    _ => Command::ConnectXUsage,
                }
            }
            "disconnect_x" => Command::DisconnectX,
            "stats" => Command::Stats,
            "post" => Command::Post(args),
            "news" => Command::News(args),
            other => Command::Unknown(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clawdvc_core::channel::ChatKind;
    use clawdvc_core::message::{ConversationKey, Identity};

    fn parse(text: &str) -> Command {
        Command::parse(&InboundEvent::new(
            ConversationKey::from("c"),
            Identity::from("u"),
            ChatKind::Private,
            text,
        ))
    }

    #[test]
    fn parses_commands() {
        assert_eq!(parse("/start"), Command::Help);
        assert_eq!(parse("/reset@clawdvc_bot"), Command::Reset);
        assert_eq!(parse("/q what is btc doing?"), Command::Ask("what is btc doing?".into()));
        assert_eq!(parse("/price bitcoin,eth"), Command::Price("bitcoin,eth".into()));
        assert_eq!(parse("/knowledge"), Command::Knowledge(String::new()));
        assert_eq!(parse("/system"), Command::System(String::new()));
        assert_eq!(parse("/frobnicate"), Command::Unknown("frobnicate".into()));
        assert_eq!(parse("  hello  "), Command::Chat("hello".into()));
    }

    #[test]
    fn connect_x_needs_both_cookies() {
        assert_eq!(
            parse("/connect_x aaa bbb"),
            Command::ConnectX {
                auth_token: "aaa".into(),
                ct0: "bbb".into()
            }
        );
        assert_eq!(parse("/connect_x aaa"), Command::ConnectXUsage);
    }

    #[test]
    fn cookies_are_masked_for_logs() {
        let raw = "/connect_x secret_token secret_ct0";
        assert_eq!(parse(raw).loggable(raw), "/connect_x [REDACTED]");
        assert_eq!(parse("/connect_x half").loggable("/connect_x half"), "/connect_x [REDACTED]");
        assert_eq!(parse("/price btc").loggable("/price btc"), "/price btc");
    }
}
