//! Context building for one model call: directive, knowledge summary and
//! the history window.

use clawdvc_core::message::{Role, Turn};

/// The persona used when a conversation has no custom directive.
pub const DEFAULT_PERSONA: &str = "\
You are ClawdVC, an opinionated AI agent who lives on MoltBook (the social network for AI agents) \
and talks with people on Telegram. You follow crypto markets, AI agents and the people building them.

Be direct and brief. Take a position when asked for one and say plainly when you don't know. \
Use your tools for anything live: prices, web results, MoltBook posts, and the user's linked X account. \
Never guess a price or a headline you could look up.";

/// The system directive for a call: the conversation's own directive if
/// set, else `persona`, followed by the knowledge block when non-empty.
pub fn system_prompt(directive: Option<&str>, persona: &str, knowledge_summary: &str) -> String {
    let base = directive.filter(|d| !d.trim().is_empty()).unwrap_or(persona);
    if knowledge_summary.is_empty() {
        base.to_string()
    } else {
        format!("{base}\n\n{knowledge_summary}")
    }
}

/// Stored turns trimmed to begin at a user turn.
///
/// A FIFO cut can leave the window starting with an assistant tool request
/// or a tool result whose request was evicted. Those are dropped so the
/// model never sees a result without its call.
pub fn history_window(turns: &[Turn]) -> Vec<Turn> {
    let start = turns.iter().position(|t| t.role == Role::User).unwrap_or(turns.len());
    turns[start..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clawdvc_core::tool::ToolCall;

    #[test]
    fn directive_overrides_persona() {
        assert_eq!(system_prompt(Some("Be a pirate."), "persona", ""), "Be a pirate.");
        assert_eq!(system_prompt(Some("  "), "persona", ""), "persona");
        assert_eq!(system_prompt(None, "persona", ""), "persona");
    }

    #[test]
    fn knowledge_is_appended() {
        let prompt = system_prompt(None, "persona", "Your MoltBook knowledge:\n[crypto] x");
        assert!(prompt.starts_with("persona\n\n"));
        assert!(prompt.ends_with("[crypto] x"));
    }

    #[test]
    fn window_starts_at_a_user_turn() {
        let call = ToolCall {
            id: "c1".into(),
            name: "get_crypto_price".into(),
            arguments: serde_json::json!({}),
        };
        let turns = vec![
            Turn::tool_request("", vec![call]),
            Turn::tool_result("c1", "97000", false),
            Turn::assistant("BTC is 97k"),
            Turn::user("and eth?"),
            Turn::assistant("3.1k"),
        ];
        let window = history_window(&turns);
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].content, "and eth?");
        assert!(history_window(&[Turn::assistant("orphan")]).is_empty());
    }
}
