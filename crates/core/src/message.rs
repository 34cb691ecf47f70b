//! Turn and Conversation domain types.
//!
//! These are the value objects that flow through the interactive path:
//! transport receives an event → dispatcher loads the Conversation →
//! orchestration loop produces new Turns → history store commits them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tool::ToolCall;

/// Identifies one chat context (a private chat, a group, the terminal session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationKey(pub String);

impl ConversationKey {
    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The requester behind an event (a platform user id, or the bot itself).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity(pub String);

impl Identity {
    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }

    /// The identity the autonomous agent acts under.
    pub fn agent() -> Self {
        Self("agent:self".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a turn in a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The end user
    User,
    /// The model
    Assistant,
    /// Output of a tool invocation, fed back to the model
    ToolResult,
}

/// One message-equivalent unit of a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,

    /// The text content
    pub content: String,

    /// Tool calls requested by the assistant in this turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// For tool-result turns, the call this answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// For tool-result turns, whether the invocation failed
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,

    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content.into())
    }

    /// An assistant turn that requests tool invocations.
    pub fn tool_request(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Assistant, content.into())
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            is_error,
            ..Self::new(Role::ToolResult, content.into())
        }
    }

    fn new(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            is_error: false,
            timestamp: Utc::now(),
        }
    }
}

/// Persistent per-conversation state.
///
/// `turns` never holds more than the configured cap once a write has gone
/// through [`Conversation::push_capped`]. The directive lives outside the
/// turn sequence and is never evicted by the cap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub key: ConversationKey,

    /// Ordered turns, most recent last
    #[serde(default)]
    pub turns: Vec<Turn>,

    /// Custom directive overriding the default persona
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directive: Option<String>,

    pub last_activity: DateTime<Utc>,
}

impl Conversation {
    pub fn new(key: ConversationKey) -> Self {
        Self {
            key,
            turns: Vec::new(),
            directive: None,
            last_activity: Utc::now(),
        }
    }

    /// Append turns, evicting the oldest until at most `cap` remain.
    pub fn push_capped(&mut self, turns: impl IntoIterator<Item = Turn>, cap: usize) {
        self.turns.extend(turns);
        if self.turns.len() > cap {
            let excess = self.turns.len() - cap;
            self.turns.drain(..excess);
        }
        self.last_activity = Utc::now();
    }

    /// Drop all turns and restore the default directive.
    pub fn reset(&mut self) {
        self.turns.clear();
        self.directive = None;
        self.last_activity = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_capped_keeps_most_recent() {
        let mut conv = Conversation::new(ConversationKey::from("c1"));
        conv.push_capped([Turn::user("A"), Turn::assistant("B"), Turn::user("C")], 2);
        let contents: Vec<_> = conv.turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["B", "C"]);
    }

    #[test]
    fn reset_clears_directive_too() {
        let mut conv = Conversation::new(ConversationKey::from("c1"));
        conv.directive = Some("be terse".into());
        conv.push_capped([Turn::user("hi")], 10);
        conv.reset();
        assert!(conv.turns.is_empty());
        assert!(conv.directive.is_none());
    }

    #[test]
    fn tool_result_turn_serialization() {
        let turn = Turn::tool_result("call_1", "price: 1", true);
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["role"], "tool_result");
        assert_eq!(json["is_error"], true);

        let plain = serde_json::to_value(Turn::user("hi")).unwrap();
        assert!(plain.get("is_error").is_none());
        assert!(plain.get("tool_calls").is_none());
    }
}
