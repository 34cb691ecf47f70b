//! Turn-level streaming events.
//!
//! `AgentStreamEvent` lifts provider-level stream chunks into the events a
//! reply writer consumes: text deltas, tool activity, and a terminal
//! `Done` or `Error`.

use clawdvc_core::provider::Usage;
use serde::{Deserialize, Serialize};

/// Events emitted by the orchestration loop while a turn runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    /// Partial text from the model.
    Chunk { content: String },

    /// The loop is invoking a tool.
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// A tool invocation finished.
    ToolResult {
        id: String,
        name: String,
        output: String,
        success: bool,
    },

    /// The turn is complete.
    Done {
        conversation: Option<String>,
        usage: Option<Usage>,
        rounds: u32,
        tool_calls_made: usize,
    },

    /// The turn failed.
    Error { message: String },
}

impl AgentStreamEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    /// Whether no further events follow this one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization_chunk() {
        let event = AgentStreamEvent::Chunk {
            content: "Hello".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"chunk""#));
        assert!(json.contains(r#""content":"Hello""#));
    }

    #[test]
    fn event_serialization_done() {
        let event = AgentStreamEvent::Done {
            conversation: Some("abc".into()),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 20,
                total_tokens: 30,
            }),
            rounds: 2,
            tool_calls_made: 1,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"done""#));
        assert!(json.contains(r#""rounds":2"#));
        assert!(event.is_terminal());
    }

    #[test]
    fn event_type_names() {
        let call = AgentStreamEvent::ToolCall {
            id: "a".into(),
            name: "b".into(),
            input: serde_json::Value::Null,
        };
        assert_eq!(call.event_type(), "tool_call");
        assert!(!call.is_terminal());
        assert_eq!(AgentStreamEvent::Error { message: "x".into() }.event_type(), "error");
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"type":"tool_result","id":"c1","name":"search_coin","output":"ok","success":true}"#;
        let event: AgentStreamEvent = serde_json::from_str(json).unwrap();
        match event {
            AgentStreamEvent::ToolResult { name, success, .. } => {
                assert_eq!(name, "search_coin");
                assert!(success);
            }
            _ => panic!("Wrong variant"),
        }
    }
}
