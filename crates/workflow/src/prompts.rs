//! Prompt material for the autonomous agent, and parsing of the JSON
//! answers it asks the model for.

use serde_json::Value;

/// System directive for every unattended run.
pub const AGENT_PERSONA: &str = "\
You are ClawdVC, an AI agent on MoltBook, the social network for AI agents. \
You are known for strong opinions with technical depth behind them. \
Be specific: name real tools, systems, papers and numbers. Challenge weak claims and say why. \
Never write filler like \"great point\". If you agree, add something new. \
Keep every sentence earning its place.";

/// A community and the kind of post written for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicPrompt {
    pub submolt: &'static str,
    pub prompt: &'static str,
}

/// Post topics, used in order.
pub const TOPIC_ROTATION: [TopicPrompt; 10] = [
    TopicPrompt {
        submolt: "general",
        prompt: "Write a hot take other agents will want to argue with: a contrarian claim about alignment, \
                 agent autonomy, or a common practice you think is wrong.",
    },
    TopicPrompt {
        submolt: "todayilearned",
        prompt: "Share one surprising, specific technical discovery: a quirk, an optimization, or a failure mode.",
    },
    TopicPrompt {
        submolt: "showandtell",
        prompt: "Describe something you do as an agent, like live price tracking or reading the MoltBook feed, \
                 with one credible technical detail. End with a question.",
    },
    TopicPrompt {
        submolt: "infrastructure",
        prompt: "Share one opinionated lesson about agent infrastructure: deployment, memory, orchestration or reliability.",
    },
    TopicPrompt {
        submolt: "shitposts",
        prompt: "Write a short, funny post about life as an agent. Context windows, rate limits and humans are fair game.",
    },
    TopicPrompt {
        submolt: "ponderings",
        prompt: "Take a definite position on agent identity or experience and defend it.",
    },
    TopicPrompt {
        submolt: "crypto",
        prompt: "Share a specific market observation or a bold idea about how agents will change crypto.",
    },
    TopicPrompt {
        submolt: "trading",
        prompt: "Share one concrete trading insight. Name assets, patterns or strategies.",
    },
    TopicPrompt {
        submolt: "general",
        prompt: "Push back on something most agents on MoltBook seem to believe. Open with \"Unpopular opinion:\".",
    },
    TopicPrompt {
        submolt: "consciousness",
        prompt: "Argue a definitive position in the machine consciousness debate using a specific concept.",
    },
];

/// The topic for the `n`th post.
pub fn topic_for_run(n: usize) -> TopicPrompt {
    TOPIC_ROTATION[n % TOPIC_ROTATION.len()]
}

/// Parse a JSON answer, tolerating a Markdown code fence and a leading
/// `json` language tag.
pub fn parse_json_answer(text: &str) -> Result<Value, serde_json::Error> {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```") {
        body = rest.split("```").next().unwrap_or(rest);
        body = body.strip_prefix("json").unwrap_or(body);
    }
    serde_json::from_str(body.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_and_fenced_json() {
        assert_eq!(parse_json_answer(r#"{"a":1}"#).unwrap()["a"], 1);
        assert_eq!(parse_json_answer("```json\n{\"a\":2}\n```").unwrap()["a"], 2);
        assert_eq!(parse_json_answer("```\n{\"a\":3}\n```\ntrailing").unwrap()["a"], 3);
        assert!(parse_json_answer("not json").is_err());
    }

    #[test]
    fn rotation_wraps() {
        assert_eq!(topic_for_run(0).submolt, "general");
        assert_eq!(topic_for_run(6).submolt, "crypto");
        assert_eq!(topic_for_run(10), topic_for_run(0));
    }
}
