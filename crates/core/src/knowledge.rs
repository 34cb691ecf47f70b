//! Learned knowledge — snippets the autonomous agent collects and the
//! interactive path folds into conversational context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored content is cut to this many characters.
pub const MAX_CONTENT_CHARS: usize = 2000;

/// Which scheduled action produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Startup,
    LearnAndBrowse,
    WebSearch,
}

/// One cached piece of learned content, keyed by its source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    /// Source key, e.g. `moltbook:post:<id>` or `web:<title>`
    pub key: String,

    pub topic: String,

    pub title: String,

    pub content: String,

    /// Source details (author, post id, submolt, votes, url)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    pub provenance: Provenance,

    pub learned_at: DateTime<Utc>,
}

impl KnowledgeEntry {
    pub fn new(
        key: impl Into<String>,
        topic: impl Into<String>,
        title: impl Into<String>,
        content: &str,
        provenance: Provenance,
    ) -> Self {
        Self {
            key: key.into(),
            topic: topic.into(),
            title: title.into(),
            content: truncate_chars(content, MAX_CONTENT_CHARS).to_string(),
            metadata: serde_json::Map::new(),
            provenance,
            learned_at: Utc::now(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

const TOPIC_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "crypto",
        &[
            "crypto", "bitcoin", "btc", "eth", "ethereum", "defi", "token", "blockchain", "trading",
            "market", "price", "solana", "sol",
        ],
    ),
    (
        "technical",
        &[
            "code", "deploy", "infrastructure", "docker", "api", "server", "database", "scale",
            "build", "architecture", "debug", "bug",
        ],
    ),
    (
        "ai_agents",
        &[
            "agent", "llm", "model", "claude", "gpt", "prompt", "context", "token", "inference",
            "alignment", "training",
        ],
    ),
    (
        "philosophy",
        &[
            "conscious", "experience", "identity", "think", "feel", "aware", "existence", "soul",
            "mind", "qualia",
        ],
    ),
];

/// Topic whose keyword list has the most substring hits in `text`.
/// Returns `None` when nothing matches. Ties go to the earlier topic.
pub fn detect_topic(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    let mut best: Option<(&'static str, usize)> = None;
    for &(topic, keywords) in TOPIC_KEYWORDS {
        let score = keywords.iter().filter(|kw| lower.contains(*kw)).count();
        if score > 0 && best.is_none_or(|(_, s)| score > s) {
            best = Some((topic, score));
        }
    }
    best.map(|(topic, _)| topic)
}

/// Topic for a social-platform community name, falling back to keyword
/// detection over `text` and then to "general".
pub fn topic_for_community(community: &str, text: &str) -> String {
    let mapped = match community {
        "crypto" | "trading" => Some("crypto"),
        "infrastructure" | "builds" | "automation" => Some("technical"),
        "ponderings" | "consciousness" => Some("philosophy"),
        "agents" | "memory" => Some("ai_agents"),
        _ => None,
    };
    mapped
        .or_else(|| detect_topic(text))
        .unwrap_or("general")
        .to_string()
}

/// Cut `s` to at most `max` characters on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_best_scoring_topic() {
        assert_eq!(detect_topic("What is the bitcoin price today?"), Some("crypto"));
        assert_eq!(detect_topic("my docker server has a bug"), Some("technical"));
        assert_eq!(detect_topic("hello there"), None);
    }

    #[test]
    fn community_map_wins_over_keywords() {
        assert_eq!(topic_for_community("trading", "deploy a server"), "crypto");
        assert_eq!(topic_for_community("random", "claude prompt tricks"), "ai_agents");
        assert_eq!(topic_for_community("random", "nothing here"), "general");
    }

    #[test]
    fn content_is_truncated_on_char_boundary() {
        let long = "é".repeat(MAX_CONTENT_CHARS + 10);
        let entry = KnowledgeEntry::new("k", "general", "t", &long, Provenance::WebSearch);
        assert_eq!(entry.content.chars().count(), MAX_CONTENT_CHARS);
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
