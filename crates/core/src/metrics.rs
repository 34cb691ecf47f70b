//! Growth metrics — one ledger row per scheduled action execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The recurring (and one-time) actions of the autonomous agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    StartupSetup,
    LearnAndBrowse,
    Engage,
    CreatePost,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::StartupSetup => "startup_setup",
            ActionKind::LearnAndBrowse => "learn_and_browse",
            ActionKind::Engage => "engage",
            ActionKind::CreatePost => "create_post",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "startup" | "startup_setup" | "setup" => Ok(ActionKind::StartupSetup),
            "learn" | "learn_and_browse" | "browse" => Ok(ActionKind::LearnAndBrowse),
            "engage" => Ok(ActionKind::Engage),
            "post" | "create_post" => Ok(ActionKind::CreatePost),
            other => Err(format!("unknown action kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    Skipped,
}

/// Counter names recorded on ledger rows.
pub mod counters {
    pub const TOPICS_LEARNED: &str = "topics_learned";
    pub const WEB_ITEMS_LEARNED: &str = "web_items_learned";
    pub const UPVOTES: &str = "upvotes";
    pub const COMMENTS_MADE: &str = "comments_made";
    pub const FOLLOWS: &str = "follows";
    pub const POSTS_MADE: &str = "posts_made";
    pub const SUBSCRIPTIONS: &str = "subscriptions";
}

/// An append-only ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthMetric {
    pub kind: ActionKind,
    pub outcome: Outcome,
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub duration_ms: u64,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub counters: BTreeMap<String, u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GrowthMetric {
    pub fn new(kind: ActionKind, outcome: Outcome) -> Self {
        Self {
            kind,
            outcome,
            timestamp: Utc::now(),
            duration_ms: 0,
            counters: BTreeMap::new(),
            error: None,
        }
    }

    pub fn success(kind: ActionKind, counters: BTreeMap<String, u64>) -> Self {
        Self {
            counters,
            ..Self::new(kind, Outcome::Success)
        }
    }

    pub fn failure(kind: ActionKind, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(kind, Outcome::Failure)
        }
    }

    pub fn skipped(kind: ActionKind, reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::new(kind, Outcome::Skipped)
        }
    }

    pub fn with_duration(mut self, duration: std::time::Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_kind_parses_aliases() {
        assert_eq!("learn".parse::<ActionKind>().unwrap(), ActionKind::LearnAndBrowse);
        assert_eq!("post".parse::<ActionKind>().unwrap(), ActionKind::CreatePost);
        assert!("dance".parse::<ActionKind>().is_err());
    }

    #[test]
    fn metric_row_serializes_compactly() {
        let row = GrowthMetric::failure(ActionKind::Engage, "model down");
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["kind"], "engage");
        assert_eq!(json["outcome"], "failure");
        assert!(json.get("counters").is_none());
        assert_eq!(row.counter(counters::UPVOTES), 0);
    }
}
