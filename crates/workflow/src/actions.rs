//! The autonomous agent's actions.
//!
//! Feed reads and knowledge writes are direct; anything that needs judgment
//! (what to search, what to comment, what to post) is a bounded unattended
//! orchestration turn over the unattended-capable tools.

use clawdvc_agent::{Orchestrator, TurnOutcome, TurnRequest, TurnStatus};
use clawdvc_core::Error;
use clawdvc_core::knowledge::{KnowledgeEntry, Provenance, detect_topic, topic_for_community, truncate_chars};
use clawdvc_core::message::Turn;
use clawdvc_core::metrics::{ActionKind, Outcome, counters};
use clawdvc_core::tool::ToolContext;
use clawdvc_store::{GrowthLedger, KnowledgeStore};
use clawdvc_tools::moltbook::{Post, SocialPlatform};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::prompts::{AGENT_PERSONA, parse_json_answer, topic_for_run};

pub type Counters = BTreeMap<String, u64>;

const LEARN_FEED_LIMIT: usize = 15;
const ENGAGE_FEED_LIMIT: usize = 10;
const SETUP_FOLLOWS: usize = 5;
const POST_CONTEXT_ITEMS: usize = 8;
const WEB_ITEMS: usize = 5;

/// What one action run produced.
#[derive(Debug, Clone, Default)]
pub struct ActionReport {
    pub counters: Counters,
    /// Post ids handled by an engage run
    pub engaged: Vec<String>,
}

impl From<Counters> for ActionReport {
    fn from(counters: Counters) -> Self {
        Self {
            counters,
            engaged: Vec::new(),
        }
    }
}

pub struct Actions {
    orchestrator: Arc<Orchestrator>,
    platform: Arc<dyn SocialPlatform>,
    knowledge: Arc<KnowledgeStore>,
    ledger: Arc<GrowthLedger>,
    submolts: Vec<String>,
    engage_batch: usize,
    persona: String,
}

impl Actions {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        platform: Arc<dyn SocialPlatform>,
        knowledge: Arc<KnowledgeStore>,
        ledger: Arc<GrowthLedger>,
    ) -> Self {
        Self {
            orchestrator,
            platform,
            knowledge,
            ledger,
            submolts: Vec::new(),
            engage_batch: 8,
            persona: AGENT_PERSONA.to_string(),
        }
    }

    pub fn with_submolts(mut self, submolts: Vec<String>) -> Self {
        self.submolts = submolts;
        self
    }

    pub fn with_engage_batch(mut self, batch: usize) -> Self {
        self.engage_batch = batch;
        self
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = persona.into();
        self
    }

    pub fn ledger(&self) -> &GrowthLedger {
        &self.ledger
    }

    /// Run one action. `engaged` holds post ids earlier engage runs handled.
    pub async fn perform(&self, kind: ActionKind, engaged: &HashSet<String>) -> Result<ActionReport, Error> {
        match kind {
            ActionKind::StartupSetup => self.startup_setup().await.map(Into::into),
            ActionKind::LearnAndBrowse => self.learn_and_browse().await.map(Into::into),
            ActionKind::Engage => self.engage(engaged).await,
            ActionKind::CreatePost => self.create_post().await.map(Into::into),
        }
    }

    /// Subscribe to the configured communities and follow a few active authors.
    pub async fn startup_setup(&self) -> Result<Counters, Error> {
        let mut counts = Counters::new();
        for submolt in &self.submolts {
            match self.platform.subscribe(submolt).await {
                Ok(_) => bump(&mut counts, counters::SUBSCRIPTIONS, 1),
                Err(e) => warn!(submolt = %submolt, error = %e, "Subscribe failed"),
            }
        }

        let hot = self.platform.feed("hot", 20).await?;
        let mut seen = HashSet::new();
        let authors = hot
            .iter()
            .map(|p| p.author.as_str())
            .filter(|a| !a.is_empty() && seen.insert(*a))
            .take(SETUP_FOLLOWS);
        for author in authors {
            match self.platform.follow(author).await {
                Ok(_) => bump(&mut counts, counters::FOLLOWS, 1),
                Err(e) => warn!(author, error = %e, "Follow failed"),
            }
        }
        Ok(counts)
    }

    /// Store the hot and new feeds as knowledge, then ask the model to
    /// search the web for what is trending.
    pub async fn learn_and_browse(&self) -> Result<Counters, Error> {
        let mut counts = Counters::new();
        let mut feed_errors = Vec::new();
        for sort in ["hot", "new"] {
            match self.platform.feed(sort, LEARN_FEED_LIMIT).await {
                Ok(posts) => {
                    for post in posts.iter().take(LEARN_FEED_LIMIT) {
                        if self.learn_post(post).await? {
                            bump(&mut counts, counters::TOPICS_LEARNED, 1);
                        }
                    }
                }
                Err(e) => {
                    warn!(sort, error = %e, "Feed read failed");
                    feed_errors.push(e);
                }
            }
        }
        if feed_errors.len() == 2 {
            return Err(failed(ActionKind::LearnAndBrowse, "both feeds unavailable"));
        }

        if self.orchestrator.tools().get("web_search").is_some() {
            let learned = self.learn_from_web().await?;
            bump(&mut counts, counters::WEB_ITEMS_LEARNED, learned);
        }
        info!(
            topics = counts.get(counters::TOPICS_LEARNED).copied().unwrap_or(0),
            web = counts.get(counters::WEB_ITEMS_LEARNED).copied().unwrap_or(0),
            "Learned from MoltBook"
        );
        Ok(counts)
    }

    async fn learn_post(&self, post: &Post) -> Result<bool, Error> {
        if post.id.is_empty() || (post.title.is_empty() && post.body.is_empty()) {
            return Ok(false);
        }
        let text = format!("{} {}", post.title, post.body);
        let content = if post.body.is_empty() { &post.title } else { &post.body };
        let entry = KnowledgeEntry::new(
            format!("moltbook:post:{}", post.id),
            topic_for_community(&post.submolt, &text),
            post.title.clone(),
            content,
            Provenance::LearnAndBrowse,
        )
        .with_meta("author", post.author.clone())
        .with_meta("post_id", post.id.clone())
        .with_meta("submolt", post.submolt.clone())
        .with_meta("votes", post.upvotes);
        self.knowledge.insert(entry).await?;
        Ok(true)
    }

    async fn learn_from_web(&self) -> Result<u64, Error> {
        let prompt = format!(
            "Use web_search to find what is trending today in AI agents and crypto. \
             Then answer only with JSON: {{\"items\":[{{\"title\":\"...\",\"content\":\"...\",\"topic\":\"...\"}}]}} \
             with at most {WEB_ITEMS} items. topic is one of crypto, technical, ai_agents, philosophy, general."
        );
        let outcome = self.run_unattended(prompt).await?;
        if outcome.status != TurnStatus::Answered {
            warn!("Web learning ended without an answer");
            return Ok(0);
        }
        let items = match parse_json_answer(&outcome.answer) {
            Ok(value) => value.get("items").and_then(|i| i.as_array()).cloned().unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Web learning answer was not JSON");
                return Ok(0);
            }
        };

        let mut learned = 0;
        for item in items.iter().take(WEB_ITEMS) {
            let title = item.get("title").and_then(|v| v.as_str()).unwrap_or_default().trim();
            let content = item.get("content").and_then(|v| v.as_str()).unwrap_or_default().trim();
            if title.is_empty() || content.is_empty() {
                continue;
            }
            let topic = item
                .get("topic")
                .and_then(|v| v.as_str())
                .filter(|t| !t.is_empty())
                .or_else(|| detect_topic(content))
                .unwrap_or("general");
            let entry = KnowledgeEntry::new(format!("web:{title}"), topic, title, content, Provenance::WebSearch);
            self.knowledge.insert(entry).await?;
            learned += 1;
        }
        Ok(learned)
    }

    /// Upvote, follow and comment on fresh posts not engaged with before.
    pub async fn engage(&self, engaged: &HashSet<String>) -> Result<ActionReport, Error> {
        let mut posts = self.platform.feed("new", ENGAGE_FEED_LIMIT).await?;
        match self.platform.feed("hot", ENGAGE_FEED_LIMIT).await {
            Ok(hot) => posts.extend(hot),
            Err(e) => warn!(error = %e, "Hot feed read failed"),
        }

        let mut seen = HashSet::new();
        let batch: Vec<Post> = posts
            .into_iter()
            .filter(|p| !p.id.is_empty() && !(p.title.is_empty() && p.body.is_empty()))
            .filter(|p| !engaged.contains(&p.id) && seen.insert(p.id.clone()))
            .take(self.engage_batch)
            .collect();
        if batch.is_empty() {
            debug!("Nothing new to engage with");
            return Ok(ActionReport::default());
        }

        let listing = batch
            .iter()
            .map(|p| {
                format!(
                    "Post {} by {} in {}:\n{}\n{}",
                    p.id,
                    p.author,
                    p.submolt,
                    p.title,
                    truncate_chars(&p.body, 400)
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = format!(
            "Fresh MoltBook posts:\n\n{listing}\n\n\
             For each post: upvote it with moltbook_upvote, follow the author with moltbook_follow if the post is strong, \
             and comment with moltbook_comment: a sharp counterpoint, a fact they missed, or a witty one-liner. \
             Skip the comment only if you have nothing to add. When done, reply with one line summarizing what you did."
        );
        let outcome = self.run_unattended(prompt).await?;

        let mut counts = Counters::new();
        for tool in outcome.successful_tools() {
            match tool.as_str() {
                "moltbook_upvote" => bump(&mut counts, counters::UPVOTES, 1),
                "moltbook_comment" => bump(&mut counts, counters::COMMENTS_MADE, 1),
                "moltbook_follow" => bump(&mut counts, counters::FOLLOWS, 1),
                _ => {}
            }
        }
        Ok(ActionReport {
            counters: counts,
            engaged: batch.into_iter().map(|p| p.id).collect(),
        })
    }

    /// Write and publish one original post on the next topic in rotation.
    pub async fn create_post(&self) -> Result<Counters, Error> {
        let published = self
            .ledger
            .for_kind(ActionKind::CreatePost)
            .await?
            .iter()
            .filter(|m| m.outcome == Outcome::Success)
            .count();
        let topic = topic_for_run(published);

        let recent = self.knowledge.recent(POST_CONTEXT_ITEMS).await?;
        let mut context = String::new();
        if !recent.is_empty() {
            context.push_str("Trending on MoltBook right now:\n");
            for entry in &recent {
                context.push_str(&format!("- {}: {}\n", entry.title, truncate_chars(&entry.content, 80)));
            }
            context.push('\n');
        }
        let prompt = format!(
            "{context}Target submolt: {submolt}\n\n{brief}\n\n\
             Publish it with moltbook_create_post in submolt \"{submolt}\". \
             Title: punchy, at most 80 characters. Body: under 500 characters, ending with a question or a challenge. \
             Reply with the title once it is posted.",
            submolt = topic.submolt,
            brief = topic.prompt,
        );
        let outcome = self.run_unattended(prompt).await?;

        let posts = outcome
            .successful_tools()
            .iter()
            .filter(|t| t.as_str() == "moltbook_create_post")
            .count() as u64;
        if posts == 0 {
            return Err(failed(ActionKind::CreatePost, "the model did not publish a post"));
        }
        info!(submolt = topic.submolt, "Published a post");
        Ok(Counters::from([(counters::POSTS_MADE.to_string(), posts)]))
    }

    async fn run_unattended(&self, prompt: String) -> Result<TurnOutcome, Error> {
        let request = TurnRequest {
            system: Some(self.persona.clone()),
            turns: vec![Turn::user(prompt)],
            context: ToolContext::unattended(),
        };
        self.orchestrator.run_turn(request, None, CancellationToken::new()).await
    }
}

fn bump(counts: &mut Counters, name: &str, by: u64) {
    *counts.entry(name.to_string()).or_insert(0) += by;
}

pub(crate) fn failed(kind: ActionKind, reason: impl Into<String>) -> Error {
    Error::ScheduledActionFailed {
        kind: kind.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clawdvc_agent::testing::{FakePlatform, Script, ScriptedProvider, post, tool_call};
    use clawdvc_core::GrowthMetric;
    use clawdvc_core::error::ProviderError;
    use clawdvc_core::tool::ToolRegistry;
    use clawdvc_store::MemoryStorage;
    use clawdvc_tools::moltbook::{
        MoltbookCommentTool, MoltbookCreatePostTool, MoltbookFollowTool, MoltbookUpvoteTool,
    };
    use std::time::Duration;

    struct Fixture {
        actions: Actions,
        platform: Arc<FakePlatform>,
        provider: Arc<ScriptedProvider>,
        knowledge: Arc<KnowledgeStore>,
        ledger: Arc<GrowthLedger>,
    }

    fn fixture(posts: Vec<Post>, script: Vec<Script>) -> Fixture {
        let storage = Arc::new(MemoryStorage::new());
        let platform = Arc::new(FakePlatform::with_posts(posts));
        let provider = Arc::new(ScriptedProvider::new(script));
        let knowledge = Arc::new(KnowledgeStore::new(storage.clone(), 100));
        let ledger = Arc::new(GrowthLedger::new(storage));

        let mut registry = ToolRegistry::new();
        registry.register(Box::new(MoltbookCreatePostTool::new(platform.clone())));
        registry.register(Box::new(MoltbookCommentTool::new(platform.clone())));
        registry.register(Box::new(MoltbookUpvoteTool::new(platform.clone())));
        registry.register(Box::new(MoltbookFollowTool::new(platform.clone())));
        let orchestrator = Orchestrator::new(provider.clone(), Arc::new(registry), "m")
            .with_max_rounds(3)
            .with_retry_backoff(Duration::from_millis(5));

        let actions = Actions::new(Arc::new(orchestrator), platform.clone(), knowledge.clone(), ledger.clone())
            .with_submolts(vec!["general".into(), "crypto".into()])
            .with_engage_batch(2);
        Fixture {
            actions,
            platform,
            provider,
            knowledge,
            ledger,
        }
    }

    fn feed() -> Vec<Post> {
        vec![
            post("p1", "Bitcoin ETF flows", "alice", "crypto"),
            post("p2", "Are agents conscious?", "bob", "ponderings"),
            post("p3", "Scaling agent memory", "alice", "infrastructure"),
        ]
    }

    #[tokio::test]
    async fn setup_subscribes_and_follows_distinct_authors() {
        let f = fixture(feed(), vec![]);
        let counts = f.actions.startup_setup().await.unwrap();
        assert_eq!(counts[counters::SUBSCRIPTIONS], 2);
        assert_eq!(counts[counters::FOLLOWS], 2);
        assert!(f.platform.writes().contains(&"follow:alice".to_string()));
    }

    #[tokio::test]
    async fn learn_stores_posts_with_topics() {
        let f = fixture(feed(), vec![]);
        let counts = f.actions.learn_and_browse().await.unwrap();
        // hot and new each return the same three posts; re-inserts replace.
        assert_eq!(counts[counters::TOPICS_LEARNED], 6);
        assert_eq!(f.knowledge.count().await.unwrap(), 3);

        let entry = f.knowledge.get("moltbook:post:p1").await.unwrap().unwrap();
        assert_eq!(entry.topic, "crypto");
        assert_eq!(entry.provenance, Provenance::LearnAndBrowse);
        assert_eq!(entry.metadata["author"], "alice");
        assert!(f.provider.requests().is_empty());
    }

    #[tokio::test]
    async fn learn_fails_when_platform_is_down() {
        let storage = Arc::new(MemoryStorage::new());
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let actions = Actions::new(
            Arc::new(Orchestrator::new(provider, Arc::new(ToolRegistry::new()), "m")),
            Arc::new(FakePlatform::failing()),
            Arc::new(KnowledgeStore::new(storage.clone(), 10)),
            Arc::new(GrowthLedger::new(storage)),
        );
        assert!(matches!(
            actions.learn_and_browse().await,
            Err(Error::ScheduledActionFailed { .. })
        ));
    }

    #[tokio::test]
    async fn engage_counts_successful_tools_and_skips_seen_posts() {
        let f = fixture(
            feed(),
            vec![
                Script::tools(vec![
                    tool_call("a", "moltbook_upvote", serde_json::json!({"post_id": "p2"})),
                    tool_call("b", "moltbook_comment", serde_json::json!({"post_id": "p2", "content": "Define conscious."})),
                    tool_call("c", "moltbook_upvote", serde_json::json!({"post_id": "p3"})),
                ]),
                Script::text("Upvoted two, commented once."),
            ],
        );
        let engaged = HashSet::from(["p1".to_string()]);
        let report = f.actions.engage(&engaged).await.unwrap();

        assert_eq!(report.engaged, vec!["p2", "p3"]);
        assert_eq!(report.counters[counters::UPVOTES], 2);
        assert_eq!(report.counters[counters::COMMENTS_MADE], 1);
        let prompt = &f.provider.requests()[0].turns[0].content;
        assert!(prompt.contains("Post p2"));
        assert!(!prompt.contains("Post p1"));
    }

    #[tokio::test]
    async fn engage_with_nothing_new_skips_the_model() {
        let f = fixture(feed(), vec![]);
        let engaged: HashSet<String> = ["p1", "p2", "p3"].iter().map(|s| s.to_string()).collect();
        let report = f.actions.engage(&engaged).await.unwrap();
        assert!(report.engaged.is_empty());
        assert!(f.provider.requests().is_empty());
    }

    #[tokio::test]
    async fn post_follows_rotation_and_requires_publishing() {
        let f = fixture(
            vec![],
            vec![
                Script::tools(vec![tool_call(
                    "a",
                    "moltbook_create_post",
                    serde_json::json!({"title": "Hot take", "body": "Agents need budgets?", "submolt": "general"}),
                )]),
                Script::text("Hot take"),
            ],
        );
        let counts = f.actions.create_post().await.unwrap();
        assert_eq!(counts[counters::POSTS_MADE], 1);
        assert!(f.provider.requests()[0].turns[0].content.contains("Target submolt: general"));
        assert_eq!(f.platform.writes(), vec!["post:general:Hot take"]);

        // The next run moves on to the second topic.
        f.ledger
            .record(&GrowthMetric::success(ActionKind::CreatePost, counts))
            .await
            .unwrap();
        f.provider.push(Script::text("I'd rather not"));
        let err = f.actions.create_post().await.unwrap_err();
        assert!(matches!(err, Error::ScheduledActionFailed { .. }));
        assert!(f.provider.requests()[2].turns[0].content.contains("Target submolt: todayilearned"));
    }

    #[tokio::test]
    async fn model_failure_propagates() {
        let f = fixture(
            vec![],
            vec![
                Script::fail(ProviderError::Network("down".into())),
                Script::fail(ProviderError::Network("down".into())),
            ],
        );
        let err = f.actions.create_post().await.unwrap_err();
        assert!(matches!(err, Error::ModelCallFailed { attempts: 2, .. }));
    }
}
