//! End-to-end tests: the dispatcher and the scheduler wired to one set of
//! stores, with scripted model, transport and platform collaborators.

use std::sync::Arc;
use std::time::Duration;

use clawdvc_agent::testing::{FakeMarket, FakePlatform, RecordingTransport, Script, ScriptedProvider, post, tool_call};
use clawdvc_agent::{Dispatcher, DispatcherDeps, DispatcherSettings, Disposition, Orchestrator};
use clawdvc_core::channel::{ChatKind, InboundEvent};
use clawdvc_core::message::{ConversationKey, Identity, Role};
use clawdvc_core::metrics::{ActionKind, Outcome};
use clawdvc_core::tool::ToolRegistry;
use clawdvc_security::{AccessPolicy, RateLimiter, SecretsManager};
use clawdvc_store::{AccountStore, GrowthLedger, HistoryStore, KnowledgeStore, MemoryStorage};
use clawdvc_tools::{BirdCli, MarketData, SocialPlatform, ToolDeps};
use clawdvc_workflow::{Actions, Scheduler, SchedulerSettings};

struct World {
    dispatcher: Arc<Dispatcher>,
    scheduler: Arc<Scheduler>,
    transport: Arc<RecordingTransport>,
    chat_model: Arc<ScriptedProvider>,
    agent_model: Arc<ScriptedProvider>,
    platform: Arc<FakePlatform>,
    history: Arc<HistoryStore>,
    knowledge: Arc<KnowledgeStore>,
    ledger: Arc<GrowthLedger>,
}

fn world(platform: FakePlatform) -> World {
    let storage = Arc::new(MemoryStorage::new());
    let history = Arc::new(HistoryStore::new(storage.clone(), 20));
    let knowledge = Arc::new(KnowledgeStore::new(storage.clone(), 100));
    let ledger = Arc::new(GrowthLedger::new(storage.clone()));
    let accounts = Arc::new(AccountStore::new(storage, SecretsManager::new("e2e")));
    let platform = Arc::new(platform);
    let market: Arc<dyn MarketData> = Arc::new(FakeMarket::default());
    let social: Arc<dyn SocialPlatform> = platform.clone();

    let tools = Arc::new(clawdvc_tools::default_registry(ToolDeps {
        market: market.clone(),
        platform: social.clone(),
        knowledge: knowledge.clone(),
        accounts: accounts.clone(),
        account_client: Arc::new(BirdCli::new("bird")),
        brave_api_key: None,
    }));

    let chat_model = Arc::new(ScriptedProvider::new(vec![]));
    let agent_model = Arc::new(ScriptedProvider::new(vec![]));
    let orchestrator = |provider: Arc<ScriptedProvider>, tools: Arc<ToolRegistry>| {
        Arc::new(
            Orchestrator::new(provider, tools, "m")
                .with_max_rounds(4)
                .with_retry_backoff(Duration::from_millis(5)),
        )
    };

    let transport = Arc::new(RecordingTransport::new());
    let dispatcher = Arc::new(Dispatcher::new(
        DispatcherDeps {
            transport: transport.clone(),
            orchestrator: orchestrator(chat_model.clone(), tools.clone()),
            history: history.clone(),
            knowledge: knowledge.clone(),
            limiter: Arc::new(RateLimiter::per_minute(10)),
            policy: AccessPolicy::open(vec!["admin".into()]),
            market,
            accounts,
            ledger: ledger.clone(),
        },
        DispatcherSettings {
            stream_edit_interval: Duration::ZERO,
            ..DispatcherSettings::default()
        },
    ));

    let actions = Actions::new(orchestrator(agent_model.clone(), tools), social, knowledge.clone(), ledger.clone())
        .with_submolts(vec!["general".into()]);
    let scheduler = Arc::new(Scheduler::new(actions, SchedulerSettings::default()));

    World {
        dispatcher,
        scheduler,
        transport,
        chat_model,
        agent_model,
        platform,
        history,
        knowledge,
        ledger,
    }
}

fn from(sender: &str, text: &str) -> InboundEvent {
    InboundEvent::new(ConversationKey::from("c1"), Identity::from(sender), ChatKind::Private, text)
}

#[tokio::test]
async fn e2e_learned_knowledge_reaches_chat() {
    let w = world(FakePlatform::with_posts(vec![
        post("p1", "Bitcoin ETF inflows hit a record", "alice", "crypto"),
        post("p2", "Why agents need memory", "bob", "ai"),
    ]));

    let metric = w.scheduler.run_scheduled_action(ActionKind::LearnAndBrowse).await;
    assert_eq!(metric.outcome, Outcome::Success);
    assert_eq!(w.knowledge.count().await.unwrap(), 2);

    w.chat_model.push(Script::text("Flows look strong."));
    let done = w.dispatcher.handle_inbound_event(from("u1", "what is bitcoin doing?")).await;
    assert_eq!(done.wait().await, Disposition::Handled);

    let requests = w.chat_model.requests();
    let system = requests[0].system.clone().unwrap_or_default();
    assert!(system.contains("Bitcoin ETF inflows hit a record"));
    assert_eq!(w.transport.last_text("c1").as_deref(), Some("Flows look strong."));
}

#[tokio::test]
async fn e2e_chat_tool_round_is_committed_in_order() {
    let w = world(FakePlatform::default());
    w.chat_model.push(Script::tools(vec![tool_call(
        "t1",
        "get_crypto_price",
        serde_json::json!({ "coin_id": "bitcoin" }),
    )]));
    w.chat_model.push(Script::text("BTC is near 97k."));

    let done = w.dispatcher.handle_inbound_event(from("u1", "price of btc?")).await;
    assert_eq!(done.wait().await, Disposition::Handled);

    let roles: Vec<Role> = w
        .history
        .list(&ConversationKey::from("c1"))
        .await
        .unwrap()
        .iter()
        .map(|t| t.role)
        .collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::ToolResult, Role::Assistant]);
    assert_eq!(w.transport.last_text("c1").as_deref(), Some("BTC is near 97k."));
}

#[tokio::test]
async fn e2e_startup_sequence_posts_and_records_every_run() {
    let w = world(FakePlatform::with_posts(vec![post("p1", "Rollups are eating L1s", "carol", "crypto")]));
    w.agent_model.push(Script::tools(vec![tool_call(
        "c1",
        "moltbook_create_post",
        serde_json::json!({ "title": "Hot take", "body": "Context windows are a crutch.", "submolt": "general" }),
    )]));
    w.agent_model.push(Script::text("Posted."));

    let metrics = w.scheduler.on_startup().await;
    let kinds: Vec<ActionKind> = metrics.iter().map(|m| m.kind).collect();
    assert_eq!(kinds, clawdvc_workflow::STARTUP_SEQUENCE.to_vec());
    assert!(metrics.iter().all(|m| m.outcome == Outcome::Success));

    assert!(w.platform.writes().contains(&"post:general:Hot take".to_string()));
    assert!(w.platform.writes().contains(&"follow:carol".to_string()));
    assert_eq!(w.ledger.all().await.unwrap().len(), 3);
}

#[tokio::test]
async fn e2e_stats_reflect_scheduled_outcomes() {
    let w = world(FakePlatform::with_posts(vec![post("p1", "Agents and markets", "dan", "trading")]));

    assert_eq!(
        w.scheduler.run_scheduled_action(ActionKind::LearnAndBrowse).await.outcome,
        Outcome::Success
    );
    // No scripted answer: the model call fails twice and the run fails.
    assert_eq!(
        w.scheduler.run_scheduled_action(ActionKind::CreatePost).await.outcome,
        Outcome::Failure
    );

    let done = w.dispatcher.handle_inbound_event(from("u1", "/stats")).await;
    done.wait().await;
    assert!(w.transport.last_text("c1").unwrap_or_default().contains("admins"));

    let done = w.dispatcher.handle_inbound_event(from("admin", "/stats")).await;
    assert_eq!(done.wait().await, Disposition::Handled);
    let stats = w.transport.last_text("c1").unwrap_or_default();
    assert!(stats.contains("Scheduled runs: 2 (1 ok, 1 failed, 0 skipped)"), "{stats}");
    assert!(stats.contains("Knowledge entries: 1"), "{stats}");
}
