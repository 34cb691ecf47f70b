//! The Interactive Dispatcher.
//!
//! Every inbound event goes through sender policy, the group-chat filter
//! and rate-limit admission, then onto a per-conversation FIFO queue. Each
//! conversation with queued work has exactly one worker task; different
//! conversations run concurrently. A `/reset` cancels the running turn and
//! everything queued ahead of it.

use clawdvc_config::AppConfig;
use clawdvc_core::Error;
use clawdvc_core::channel::{ChatKind, ChatTransport, InboundEvent};
use clawdvc_core::event::{DomainEvent, EventBus};
use clawdvc_core::message::{ConversationKey, Turn};
use clawdvc_core::tool::ToolContext;
use clawdvc_security::{AccessPolicy, RateLimiter, SenderCheckResult};
use clawdvc_store::{AccountStore, GrowthLedger, HistoryStore, KnowledgeStore, Persistence};
use clawdvc_tools::market::{MarketData, format_price_lines, parse_coin_list};
use clawdvc_tools::x_account::{PLATFORM as X_PLATFORM, XCookies};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::command::{ADMIN_ONLY, APOLOGY, Command, HELP_TEXT, SLOW_DOWN, UNKNOWN_HINT};
use crate::context::{DEFAULT_PERSONA, history_window, system_prompt};
use crate::orchestrator::{Orchestrator, TurnRequest, TurnStatus};
use crate::reply::ReplyWriter;

/// How often idle rate-limit windows are pruned while running.
const PRUNE_INTERVAL: Duration = Duration::from_secs(300);

/// What became of one inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Handled and replied to
    Handled,
    /// Not for us: unauthorized sender, empty text, or group chatter
    Ignored,
    /// Turned away by the rate limiter
    Denied,
    /// Cancelled by a reset before or during processing
    Abandoned,
    /// The model failed; the user got an apology
    Failed,
}

/// Completion handle for one inbound event.
pub struct Ticket(oneshot::Receiver<Disposition>);

impl Ticket {
    fn ready(disposition: Disposition) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(disposition);
        Self(rx)
    }

    /// Wait until the event has been handled.
    pub async fn wait(self) -> Disposition {
        self.0.await.unwrap_or(Disposition::Abandoned)
    }
}

/// Tunables for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub persona: String,
    pub summary_entries: usize,
    pub stream_edit_interval: Duration,
    /// Where `/post` and `/news` deliver
    pub channel_id: Option<String>,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            persona: DEFAULT_PERSONA.to_string(),
            summary_entries: 5,
            stream_edit_interval: Duration::from_millis(1000),
            channel_id: None,
        }
    }
}

impl DispatcherSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            summary_entries: config.knowledge.summary_entries,
            stream_edit_interval: Duration::from_millis(config.agent.stream_edit_interval_ms),
            channel_id: config.telegram.channel_id.clone(),
            ..Self::default()
        }
    }
}

/// The collaborators a dispatcher is wired to.
pub struct DispatcherDeps {
    pub transport: Arc<dyn ChatTransport>,
    pub orchestrator: Arc<Orchestrator>,
    pub history: Arc<HistoryStore>,
    pub knowledge: Arc<KnowledgeStore>,
    pub limiter: Arc<RateLimiter>,
    pub policy: AccessPolicy,
    pub market: Arc<dyn MarketData>,
    pub accounts: Arc<AccountStore>,
    pub ledger: Arc<GrowthLedger>,
}

struct Job {
    event: InboundEvent,
    command: Command,
    /// The conversation's token when the job was queued
    cancel: CancellationToken,
    done: oneshot::Sender<Disposition>,
}

struct Worker {
    tx: mpsc::UnboundedSender<Job>,
    cancel: CancellationToken,
}

pub struct Dispatcher {
    deps: DispatcherDeps,
    settings: DispatcherSettings,
    event_bus: Option<Arc<EventBus>>,
    workers: Mutex<HashMap<ConversationKey, Worker>>,
}

impl Dispatcher {
    pub fn new(deps: DispatcherDeps, settings: DispatcherSettings) -> Self {
        Self {
            deps,
            settings,
            event_bus: None,
            workers: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Accept one inbound event. Returns once the event is queued (or
    /// turned away); the ticket resolves when it has been handled.
    pub async fn handle_inbound_event(self: &Arc<Self>, event: InboundEvent) -> Ticket {
        let sender = event.sender.clone();
        if let SenderCheckResult::Denied { reason, .. } = self.deps.policy.check_sender(sender.as_str()) {
            debug!(identity = %sender, reason, "Ignoring sender");
            return Ticket::ready(Disposition::Ignored);
        }
        if event.addressed_elsewhere() {
            debug!(conversation = %event.conversation, "Ignoring command for another bot");
            return Ticket::ready(Disposition::Ignored);
        }

        let command = Command::parse(&event);
        if event.chat_kind == ChatKind::Group && command.is_ignored_in_group() {
            return Ticket::ready(Disposition::Ignored);
        }
        if matches!(&command, Command::Chat(text) if text.is_empty()) {
            return Ticket::ready(Disposition::Ignored);
        }

        self.publish(DomainEvent::MessageReceived {
            transport: self.deps.transport.name().to_string(),
            conversation: event.conversation.to_string(),
            content_preview: preview(command.loggable(&event.text)),
            timestamp: chrono::Utc::now(),
        });

        if !self.deps.limiter.admit(sender.as_str()) {
            warn!(identity = %sender, conversation = %event.conversation, "Admission denied");
            self.publish(DomainEvent::AdmissionDenied {
                identity: sender.to_string(),
                timestamp: chrono::Utc::now(),
            });
            self.say(&event.conversation, SLOW_DOWN).await;
            return Ticket::ready(Disposition::Denied);
        }

        self.enqueue(event, command)
    }

    /// Consume the transport until `shutdown` fires.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<(), Error> {
        let mut inbound = self.deps.transport.start().await?;
        let mut prune = tokio::time::interval(PRUNE_INTERVAL);
        info!(transport = self.deps.transport.name(), "Dispatcher running");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = prune.tick() => {
                    let removed = self.deps.limiter.prune();
                    if removed > 0 {
                        debug!(removed, "Pruned idle rate-limit windows");
                    }
                }
                next = inbound.recv() => match next {
                    Some(Ok(event)) => {
                        // Queue order is fixed here; completion is awaited by the worker.
                        let _ticket = self.handle_inbound_event(event).await;
                    }
                    Some(Err(e)) => warn!(transport = self.deps.transport.name(), error = %e, "Inbound event error"),
                    None => {
                        info!(transport = self.deps.transport.name(), "Transport closed");
                        break;
                    }
                },
            }
        }

        self.cancel_all();
        Ok(())
    }

    /// Number of conversations with queued or running work.
    pub fn active_conversations(&self) -> usize {
        self.lock_workers().len()
    }

    fn cancel_all(&self) {
        for worker in self.lock_workers().values() {
            worker.cancel.cancel();
        }
    }

    fn enqueue(self: &Arc<Self>, event: InboundEvent, command: Command) -> Ticket {
        let key = event.conversation.clone();
        let (done, ticket) = oneshot::channel();
        let mut workers = self.lock_workers();

        let worker = workers.entry(key.clone()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(Arc::clone(self).drain(key.clone(), rx));
            Worker {
                tx,
                cancel: CancellationToken::new(),
            }
        });

        if command == Command::Reset {
            worker.cancel.cancel();
            worker.cancel = CancellationToken::new();
        }
        let job = Job {
            event,
            command,
            cancel: worker.cancel.clone(),
            done,
        };
        if let Err(mpsc::error::SendError(job)) = worker.tx.send(job) {
            error!(conversation = %key, "Conversation worker is gone");
            let _ = job.done.send(Disposition::Abandoned);
        }
        Ticket(ticket)
    }

    /// Worker loop for one conversation. Exits when its queue is empty.
    async fn drain(self: Arc<Self>, key: ConversationKey, mut rx: mpsc::UnboundedReceiver<Job>) {
        while let Some(job) = self.next_job(&key, &mut rx) {
            let disposition = if job.cancel.is_cancelled() {
                debug!(conversation = %key, "Dropping turn queued before reset");
                Disposition::Abandoned
            } else {
                self.process(&job.event, &job.command, job.cancel.clone()).await
            };
            let _ = job.done.send(disposition);
        }
    }

    fn next_job(&self, key: &ConversationKey, rx: &mut mpsc::UnboundedReceiver<Job>) -> Option<Job> {
        if let Ok(job) = rx.try_recv() {
            return Some(job);
        }
        // Enqueue holds the same lock, so nothing can arrive between the
        // second check and the removal.
        let mut workers = self.lock_workers();
        match rx.try_recv() {
            Ok(job) => Some(job),
            Err(_) => {
                workers.remove(key);
                None
            }
        }
    }

    async fn process(&self, event: &InboundEvent, command: &Command, cancel: CancellationToken) -> Disposition {
        let key = &event.conversation;
        let sender = event.sender.as_str();
        match command {
            Command::Help => self.say(key, HELP_TEXT).await,
            Command::Reset => {
                if let Err(e) = self.deps.history.reset(key).await {
                    error!(conversation = %key, error = %e, "History reset failed");
                }
                info!(conversation = %key, "Conversation reset");
                self.say(key, "Conversation cleared.").await;
            }
            Command::System(text) => {
                let directive = Some(text.trim()).filter(|t| !t.is_empty()).map(str::to_string);
                let reply = if directive.is_some() {
                    "Directive updated."
                } else {
                    "Directive reset to default."
                };
                match self.deps.history.set_directive(key, directive).await {
                    Ok(()) => self.say(key, reply).await,
                    Err(e) => {
                        error!(conversation = %key, error = %e, "Directive write failed");
                        self.say(key, APOLOGY).await;
                    }
                }
            }
            Command::Ask(text) if text.trim().is_empty() => self.say(key, "Usage: /q <question>").await,
            Command::Ask(text) | Command::Chat(text) => return self.converse(event, text, cancel).await,
            Command::Price(args) => self.price(key, args).await,
            Command::Knowledge(query) => self.knowledge(key, query).await,
            Command::ConnectX { auth_token, ct0 } => {
                if event.chat_kind != ChatKind::Private {
                    self.say(key, "Send /connect_x in a private chat with me.").await;
                } else {
                    let credential = XCookies::new(auth_token.as_str(), ct0.as_str()).to_credential();
                    match self.deps.accounts.link(&event.sender, X_PLATFORM, credential).await {
                        Ok(_) => self.say(key, "X account linked.").await,
                        Err(e) => {
                            error!(identity = %event.sender, error = %e, "Account link failed");
                            self.say(key, APOLOGY).await;
                        }
                    }
                }
            }
            Command::ConnectXUsage => self.say(key, "Usage: /connect_x <auth_token> <ct0>").await,
            Command::DisconnectX => match self.deps.accounts.unlink(&event.sender, X_PLATFORM).await {
                Ok(true) => self.say(key, "X account unlinked.").await,
                Ok(false) => self.say(key, "No X account linked.").await,
                Err(e) => {
                    error!(identity = %event.sender, error = %e, "Account unlink failed");
                    self.say(key, APOLOGY).await;
                }
            },
            Command::Stats if !self.deps.policy.is_admin(sender) => self.say(key, ADMIN_ONLY).await,
            Command::Stats => self.stats(key).await,
            Command::Post(_) | Command::News(_) if !self.deps.policy.is_admin(sender) => {
                self.say(key, ADMIN_ONLY).await
            }
            Command::Post(topic) => return self.channel_post(key, "post", topic).await,
            Command::News(topic) => return self.channel_post(key, "news", topic).await,
            Command::Unknown(name) => {
                debug!(conversation = %key, command = %name, "Unknown command");
                self.say(key, UNKNOWN_HINT).await;
            }
        }
        Disposition::Handled
    }

    /// Run one orchestrated turn and stream the answer.
    async fn converse(&self, event: &InboundEvent, text: &str, cancel: CancellationToken) -> Disposition {
        let key = &event.conversation;
        let conversation = match self.deps.history.load(key).await {
            Ok(c) => c,
            Err(e) => {
                error!(conversation = %key, error = %e, "History read failed");
                self.say(key, APOLOGY).await;
                return Disposition::Failed;
            }
        };
        let summary = self
            .deps
            .knowledge
            .summary_for(text, self.settings.summary_entries)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Knowledge summary unavailable");
                String::new()
            });

        let user_turn = Turn::user(text);
        let mut turns = history_window(&conversation.turns);
        turns.push(user_turn.clone());
        let request = TurnRequest {
            system: Some(system_prompt(
                conversation.directive.as_deref(),
                &self.settings.persona,
                &summary,
            )),
            turns,
            context: ToolContext::interactive(event.sender.clone(), key.clone()),
        };

        let mut writer = ReplyWriter::new(
            Arc::clone(&self.deps.transport),
            key.clone(),
            self.settings.stream_edit_interval,
        );
        writer.begin().await;
        let (tx, rx) = mpsc::channel(64);
        let (result, ()) = tokio::join!(
            self.deps.orchestrator.run_turn(request, Some(tx), cancel),
            writer.pump(rx)
        );

        match result {
            Ok(outcome) if outcome.status == TurnStatus::Cancelled => {
                writer.finish_partial().await;
                Disposition::Abandoned
            }
            Ok(outcome) => {
                let mut committed = Vec::with_capacity(outcome.new_turns.len() + 1);
                committed.push(user_turn);
                committed.extend(outcome.new_turns);
                if let Persistence::Degraded(e) = self.deps.history.commit(key, committed).await {
                    warn!(conversation = %key, error = %e, "Reply delivered without durable history");
                }
                writer.finish(&outcome.answer).await;
                Disposition::Handled
            }
            Err(e) => {
                error!(conversation = %key, identity = %event.sender, error = %e, "Turn failed");
                self.publish(DomainEvent::ErrorOccurred {
                    context: format!("conversation {key}"),
                    error_message: e.to_string(),
                    timestamp: chrono::Utc::now(),
                });
                writer.finish(APOLOGY).await;
                Disposition::Failed
            }
        }
    }

    async fn price(&self, key: &ConversationKey, args: &str) {
        let ids = parse_coin_list(args);
        if ids.is_empty() {
            self.say(key, "Usage: /price <coin[,coin...]>").await;
            return;
        }
        match self.deps.market.prices(&ids, "usd").await {
            Ok(snapshots) => self.say(key, &format_price_lines(&snapshots)).await,
            Err(e) => {
                warn!(conversation = %key, error = %e, "Price lookup failed");
                self.say(key, "Couldn't fetch prices right now.").await;
            }
        }
    }

    async fn knowledge(&self, key: &ConversationKey, query: &str) {
        let knowledge = &self.deps.knowledge;
        let reply = if query.trim().is_empty() {
            knowledge
                .count()
                .await
                .map(|n| format!("I've learned {n} things on MoltBook so far."))
        } else {
            knowledge.search(query, None, 5).await.map(|entries| {
                if entries.is_empty() {
                    "Nothing learned on that yet.".to_string()
                } else {
                    entries
                        .iter()
                        .map(|e| format!("[{}] {}", e.topic, e.title))
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            })
        };
        match reply {
            Ok(text) => self.say(key, &text).await,
            Err(e) => {
                error!(error = %e, "Knowledge read failed");
                self.say(key, APOLOGY).await;
            }
        }
    }

    async fn stats(&self, key: &ConversationKey) {
        let totals = match self.deps.ledger.totals().await {
            Ok(t) => t,
            Err(e) => {
                error!(error = %e, "Ledger read failed");
                self.say(key, APOLOGY).await;
                return;
            }
        };
        let knowledge = self.deps.knowledge.count().await.unwrap_or_default();
        let mut lines = vec![
            format!(
                "Scheduled runs: {} ({} ok, {} failed, {} skipped)",
                totals.runs, totals.successes, totals.failures, totals.skipped
            ),
            format!("Knowledge entries: {knowledge}"),
        ];
        lines.extend(totals.counters.iter().map(|(name, n)| format!("{name}: {n}")));
        self.say(key, &lines.join("\n")).await;
    }

    async fn channel_post(&self, key: &ConversationKey, style: &str, topic: &str) -> Disposition {
        let Some(channel) = self.settings.channel_id.as_deref() else {
            self.say(key, "No channel configured.").await;
            return Disposition::Handled;
        };
        if topic.trim().is_empty() {
            self.say(key, &format!("Usage: /{style} <topic>")).await;
            return Disposition::Handled;
        }
        let prompt = match style {
            "news" => format!("Write a short news update for the channel about: {topic}. Plain text, no preamble."),
            _ => format!("Write a short channel post about: {topic}. Plain text, no preamble."),
        };
        match self.deps.orchestrator.generate(&self.settings.persona, &prompt).await {
            Ok(text) => {
                self.say(&ConversationKey::from(channel), &text).await;
                self.say(key, "Posted to the channel.").await;
                Disposition::Handled
            }
            Err(e) => {
                error!(conversation = %key, error = %e, "Channel post generation failed");
                self.say(key, APOLOGY).await;
                Disposition::Failed
            }
        }
    }

    async fn say(&self, key: &ConversationKey, text: &str) {
        if let Err(e) = self.deps.transport.deliver(key, text).await {
            warn!(conversation = %key, error = %e, "Delivery failed");
        }
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }

    fn lock_workers(&self) -> std::sync::MutexGuard<'_, HashMap<ConversationKey, Worker>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(80).collect();
    if out.len() < text.len() {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::ROUND_LIMIT_REPLY;
    use crate::testing::{FakeMarket, RecordingTransport, Script, ScriptedProvider};
    use clawdvc_core::error::ProviderError;
    use clawdvc_core::message::{Identity, Role};
    use clawdvc_core::tool::ToolRegistry;
    use clawdvc_security::SecretsManager;
    use clawdvc_store::MemoryStorage;

    struct Harness {
        dispatcher: Arc<Dispatcher>,
        transport: Arc<RecordingTransport>,
        provider: Arc<ScriptedProvider>,
        history: Arc<HistoryStore>,
        accounts: Arc<AccountStore>,
        storage: Arc<MemoryStorage>,
        bus: Arc<EventBus>,
    }

    fn harness(script: Vec<Script>, per_minute: usize) -> Harness {
        let storage = Arc::new(MemoryStorage::new());
        let transport = Arc::new(RecordingTransport::new());
        let provider = Arc::new(ScriptedProvider::new(script));
        let history = Arc::new(HistoryStore::new(storage.clone(), 20));
        let knowledge = Arc::new(KnowledgeStore::new(storage.clone(), 100));
        let accounts = Arc::new(AccountStore::new(storage.clone(), SecretsManager::new("test")));
        let orchestrator = Orchestrator::new(provider.clone(), Arc::new(ToolRegistry::new()), "m")
            .with_max_rounds(2)
            .with_retry_backoff(Duration::from_millis(5));
        let deps = DispatcherDeps {
            transport: transport.clone(),
            orchestrator: Arc::new(orchestrator),
            history: history.clone(),
            knowledge,
            limiter: Arc::new(RateLimiter::per_minute(per_minute)),
            policy: AccessPolicy::open(vec!["admin".into()]),
            market: Arc::new(FakeMarket::default()),
            accounts: accounts.clone(),
            ledger: Arc::new(GrowthLedger::new(storage.clone())),
        };
        let settings = DispatcherSettings {
            stream_edit_interval: Duration::ZERO,
            channel_id: Some("channel".into()),
            ..DispatcherSettings::default()
        };
        let bus = Arc::new(EventBus::new(64));
        Harness {
            dispatcher: Arc::new(Dispatcher::new(deps, settings).with_event_bus(bus.clone())),
            bus,
            transport,
            provider,
            history,
            accounts,
            storage,
        }
    }

    fn private(text: &str) -> InboundEvent {
        InboundEvent::new(ConversationKey::from("c1"), Identity::from("u1"), ChatKind::Private, text)
    }

    fn group(text: &str) -> InboundEvent {
        InboundEvent::new(ConversationKey::from("g1"), Identity::from("u1"), ChatKind::Group, text)
    }

    #[tokio::test]
    async fn chat_streams_reply_and_commits_history() {
        let h = harness(vec![Script::text("BTC looks strong")], 10);
        let d = h.dispatcher.handle_inbound_event(private("how is btc?")).await.wait().await;
        assert_eq!(d, Disposition::Handled);
        assert_eq!(h.transport.texts("c1"), vec!["BTC looks strong"]);

        let turns = h.history.list(&ConversationKey::from("c1")).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[1].content, "BTC looks strong");

        let system = h.provider.requests()[0].system.clone().unwrap();
        assert!(system.starts_with("You are ClawdVC"));
    }

    #[tokio::test]
    async fn group_free_text_is_ignored_but_q_is_answered() {
        let h = harness(vec![Script::text("answer")], 10);
        let d = h.dispatcher.handle_inbound_event(group("just chatting")).await.wait().await;
        assert_eq!(d, Disposition::Ignored);
        assert!(h.transport.messages().is_empty());

        let d = h.dispatcher.handle_inbound_event(group("/q@clawdvc_bot what now?")).await.wait().await;
        assert_eq!(d, Disposition::Handled);
        assert_eq!(h.transport.last_text("g1").as_deref(), Some("answer"));
    }

    #[tokio::test]
    async fn over_limit_gets_slow_down_notice() {
        let h = harness(vec![], 2);
        for _ in 0..2 {
            h.dispatcher.handle_inbound_event(private("/help")).await.wait().await;
        }
        let d = h.dispatcher.handle_inbound_event(private("/help")).await.wait().await;
        assert_eq!(d, Disposition::Denied);
        assert_eq!(h.transport.last_text("c1").as_deref(), Some(SLOW_DOWN));
    }

    #[tokio::test]
    async fn model_failure_apologizes_and_commits_nothing() {
        let h = harness(
            vec![
                Script::fail(ProviderError::Network("down".into())),
                Script::fail(ProviderError::Network("down".into())),
            ],
            10,
        );
        let d = h.dispatcher.handle_inbound_event(private("hello")).await.wait().await;
        assert_eq!(d, Disposition::Failed);
        assert_eq!(h.transport.last_text("c1").as_deref(), Some(APOLOGY));
        assert!(h.history.list(&ConversationKey::from("c1")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_answers_never_reach_history() {
        let h = harness(vec![Script::text(""), Script::text("")], 10);
        let d = h.dispatcher.handle_inbound_event(private("hello")).await.wait().await;
        assert_eq!(d, Disposition::Failed);
        assert_eq!(h.transport.last_text("c1").as_deref(), Some(APOLOGY));
        assert!(h.history.list(&ConversationKey::from("c1")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn round_limit_commits_fallback() {
        let h = harness(vec![], 10);
        let provider = ScriptedProvider::always_tools("missing");
        let orchestrator = Orchestrator::new(Arc::new(provider), Arc::new(ToolRegistry::new()), "m").with_max_rounds(2);
        let deps = DispatcherDeps {
            transport: h.transport.clone(),
            orchestrator: Arc::new(orchestrator),
            history: h.history.clone(),
            knowledge: Arc::new(KnowledgeStore::new(h.storage.clone(), 10)),
            limiter: Arc::new(RateLimiter::per_minute(10)),
            policy: AccessPolicy::open(vec![]),
            market: Arc::new(FakeMarket::default()),
            accounts: h.accounts.clone(),
            ledger: Arc::new(GrowthLedger::new(h.storage.clone())),
        };
        let dispatcher = Arc::new(Dispatcher::new(deps, DispatcherSettings::default()));
        dispatcher.handle_inbound_event(private("loop")).await.wait().await;

        assert_eq!(h.transport.last_text("c1").as_deref(), Some(ROUND_LIMIT_REPLY));
        let turns = h.history.list(&ConversationKey::from("c1")).await.unwrap();
        assert_eq!(turns.last().unwrap().content, ROUND_LIMIT_REPLY);
        assert_eq!(turns.first().unwrap().role, Role::User);
    }

    #[tokio::test]
    async fn storage_failure_still_delivers_reply() {
        let h = harness(vec![Script::text("still here")], 10);
        h.storage.set_fail_writes(true);
        let d = h.dispatcher.handle_inbound_event(private("hi")).await.wait().await;
        assert_eq!(d, Disposition::Handled);
        assert_eq!(h.transport.last_text("c1").as_deref(), Some("still here"));
    }

    #[tokio::test]
    async fn turns_in_one_conversation_are_fifo() {
        let h = harness(
            vec![
                Script::slow(Duration::from_millis(80), "first"),
                Script::text("second"),
            ],
            10,
        );
        let t1 = h.dispatcher.handle_inbound_event(private("one")).await;
        let t2 = h.dispatcher.handle_inbound_event(private("two")).await;
        assert_eq!(t1.wait().await, Disposition::Handled);
        assert_eq!(t2.wait().await, Disposition::Handled);

        let turns = h.history.list(&ConversationKey::from("c1")).await.unwrap();
        let contents: Vec<_> = turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "first", "two", "second"]);

        // The worker retires once its queue is empty.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.dispatcher.active_conversations(), 0);
    }

    #[tokio::test]
    async fn reset_abandons_running_and_queued_turns() {
        let h = harness(
            vec![
                Script::slow(Duration::from_secs(30), "never"),
                Script::text("unused"),
            ],
            10,
        );
        let running = h.dispatcher.handle_inbound_event(private("slow one")).await;
        let queued = h.dispatcher.handle_inbound_event(private("queued")).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let reset = h.dispatcher.handle_inbound_event(private("/reset")).await;

        assert_eq!(running.wait().await, Disposition::Abandoned);
        assert_eq!(queued.wait().await, Disposition::Abandoned);
        assert_eq!(reset.wait().await, Disposition::Handled);

        assert!(h.history.list(&ConversationKey::from("c1")).await.unwrap().is_empty());
        assert_eq!(h.provider.requests().len(), 1);
        assert_eq!(h.transport.last_text("c1").as_deref(), Some("Conversation cleared."));
    }

    #[tokio::test]
    async fn system_directive_is_used_then_reset() {
        let h = harness(vec![Script::text("arr"), Script::text("hello")], 10);
        h.dispatcher.handle_inbound_event(private("/system Talk like a pirate.")).await.wait().await;
        h.dispatcher.handle_inbound_event(private("hi")).await.wait().await;
        assert_eq!(
            h.provider.requests()[0].system.as_deref(),
            Some("Talk like a pirate.")
        );

        h.dispatcher.handle_inbound_event(private("/reset")).await.wait().await;
        h.dispatcher.handle_inbound_event(private("hi again")).await.wait().await;
        let second = &h.provider.requests()[1];
        assert!(second.system.as_deref().unwrap().starts_with("You are ClawdVC"));
        assert_eq!(second.turns.len(), 1);
    }

    #[tokio::test]
    async fn price_command_skips_the_model() {
        let h = harness(vec![], 10);
        h.dispatcher.handle_inbound_event(private("/price bitcoin")).await.wait().await;
        let reply = h.transport.last_text("c1").unwrap();
        assert!(reply.contains("bitcoin"));
        assert!(h.provider.requests().is_empty());
    }

    #[tokio::test]
    async fn connect_x_only_in_private_chats() {
        let h = harness(vec![], 10);
        let owner = Identity::from("u1");

        h.dispatcher.handle_inbound_event(group("/connect_x tok ct")).await.wait().await;
        assert!(!h.accounts.is_linked(&owner, X_PLATFORM).await.unwrap());

        h.dispatcher.handle_inbound_event(private("/connect_x tok ct")).await.wait().await;
        assert!(h.accounts.is_linked(&owner, X_PLATFORM).await.unwrap());
        assert_eq!(h.transport.last_text("c1").as_deref(), Some("X account linked."));

        h.dispatcher.handle_inbound_event(private("/disconnect_x")).await.wait().await;
        assert!(!h.accounts.is_linked(&owner, X_PLATFORM).await.unwrap());
    }

    #[tokio::test]
    async fn connect_x_cookies_stay_out_of_domain_events() {
        let h = harness(vec![], 10);
        let mut events = h.bus.subscribe();
        h.dispatcher
            .handle_inbound_event(private("/connect_x SECRET_AUTH_TOKEN SECRET_CT0"))
            .await
            .wait()
            .await;

        let mut seen = 0;
        while let Ok(event) = events.try_recv() {
            let rendered = format!("{event:?}");
            assert!(!rendered.contains("SECRET_AUTH_TOKEN"), "{rendered}");
            assert!(!rendered.contains("SECRET_CT0"), "{rendered}");
            if let DomainEvent::MessageReceived { content_preview, .. } = event.as_ref() {
                assert_eq!(content_preview, "/connect_x [REDACTED]");
            }
            seen += 1;
        }
        assert!(seen > 0);
    }

    #[tokio::test]
    async fn different_conversations_run_concurrently() {
        let h = harness(
            vec![
                Script::slow(Duration::from_millis(500), "slow answer"),
                Script::text("fast answer"),
            ],
            10,
        );
        let slow = h.dispatcher.handle_inbound_event(private("take your time")).await;
        // Let c1 pick up the slow script before c2 arrives.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let other = InboundEvent::new(ConversationKey::from("c2"), Identity::from("u2"), ChatKind::Private, "quick one");
        let fast = h.dispatcher.handle_inbound_event(other).await;

        let mut slow = Box::pin(slow.wait());
        tokio::select! {
            d = fast.wait() => assert_eq!(d, Disposition::Handled),
            _ = &mut slow => panic!("c1 finished before c2"),
        }
        assert_eq!(h.transport.last_text("c2").as_deref(), Some("fast answer"));
        assert_ne!(h.transport.last_text("c1").as_deref(), Some("slow answer"));
        assert_eq!(slow.await, Disposition::Handled);
        assert_eq!(h.transport.last_text("c1").as_deref(), Some("slow answer"));
    }

    #[tokio::test]
    async fn commands_for_another_bot_are_ignored() {
        let h = harness(vec![Script::text("answer")], 10);
        let mut elsewhere = group("/q@some_other_bot what now?");
        elsewhere.bot_username = Some("clawdvc_bot".into());
        let d = h.dispatcher.handle_inbound_event(elsewhere).await.wait().await;
        assert_eq!(d, Disposition::Ignored);
        assert!(h.transport.texts("g1").is_empty());
        assert!(h.provider.requests().is_empty());

        let mut mine = group("/q@clawdvc_bot what now?");
        mine.bot_username = Some("clawdvc_bot".into());
        let d = h.dispatcher.handle_inbound_event(mine).await.wait().await;
        assert_eq!(d, Disposition::Handled);
        assert_eq!(h.transport.last_text("g1").as_deref(), Some("answer"));
    }

    #[tokio::test]
    async fn admin_commands_are_gated() {
        let h = harness(vec![Script::text("Big news today")], 10);
        h.dispatcher.handle_inbound_event(private("/stats")).await.wait().await;
        assert_eq!(h.transport.last_text("c1").as_deref(), Some(ADMIN_ONLY));

        let admin = InboundEvent::new(
            ConversationKey::from("a1"),
            Identity::from("admin"),
            ChatKind::Private,
            "/news bitcoin etf",
        );
        h.dispatcher.handle_inbound_event(admin).await.wait().await;
        assert_eq!(h.transport.texts("channel"), vec!["Big news today"]);
        assert!(h.provider.requests()[0].tools.is_empty());
    }

    #[tokio::test]
    async fn unknown_command_gets_hint() {
        let h = harness(vec![], 10);
        h.dispatcher.handle_inbound_event(private("/dance")).await.wait().await;
        assert_eq!(h.transport.last_text("c1").as_deref(), Some(UNKNOWN_HINT));
    }

    #[tokio::test]
    async fn run_consumes_transport_until_shutdown() {
        let h = harness(vec![], 10);
        h.transport.push(private("/help")).await;
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&h.dispatcher).run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(h.transport.last_text("c1").as_deref(), Some(HELP_TEXT));
    }
}
