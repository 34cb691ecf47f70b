//! The Autonomous Agent Scheduler: one control loop driving the recurring
//! actions on fixed intervals, after a one-time startup sequence.

use clawdvc_config::AppConfig;
use clawdvc_core::event::{DomainEvent, EventBus};
use clawdvc_core::metrics::{ActionKind, GrowthMetric, Outcome};
use futures::FutureExt;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::actions::{ActionReport, Actions};

/// Engaged post ids remembered across engage runs.
const MAX_ENGAGED: usize = 500;

/// Action order at process start.
pub const STARTUP_SEQUENCE: [ActionKind; 3] = [
    ActionKind::StartupSetup,
    ActionKind::LearnAndBrowse,
    ActionKind::CreatePost,
];

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub learn_every: Duration,
    pub engage_every: Duration,
    pub post_every: Duration,
    /// Share of an action's own interval it may run before being aborted
    pub timeout_fraction: f64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            learn_every: Duration::from_secs(10 * 60),
            engage_every: Duration::from_secs(20 * 60),
            post_every: Duration::from_secs(40 * 60),
            timeout_fraction: 0.8,
        }
    }
}

impl SchedulerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let s = &config.scheduler;
        Self {
            learn_every: s.learn_interval(),
            engage_every: s.engage_interval(),
            post_every: s.post_interval(),
            timeout_fraction: s.timeout_fraction,
        }
    }

    pub fn interval(&self, kind: ActionKind) -> Duration {
        match kind {
            ActionKind::LearnAndBrowse | ActionKind::StartupSetup => self.learn_every,
            ActionKind::Engage => self.engage_every,
            ActionKind::CreatePost => self.post_every,
        }
    }

    /// How long one run of `kind` may take.
    pub fn timeout(&self, kind: ActionKind) -> Duration {
        self.interval(kind).mul_f64(self.timeout_fraction.clamp(0.05, 1.0))
    }
}

/// Loop-owned state. Only the control loop reads or writes it.
#[derive(Debug, Default)]
pub struct SchedulerState {
    in_flight: HashSet<ActionKind>,
    last_run: HashMap<ActionKind, chrono::DateTime<chrono::Utc>>,
    engaged: VecDeque<String>,
    engaged_set: HashSet<String>,
}

impl SchedulerState {
    pub fn is_running(&self, kind: ActionKind) -> bool {
        self.in_flight.contains(&kind)
    }

    pub fn last_run(&self, kind: ActionKind) -> Option<chrono::DateTime<chrono::Utc>> {
        self.last_run.get(&kind).copied()
    }

    pub fn engaged(&self) -> &HashSet<String> {
        &self.engaged_set
    }

    fn begin(&mut self, kind: ActionKind) -> bool {
        self.in_flight.insert(kind)
    }

    fn finish(&mut self, kind: ActionKind, engaged: Vec<String>) {
        self.in_flight.remove(&kind);
        self.last_run.insert(kind, chrono::Utc::now());
        for id in engaged {
            if self.engaged_set.insert(id.clone()) {
                self.engaged.push_back(id);
            }
        }
        while self.engaged.len() > MAX_ENGAGED {
            if let Some(old) = self.engaged.pop_front() {
                self.engaged_set.remove(&old);
            }
        }
    }
}

pub struct Scheduler {
    actions: Actions,
    settings: SchedulerSettings,
    event_bus: Option<Arc<EventBus>>,
}

impl Scheduler {
    pub fn new(actions: Actions, settings: SchedulerSettings) -> Self {
        Self {
            actions,
            settings,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Run one action now and record its ledger row.
    pub async fn run_scheduled_action(&self, kind: ActionKind) -> GrowthMetric {
        self.execute(kind, &HashSet::new()).await.0
    }

    /// The one-time startup sequence, in order.
    pub async fn on_startup(&self) -> Vec<GrowthMetric> {
        let mut metrics = Vec::with_capacity(STARTUP_SEQUENCE.len());
        for kind in STARTUP_SEQUENCE {
            metrics.push(self.run_scheduled_action(kind).await);
        }
        metrics
    }

    /// Run the startup sequence, then the recurring timers until `shutdown`.
    ///
    /// Never returns early on action failures; those become ledger rows.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!("Scheduler starting");
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = self.on_startup() => {}
        }

        let mut state = SchedulerState::default();
        let mut tasks: JoinSet<(ActionKind, Vec<String>)> = JoinSet::new();
        let mut learn = self.timer(ActionKind::LearnAndBrowse);
        let mut engage = self.timer(ActionKind::Engage);
        let mut post = self.timer(ActionKind::CreatePost);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = learn.tick() => self.fire(ActionKind::LearnAndBrowse, &mut state, &mut tasks).await,
                _ = engage.tick() => self.fire(ActionKind::Engage, &mut state, &mut tasks).await,
                _ = post.tick() => self.fire(ActionKind::CreatePost, &mut state, &mut tasks).await,
                Some(joined) = tasks.join_next() => match joined {
                    Ok((kind, engaged)) => state.finish(kind, engaged),
                    Err(e) => error!(error = %e, "Scheduled action task aborted"),
                },
            }
        }

        tasks.abort_all();
        info!("Scheduler stopped");
    }

    fn timer(&self, kind: ActionKind) -> tokio::time::Interval {
        let period = self.settings.interval(kind);
        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        timer
    }

    async fn fire(
        self: &Arc<Self>,
        kind: ActionKind,
        state: &mut SchedulerState,
        tasks: &mut JoinSet<(ActionKind, Vec<String>)>,
    ) {
        if !state.begin(kind) {
            warn!(action = %kind, "Previous run still in flight, skipping tick");
            let metric = GrowthMetric::skipped(kind, "previous run still in flight");
            self.finish_metric(&metric).await;
            return;
        }

        let this = Arc::clone(self);
        let engaged = state.engaged().clone();
        tasks.spawn(async move {
            let run = AssertUnwindSafe(this.execute(kind, &engaged)).catch_unwind().await;
            match run {
                Ok((_, report)) => (kind, report.engaged),
                Err(_) => {
                    let metric = GrowthMetric::failure(kind, "action panicked");
                    this.finish_metric(&metric).await;
                    (kind, Vec::new())
                }
            }
        });
    }

    /// Run `kind` under its timeout; every outcome becomes one ledger row.
    async fn execute(&self, kind: ActionKind, engaged: &HashSet<String>) -> (GrowthMetric, ActionReport) {
        let started = Instant::now();
        let budget = self.settings.timeout(kind);
        info!(action = %kind, timeout_secs = budget.as_secs(), "Scheduled action starting");

        let (metric, report) = match tokio::time::timeout(budget, self.actions.perform(kind, engaged)).await {
            Ok(Ok(report)) => (GrowthMetric::success(kind, report.counters.clone()), report),
            Ok(Err(e)) => (GrowthMetric::failure(kind, e.to_string()), ActionReport::default()),
            Err(_) => (
                GrowthMetric::failure(kind, format!("timed out after {}s", budget.as_secs())),
                ActionReport::default(),
            ),
        };
        let metric = metric.with_duration(started.elapsed());
        self.finish_metric(&metric).await;
        (metric, report)
    }

    async fn finish_metric(&self, metric: &GrowthMetric) {
        match metric.outcome {
            Outcome::Success => info!(
                action = %metric.kind,
                duration_ms = metric.duration_ms,
                counters = ?metric.counters,
                "Scheduled action succeeded"
            ),
            Outcome::Failure => warn!(
                action = %metric.kind,
                duration_ms = metric.duration_ms,
                error = metric.error.as_deref().unwrap_or(""),
                "Scheduled action failed"
            ),
            Outcome::Skipped => info!(action = %metric.kind, "Scheduled action skipped"),
        }
        if let Err(e) = self.actions.ledger().record(metric).await {
            error!(action = %metric.kind, error = %e, "Growth metric dropped");
        }
        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::ScheduledActionFinished {
                kind: metric.kind,
                outcome: metric.outcome,
                duration_ms: metric.duration_ms,
                timestamp: metric.timestamp,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clawdvc_agent::Orchestrator;
    use clawdvc_agent::testing::{FakePlatform, Script, ScriptedProvider, post, tool_call};
    use clawdvc_core::error::ProviderError;
    use clawdvc_core::metrics::counters;
    use clawdvc_core::tool::ToolRegistry;
    use clawdvc_store::{GrowthLedger, KnowledgeStore, MemoryStorage};
    use clawdvc_tools::moltbook::{MoltbookCreatePostTool, SocialPlatform};

    fn scheduler(platform: Arc<FakePlatform>, provider: Arc<ScriptedProvider>, settings: SchedulerSettings) -> (Arc<Scheduler>, Arc<GrowthLedger>) {
        let storage = Arc::new(MemoryStorage::new());
        let ledger = Arc::new(GrowthLedger::new(storage.clone()));
        let mut registry = ToolRegistry::new();
        let social: Arc<dyn SocialPlatform> = platform.clone();
        registry.register(Box::new(MoltbookCreatePostTool::new(social.clone())));
        let orchestrator = Orchestrator::new(provider, Arc::new(registry), "m")
            .with_max_rounds(2)
            .with_retry_backoff(Duration::from_millis(5));
        let actions = Actions::new(
            Arc::new(orchestrator),
            social,
            Arc::new(KnowledgeStore::new(storage, 100)),
            ledger.clone(),
        )
        .with_submolts(vec!["general".into()]);
        (Arc::new(Scheduler::new(actions, settings)), ledger)
    }

    fn fast() -> SchedulerSettings {
        SchedulerSettings {
            learn_every: Duration::from_millis(100),
            engage_every: Duration::from_millis(150),
            post_every: Duration::from_secs(3600),
            timeout_fraction: 0.8,
        }
    }

    #[test]
    fn timeout_is_a_fraction_of_the_interval() {
        let settings = SchedulerSettings::default();
        assert_eq!(settings.timeout(ActionKind::LearnAndBrowse), Duration::from_secs(480));
        assert_eq!(settings.timeout(ActionKind::CreatePost), Duration::from_secs(1920));
    }

    #[test]
    fn engaged_ids_are_capped() {
        let mut state = SchedulerState::default();
        assert!(state.begin(ActionKind::Engage));
        assert!(!state.begin(ActionKind::Engage));
        state.finish(ActionKind::Engage, (0..600).map(|i| i.to_string()).collect());
        assert_eq!(state.engaged().len(), MAX_ENGAGED);
        assert!(!state.engaged().contains("0"));
        assert!(state.engaged().contains("599"));
        assert!(!state.is_running(ActionKind::Engage));
        assert!(state.last_run(ActionKind::Engage).is_some());
    }

    #[tokio::test]
    async fn failed_model_call_records_one_failure_row() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Script::fail(ProviderError::Network("down".into())),
            Script::fail(ProviderError::Network("down".into())),
        ]));
        let (scheduler, ledger) = scheduler(Arc::new(FakePlatform::default()), provider, fast());

        let metric = scheduler.run_scheduled_action(ActionKind::CreatePost).await;
        assert_eq!(metric.outcome, Outcome::Failure);
        let rows = ledger.all().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, ActionKind::CreatePost);
        assert!(rows[0].error.as_deref().unwrap().contains("Model call failed"));
    }

    #[tokio::test]
    async fn slow_action_times_out_as_failure() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::slow(Duration::from_secs(30), "late")]));
        let settings = SchedulerSettings {
            post_every: Duration::from_millis(100),
            ..fast()
        };
        let (scheduler, _) = scheduler(Arc::new(FakePlatform::default()), provider, settings);
        let metric = scheduler.run_scheduled_action(ActionKind::CreatePost).await;
        assert_eq!(metric.outcome, Outcome::Failure);
        assert!(metric.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn startup_runs_setup_learn_post_in_order() {
        let platform = Arc::new(FakePlatform::with_posts(vec![post("p1", "Bitcoin", "alice", "crypto")]));
        let provider = Arc::new(ScriptedProvider::new(vec![
            Script::tools(vec![tool_call(
                "a",
                "moltbook_create_post",
                serde_json::json!({"title": "t", "body": "b", "submolt": "general"}),
            )]),
            Script::text("t"),
        ]));
        let (scheduler, ledger) = scheduler(platform.clone(), provider, fast());

        let metrics = scheduler.on_startup().await;
        let kinds: Vec<_> = metrics.iter().map(|m| m.kind).collect();
        assert_eq!(kinds, STARTUP_SEQUENCE.to_vec());
        assert!(metrics.iter().all(|m| m.outcome == Outcome::Success));
        assert_eq!(metrics[0].counter(counters::SUBSCRIPTIONS), 1);
        assert_eq!(metrics[1].counter(counters::TOPICS_LEARNED), 2);
        assert_eq!(ledger.all().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn failure_in_one_kind_does_not_stop_other_timers() {
        // Every feed read fails, so learn and engage both fail; the loop
        // keeps ticking both kinds.
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let (scheduler, ledger) = scheduler(Arc::new(FakePlatform::failing()), provider, fast());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&scheduler).run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(500)).await;
        shutdown.cancel();
        task.await.unwrap();

        let rows = ledger.all().await.unwrap();
        let learn_runs = rows
            .iter()
            .filter(|m| m.kind == ActionKind::LearnAndBrowse && m.outcome == Outcome::Failure)
            .count();
        let engage_runs = rows.iter().filter(|m| m.kind == ActionKind::Engage).count();
        // One startup learn plus at least two timer ticks.
        assert!(learn_runs >= 3, "learn runs: {learn_runs}");
        assert!(engage_runs >= 1, "engage runs: {engage_runs}");
    }

    #[tokio::test]
    async fn repeated_post_failures_leave_learning_on_schedule() {
        // No scripted answers: every post run fails its model call, while
        // learning needs no model at all.
        let platform = Arc::new(FakePlatform::with_posts(vec![post("p1", "Bitcoin", "alice", "crypto")]));
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let settings = SchedulerSettings {
            learn_every: Duration::from_millis(100),
            engage_every: Duration::from_secs(3600),
            post_every: Duration::from_millis(120),
            timeout_fraction: 0.8,
        };
        let (scheduler, ledger) = scheduler(platform, provider, settings);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&scheduler).run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(550)).await;
        shutdown.cancel();
        task.await.unwrap();

        let rows = ledger.all().await.unwrap();
        let post_failures: Vec<usize> = rows
            .iter()
            .enumerate()
            .filter(|(_, m)| m.kind == ActionKind::CreatePost && m.outcome == Outcome::Failure)
            .map(|(i, _)| i)
            .collect();
        // The startup post plus at least two timer ticks.
        assert!(post_failures.len() >= 3, "post failures: {}", post_failures.len());
        assert!(rows.iter().all(|m| m.kind != ActionKind::CreatePost || m.outcome == Outcome::Failure));

        let second_tick_failure = post_failures[2];
        let learned_after = rows[second_tick_failure..]
            .iter()
            .filter(|m| m.kind == ActionKind::LearnAndBrowse && m.outcome == Outcome::Success)
            .count();
        assert!(learned_after >= 1, "no learn run after repeated post failures");
    }

    #[tokio::test]
    async fn tick_while_in_flight_is_skipped() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let (scheduler, ledger) = scheduler(Arc::new(FakePlatform::default()), provider, fast());
        let mut state = SchedulerState::default();
        let mut tasks = JoinSet::new();

        assert!(state.begin(ActionKind::CreatePost));
        scheduler.fire(ActionKind::CreatePost, &mut state, &mut tasks).await;
        assert!(tasks.is_empty());

        let rows = ledger.all().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].outcome, Outcome::Skipped);
        assert!(state.is_running(ActionKind::CreatePost));
    }
}
