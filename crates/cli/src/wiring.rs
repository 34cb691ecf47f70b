//! Builds the engine's collaborators from configuration.

use clawdvc_agent::{Dispatcher, DispatcherDeps, DispatcherSettings, Orchestrator};
use clawdvc_config::AppConfig;
use clawdvc_core::channel::ChatTransport;
use clawdvc_core::event::EventBus;
use clawdvc_core::provider::Provider;
use clawdvc_core::tool::ToolRegistry;
use clawdvc_security::{AccessPolicy, RateLimiter, SecretsManager};
use clawdvc_store::{AccountStore, GrowthLedger, HistoryStore, KnowledgeStore};
use clawdvc_tools::{BirdCli, CoinGeckoClient, MarketData, MoltbookClient, SocialPlatform, ToolDeps};
use clawdvc_workflow::{Actions, Scheduler, SchedulerSettings};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

type BoxError = Box<dyn std::error::Error>;

const KEY_FILE: &str = ".account_key";

pub struct Engine {
    pub config: AppConfig,
    pub bus: Arc<EventBus>,
    pub history: Arc<HistoryStore>,
    pub knowledge: Arc<KnowledgeStore>,
    pub ledger: Arc<GrowthLedger>,
    pub accounts: Arc<AccountStore>,
    pub market: Arc<dyn MarketData>,
    pub platform: Arc<dyn SocialPlatform>,
    pub tools: Arc<ToolRegistry>,
    provider: Arc<dyn Provider>,
}

impl Engine {
    pub async fn build(config: AppConfig) -> Result<Self, BoxError> {
        let provider = clawdvc_providers::build_from_config(&config)?;
        let storage = clawdvc_store::open(&config.storage.backend, &config.storage.path).await?;

        let secrets = match config.accounts.secret.as_deref() {
            Some(secret) => SecretsManager::new(secret),
            None => SecretsManager::from_key_file(&key_file_path(&config))?,
        };

        let history = Arc::new(HistoryStore::new(storage.clone(), config.history.max_history));
        let knowledge = Arc::new(KnowledgeStore::new(storage.clone(), config.knowledge.max_entries));
        let ledger = Arc::new(GrowthLedger::new(storage.clone()));
        let accounts = Arc::new(AccountStore::new(storage, secrets));

        let market: Arc<dyn MarketData> = Arc::new(CoinGeckoClient::new(&config.market.base_url));
        let platform: Arc<dyn SocialPlatform> = Arc::new(MoltbookClient::new(
            &config.moltbook.base_url,
            config.moltbook.api_key.clone().unwrap_or_default(),
        ));

        let tools = Arc::new(clawdvc_tools::default_registry(ToolDeps {
            market: market.clone(),
            platform: platform.clone(),
            knowledge: knowledge.clone(),
            accounts: accounts.clone(),
            account_client: Arc::new(BirdCli::new(&config.accounts.cli_path)),
            brave_api_key: config.search.brave_api_key.clone(),
        }));

        Ok(Self {
            config,
            bus: Arc::new(EventBus::default()),
            history,
            knowledge,
            ledger,
            accounts,
            market,
            platform,
            tools,
            provider,
        })
    }

    /// Whether the autonomous agent can act on MoltBook.
    pub fn has_platform_key(&self) -> bool {
        self.config.moltbook.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::from_config(self.provider.clone(), self.tools.clone(), &self.config)
            .with_event_bus(self.bus.clone())
    }

    pub fn dispatcher(&self, transport: Arc<dyn ChatTransport>, policy: AccessPolicy) -> Arc<Dispatcher> {
        let deps = DispatcherDeps {
            transport,
            orchestrator: Arc::new(self.orchestrator()),
            history: self.history.clone(),
            knowledge: self.knowledge.clone(),
            limiter: Arc::new(RateLimiter::per_minute(self.config.rate_limit.per_minute)),
            policy,
            market: self.market.clone(),
            accounts: self.accounts.clone(),
            ledger: self.ledger.clone(),
        };
        Arc::new(
            Dispatcher::new(deps, DispatcherSettings::from_config(&self.config)).with_event_bus(self.bus.clone()),
        )
    }

    pub fn telegram_policy(&self) -> AccessPolicy {
        AccessPolicy::new(
            self.config.telegram.allowed_users.clone(),
            self.config.telegram.admin_ids.clone(),
        )
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        let orchestrator = self.orchestrator().with_model(&self.config.agent.unattended_model);
        let actions = Actions::new(
            Arc::new(orchestrator),
            self.platform.clone(),
            self.knowledge.clone(),
            self.ledger.clone(),
        )
        .with_submolts(self.config.scheduler.submolts.clone())
        .with_engage_batch(self.config.scheduler.engage_batch);
        Arc::new(
            Scheduler::new(actions, SchedulerSettings::from_config(&self.config)).with_event_bus(self.bus.clone()),
        )
    }

    /// Log every domain event at debug level.
    pub fn log_events(&self) {
        let mut events = self.bus.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => debug!(event = ?event, "Domain event"),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        debug!(missed, "Event observer lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}

/// The generated credential key lives next to the database.
fn key_file_path(config: &AppConfig) -> PathBuf {
    let path = &config.storage.path;
    let dir = if config.storage.backend == "file" {
        Some(path.as_path())
    } else {
        path.parent().filter(|p| !p.as_os_str().is_empty())
    };
    dir.map(|d| d.join(KEY_FILE)).unwrap_or_else(|| PathBuf::from(KEY_FILE))
}
