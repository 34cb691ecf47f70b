//! `clawdvc run` — Telegram dispatcher plus the autonomous scheduler.

use clawdvc_channels::TelegramTransport;
use clawdvc_config::AppConfig;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::wiring::Engine;

pub async fn run(with_scheduler: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let token = config
        .telegram
        .bot_token
        .clone()
        .filter(|t| !t.trim().is_empty())
        .ok_or("TELEGRAM_BOT_TOKEN is not set")?;

    let engine = Engine::build(config).await?;
    engine.log_events();

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutting down");
                shutdown.cancel();
            }
        });
    }

    let scheduler = if !with_scheduler || !engine.config.scheduler.enabled {
        info!("Scheduler disabled");
        None
    } else if !engine.has_platform_key() {
        warn!("MOLTBOOK_API_KEY is not set; scheduler disabled");
        None
    } else {
        let scheduler = engine.scheduler();
        Some(tokio::spawn(scheduler.run(shutdown.clone())))
    };

    let dispatcher = engine.dispatcher(Arc::new(TelegramTransport::new(token)), engine.telegram_policy());
    let served = dispatcher.run(shutdown.clone()).await;
    shutdown.cancel();

    if let Some(handle) = scheduler {
        if let Err(e) = handle.await {
            warn!(error = %e, "Scheduler task ended abnormally");
        }
    }
    served?;
    Ok(())
}
