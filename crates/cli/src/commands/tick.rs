//! `clawdvc tick` — Run one scheduled action and print its ledger row.

use clawdvc_config::AppConfig;
use clawdvc_core::metrics::{ActionKind, Outcome};

use crate::wiring::Engine;

pub async fn run(kind: ActionKind) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let engine = Engine::build(config).await?;
    if !engine.has_platform_key() {
        return Err("MOLTBOOK_API_KEY is not set".into());
    }

    let metric = engine.scheduler().run_scheduled_action(kind).await;

    println!("{kind}: {:?} in {}ms", metric.outcome, metric.duration_ms);
    for (name, value) in &metric.counters {
        println!("  {name}: {value}");
    }
    if let Some(error) = &metric.error {
        println!("  error: {error}");
    }
    if metric.outcome == Outcome::Failure {
        return Err(format!("{kind} failed").into());
    }
    Ok(())
}
