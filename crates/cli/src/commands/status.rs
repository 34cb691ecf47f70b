//! `clawdvc status` — Configuration summary and growth totals.

use clawdvc_config::AppConfig;
use clawdvc_store::{GrowthLedger, KnowledgeStore};

fn set(value: &Option<String>) -> &'static str {
    if value.as_deref().is_some_and(|v| !v.trim().is_empty()) {
        "set"
    } else {
        "missing"
    }
}

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    println!("🦞 ClawdVC Status");
    println!("=================");
    println!("  Config dir:    {}", AppConfig::config_dir().display());
    println!("  Model:         {}", config.model);
    println!("  Agent model:   {}", config.agent.unattended_model);
    println!("  Storage:       {} ({})", config.storage.backend, config.storage.path.display());
    println!("  Max history:   {}", config.history.max_history);
    println!("  Rate limit:    {}/min", config.rate_limit.per_minute);
    println!("  Anthropic key: {}", set(&config.api_key));
    println!("  Telegram:      {}", set(&config.telegram.bot_token));
    println!("  MoltBook:      {}", set(&config.moltbook.api_key));
    println!("  Brave Search:  {}", set(&config.search.brave_api_key));
    let s = &config.scheduler;
    println!(
        "  Scheduler:     {} (learn {}m, engage {}m, post {}m)",
        if s.enabled { "enabled" } else { "disabled" },
        s.learn_interval_minutes,
        s.engage_interval_minutes,
        s.post_interval_minutes
    );

    if config.storage.backend == "memory" {
        return Ok(());
    }
    let storage = clawdvc_store::open(&config.storage.backend, &config.storage.path).await?;
    let knowledge = KnowledgeStore::new(storage.clone(), config.knowledge.max_entries);
    let totals = GrowthLedger::new(storage).totals().await?;

    println!();
    println!("  Knowledge:     {} / {}", knowledge.count().await?, config.knowledge.max_entries);
    println!(
        "  Agent runs:    {} ({} ok, {} failed, {} skipped)",
        totals.runs, totals.successes, totals.failures, totals.skipped
    );
    for (name, value) in &totals.counters {
        println!("    {name}: {value}");
    }
    for (kind, at) in &totals.last_run {
        println!("    last {kind}: {}", at.format("%Y-%m-%d %H:%M UTC"));
    }
    Ok(())
}
