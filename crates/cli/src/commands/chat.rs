//! `clawdvc chat` — Terminal chat, interactive or single-message.

use clawdvc_channels::TerminalTransport;
use clawdvc_channels::terminal::TERMINAL_USER;
use clawdvc_config::AppConfig;
use clawdvc_core::channel::{ChatKind, InboundEvent};
use clawdvc_core::message::Identity;
use clawdvc_security::AccessPolicy;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::wiring::Engine;

pub async fn run(message: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set ANTHROPIC_API_KEY, or add api_key to:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let engine = Engine::build(config).await?;
    engine.log_events();
    let dispatcher = engine.dispatcher(
        Arc::new(TerminalTransport::new()),
        AccessPolicy::open(vec![TERMINAL_USER.to_string()]),
    );

    if let Some(text) = message {
        let event = InboundEvent::new(
            TerminalTransport::conversation(),
            Identity::from(TERMINAL_USER),
            ChatKind::Private,
            text,
        );
        dispatcher.handle_inbound_event(event).await.wait().await;
        println!();
        return Ok(());
    }

    println!();
    println!("  ClawdVC — Interactive Mode");
    println!();
    println!("  Model:  {}", engine.config.model);
    println!("  Tools:  {}", engine.tools.len());
    println!();
    println!("  Type a message, or /help for commands.");
    println!("  Type 'exit' or Ctrl+C to quit.");

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        });
    }
    dispatcher.run(shutdown).await?;
    println!();
    Ok(())
}
