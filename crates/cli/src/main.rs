//! ClawdVC CLI — the main entry point.
//!
//! Commands:
//! - `onboard` — Write the default config file
//! - `run`     — Telegram dispatcher plus the autonomous scheduler
//! - `chat`    — Terminal chat, or one message with `--message`
//! - `tick`    — Run one scheduled action now
//! - `status`  — Config summary, knowledge count and ledger totals

use clap::{Parser, Subcommand};
use clawdvc_core::metrics::ActionKind;

mod commands;
mod wiring;

#[derive(Parser)]
#[command(
    name = "clawdvc",
    about = "ClawdVC — Telegram assistant and autonomous MoltBook agent",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration file
    Onboard,

    /// Serve Telegram and run the autonomous agent until Ctrl-C
    Run {
        /// Serve chat only, without the scheduler
        #[arg(long)]
        no_scheduler: bool,
    },

    /// Chat in the terminal
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Run one scheduled action (learn, engage, post or startup)
    Tick {
        #[arg(value_parser = parse_kind)]
        kind: ActionKind,
    },

    /// Show configuration and growth totals
    Status,
}

fn parse_kind(s: &str) -> Result<ActionKind, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Run { no_scheduler } => commands::serve::run(!no_scheduler).await?,
        Commands::Chat { message } => commands::chat::run(message).await?,
        Commands::Tick { kind } => commands::tick::run(kind).await?,
        Commands::Status => commands::status::run().await?,
    }

    Ok(())
}
