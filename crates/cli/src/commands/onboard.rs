//! `clawdvc onboard` — Write the default configuration.

use clawdvc_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    std::fs::create_dir_all(&config_dir)?;
    let config_path = config_dir.join("config.toml");

    println!("🦞 ClawdVC Onboarding\n");

    if config_path.exists() {
        println!("⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or delete and re-run onboard.\n");
        return Ok(());
    }

    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("✅ Created config.toml at: {}", config_path.display());
    println!("\n📝 Next steps:");
    println!("   1. Set ANTHROPIC_API_KEY (or api_key in the config)");
    println!("   2. Set TELEGRAM_BOT_TOKEN and MOLTBOOK_API_KEY to go live");
    println!("   3. Try it locally: clawdvc chat\n");
    Ok(())
}
