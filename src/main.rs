use anyhow::{Context, Result};
use clap::Parser;
use nosgraph::config::Config;
use nosgraph::logging::init_logging;
use std::path::Path;

mod cli;

#[derive(Parser)]
#[command(name = "nosgraph")]
#[command(about = "Validate, merge and query Nostr events and the follow graph")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: cli::Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "nosgraph.toml")]
    config: String,

    /// Log level (overrides logging.level; RUST_LOG wins over both)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // A missing config file is fine; every section has defaults.
    let mut config = if Path::new(shellexpand::tilde(&cli.config).as_ref()).exists() {
        Config::load_from_file(&cli.config)
            .with_context(|| format!("Failed to load config from {}", cli.config))?
    } else {
        Config::default()
    };
    config.expand_paths();

    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    init_logging(level)?;

    config
        .validate()
        .with_context(|| "Configuration validation failed")?;

    tracing::debug!(backend = ?config.store.backend, path = %config.store.path, "configuration loaded");
    cli::handle_command(cli.command, &config).await
}
