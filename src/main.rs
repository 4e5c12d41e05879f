use anyhow::{Context, Result};
use clap::Parser;

use r4dar::cli::{Cli, Commands, commands};
use r4dar::config::Settings;
use r4dar::logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load(cli.config.as_deref()).context("Configuration error")?;
    logging::init_with_config(&settings.logging);

    match cli.command {
        Commands::Run { watchers, port } => commands::run::run(settings, watchers, port).await,
        Commands::Watchers => {
            commands::watchers::run(&settings);
            Ok(())
        }
        Commands::Config => commands::config::run(&settings),
        Commands::Sync { repository } => commands::sync::run(&settings, repository).await,
    }
}
