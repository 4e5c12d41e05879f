//! CLI argument parsing using clap.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Security monitoring watchers
#[derive(Parser, Debug)]
#[command(
    name = "r4dar",
    version = env!("CARGO_PKG_VERSION"),
    about = "Run pluggable security monitors behind one webhook listener",
    next_line_help = true,
    styles = clap_cargo_style()
)]
pub struct Cli {
    /// Path to the configuration file (default: r4dar.toml, or $R4DAR_CONFIG)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the configured watchers and serve webhooks until Ctrl+C
    #[command(
        after_help = "Examples:\n  r4dar run\n  r4dar run --watchers repo_watcher,github_webhook --port 9090\n  R4DAR_WATCHERS=github_webhook r4dar run"
    )]
    Run {
        /// Comma-separated watcher names; forces the subsystem on
        #[arg(short, long, value_name = "NAMES")]
        watchers: Option<String>,

        /// Webhook listener port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// List discovered watcher plugins
    Watchers,

    /// Show the effective configuration and watcher plan
    Config,

    /// Queue a one-shot GitHub repository sync
    Sync {
        /// Limit the sync to one repository (owner/name)
        repository: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_overrides() {
        let cli = Cli::try_parse_from([
            "r4dar",
            "--config",
            "alt.toml",
            "run",
            "--watchers",
            "a,b",
            "--port",
            "9090",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("alt.toml")));
        match cli.command {
            Commands::Run { watchers, port } => {
                assert_eq!(watchers.as_deref(), Some("a,b"));
                assert_eq!(port, Some(9090));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
