//! Hixs CLI - the browser core without the browser
//!
//! Runs the request blocker and the download pipeline from a terminal, using
//! the same settings file as the desktop browser.

mod commands;
mod output;
mod progress;

use anyhow::Result;
use clap::{Parser, Subcommand};
use hixs_core::config::SettingsStore;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Hixs - privacy-first browser core
#[derive(Parser)]
#[command(name = "hixs")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Settings file
    #[arg(long, env = "HIXS_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "human")]
    output: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// Download one or more URLs (Ctrl-C cancels)
    Get {
        /// URLs to download
        #[arg(required = true)]
        urls: Vec<String>,

        /// Directory to save into, instead of the configured one
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// File name to save as (single URL only)
        #[arg(short, long)]
        name: Option<String>,

        /// Content type to assume when the server sends none
        #[arg(long = "type")]
        content_type: Option<String>,
    },

    /// Classify URLs against the blocklist
    Check {
        /// URLs to check
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// List the active blocklist patterns
    Patterns {
        /// Only print how many there are
        #[arg(short, long)]
        count: bool,
    },

    /// Show/update settings
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get {
        /// Config key
        key: String,
    },

    /// Set a config value
    Set {
        /// Config key
        key: String,

        /// Config value
        value: String,
    },

    /// Show all config
    Show,

    /// Reset to defaults
    Reset {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Print the settings file location
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    let store = SettingsStore::new(cli.config.unwrap_or_else(SettingsStore::default_path));

    match cli.command {
        Commands::Get {
            urls,
            dir,
            name,
            content_type,
        } => commands::get(&store, urls, dir, name, content_type, cli.output).await?,

        Commands::Check { urls } => commands::check(&store, urls, cli.output).await?,

        Commands::Patterns { count } => commands::patterns(&store, count, cli.output).await?,

        Commands::Config { action } => commands::config_action(&store, action, cli.output).await?,

        Commands::Completions { shell } => {
            use clap::CommandFactory;
            clap_complete::generate(shell, &mut Cli::command(), "hixs", &mut std::io::stdout());
        }
    }

    Ok(())
}
