//! LiveSQL CLI
//!
//! Command-line interface for running statements and watching live queries
//! against a SQLite database

use clap::{Parser, Subcommand};
use livesql_live::LiveConfig;
use std::path::PathBuf;

mod commands;

#[derive(Debug, Parser)]
#[command(name = "livesql")]
#[command(about = "LiveSQL - live queries over SQLite", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one statement and print its result as JSON
    Query(commands::query::QueryArgs),
    /// Register a live query, run statements, print every update
    Watch(commands::watch::WatchArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match cli.config.as_deref().map(LiveConfig::load) {
        None => LiveConfig::default(),
        Some(Ok(config)) => config,
        Some(Err(e)) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    livesql_logging::init(config.log_profile);

    let mut stdout = std::io::stdout();
    let result = match cli.command {
        Commands::Query(args) => commands::query::execute(args, &config, &mut stdout).await,
        Commands::Watch(args) => commands::watch::execute(args, &config, &mut stdout).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
