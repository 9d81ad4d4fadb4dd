//! bqgate - query BigQuery through its MCP endpoint.
//!
//! This is the main entry point for the bqgate CLI.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use commands::*;
use config::Config;
use std::path::PathBuf;
use tracing::debug;

#[derive(Parser)]
#[command(name = "bqgate")]
#[command(author, version, about = "Query BigQuery through its MCP endpoint", long_about = None)]
struct Cli {
    /// Configuration file (skips the global and working-directory lookup)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage Google credentials
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    /// List the tools offered by the endpoint
    Tools,
    /// Read rows of a table
    Query {
        /// Table as project.dataset.table
        table: String,
        /// Maximum number of rows
        #[arg(short, long, default_value_t = DEFAULT_QUERY_LIMIT)]
        limit: u32,
    },
    /// Call a tool directly
    Call {
        /// Tool name
        tool: String,
        /// Tool arguments as a JSON object
        #[arg(short, long)]
        args: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let cwd = std::env::current_dir()?;
    let (config, sources) = Config::load(cli.config.as_deref(), &cwd).await?;
    for source in &sources {
        debug!(path = %source.display(), "Loaded configuration");
    }

    match cli.command {
        Commands::Auth { command } => handle_auth(command, &config).await,
        Commands::Tools => list_tools(&config).await,
        Commands::Query { table, limit } => query_table(&config, &table, limit).await,
        Commands::Call { tool, args } => call_tool(&config, &tool, args.as_deref()).await,
    }
}
