//! trawler - crawls remote sources for MCP tools
//!
//! Main entry point for the trawler CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

mod commands;

use commands::{executions, run, sources, strategy, tools};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// trawler - crawls remote sources for MCP tools
#[derive(Parser)]
#[command(name = "trawler")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Directory holding config.toml (default: platform config dir)
    #[arg(long, global = true, env = "TRAWLER_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    /// Directory holding the databases and logs (default: platform data dir)
    #[arg(long, global = true, env = "TRAWLER_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the crawl pipeline and wait for it to finish
    Run(run::RunArgs),

    /// Inspect past and running executions
    Executions(executions::ExecutionsArgs),

    /// Manage crawl sources
    Sources(sources::SourcesArgs),

    /// Browse discovered tools
    Tools(tools::ToolsArgs),

    /// Try extraction strategies locally
    Strategy(strategy::StrategyArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = trawler_config::load_config_with_options(None, cli.config_dir.as_deref())?;
    let config = loaded.config.clone();
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => config.storage().resolve_data_dir()?,
    };

    // Initialize tracing: console (human-readable, stderr) + rotating JSON file
    let filter = if cli.verbose {
        "trawler=debug,trawler_pipeline=debug,trawler_catalog=debug,trawler_sandbox=debug,trawler_config=debug,info"
    } else {
        "trawler=info,trawler_pipeline=info,trawler_catalog=info,trawler_sandbox=warn,warn"
    };
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let logging = config.logging();
    let (file_layer, _guard) = if logging.file {
        let log_dir = logging
            .directory
            .clone()
            .unwrap_or_else(|| data_dir.join("logs"));
        let file_appender = tracing_appender::rolling::daily(&log_dir, "trawler.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_filter(EnvFilter::new(
                "trawler=trace,trawler_pipeline=trace,trawler_catalog=trace,trawler_sandbox=debug,trawler_config=trace,info",
            ));
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .with(file_layer)
        .init();

    for warning in &loaded.warnings {
        tracing::warn!("{warning}");
    }
    for path in loaded.loaded_from() {
        tracing::debug!(path = %path.display(), "Loaded config layer");
    }

    // Create context for commands
    let ctx = commands::Context {
        json_output: cli.json,
        verbose: cli.verbose,
        config,
        data_dir,
    };

    // Dispatch to command handlers
    match cli.command {
        Commands::Run(args) => run::run(args, &ctx).await,
        Commands::Executions(args) => executions::run(args, &ctx).await,
        Commands::Sources(args) => sources::run(args, &ctx).await,
        Commands::Tools(args) => tools::run(args, &ctx).await,
        Commands::Strategy(args) => strategy::run(args, &ctx).await,
    }
}
