//! Strategy command - run extraction strategies against local files.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, anyhow};
use clap::{Args, Subcommand};
use console::{Style, style};
use trawler_sandbox::SandboxError;

use super::{Context, truncate};

/// Arguments for the strategy command.
#[derive(Args, Debug)]
pub struct StrategyArgs {
    #[command(subcommand)]
    pub command: StrategyCommand,
}

#[derive(Subcommand, Debug)]
pub enum StrategyCommand {
    /// Run a strategy against a document and print the extracted records
    Test {
        /// Strategy script defining `extract_tools`
        script: PathBuf,

        /// Document passed to the strategy
        document: PathBuf,
    },

    /// Compile a strategy without running it
    Check {
        /// Strategy script defining `extract_tools`
        script: PathBuf,
    },
}

/// Run the strategy command.
pub async fn run(args: StrategyArgs, ctx: &Context) -> Result<()> {
    match args.command {
        StrategyCommand::Test { script, document } => cmd_test(&script, &document, ctx).await,
        StrategyCommand::Check { script } => cmd_check(&script, ctx),
    }
}

async fn cmd_test(script: &Path, document: &Path, ctx: &Context) -> Result<()> {
    let implementation = read(script)?;
    let document = read(document)?;

    let records = ctx
        .sandbox()
        .execute(&implementation, &document)
        .await
        .map_err(describe)?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!("{}", style(format!("Extracted {} record(s)", records.len())).bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    for record in &records {
        println!("  {} {}", style(&record.name).cyan(), dim.apply_to(&record.url));
        println!("    {}", truncate(&record.description, 70));
        if !record.tags.is_empty() {
            println!("    {}", dim.apply_to(record.tags.join(", ")));
        }
    }
    Ok(())
}

fn cmd_check(script: &Path, ctx: &Context) -> Result<()> {
    let implementation = read(script)?;
    ctx.sandbox().check(&implementation).map_err(describe)?;

    if ctx.json_output {
        println!("{}", serde_json::json!({ "ok": true }));
    } else {
        println!("{} {}", Style::new().green().apply_to("OK"), script.display());
    }
    Ok(())
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn describe(err: SandboxError) -> anyhow::Error {
    anyhow!("{}: {}", err.kind(), err)
}
