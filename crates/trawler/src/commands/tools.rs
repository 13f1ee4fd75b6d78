//! Tools command - browse the discovered tool catalog.

use anyhow::Result;
use clap::{Args, Subcommand};
use console::{Style, style};
use trawler_catalog::ToolStore;

use super::{Context, truncate};

/// Arguments for the tools command.
#[derive(Args, Debug)]
pub struct ToolsArgs {
    #[command(subcommand)]
    pub command: ToolsCommand,
}

#[derive(Subcommand, Debug)]
pub enum ToolsCommand {
    /// List discovered tools
    List {
        /// Only show tools discovered from this source URL
        #[arg(short, long)]
        source: Option<String>,

        /// Maximum tools to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },
}

/// Run the tools command.
pub async fn run(args: ToolsArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ToolsCommand::List { source, limit } => cmd_list(source.as_deref(), limit, ctx).await,
    }
}

async fn cmd_list(source: Option<&str>, limit: usize, ctx: &Context) -> Result<()> {
    let catalog = ctx.catalog()?;
    let mut tools = ToolStore::list_all(catalog.as_ref()).await?;
    if let Some(source) = source {
        tools.retain(|t| t.source_url == source);
    }
    let total = tools.len();
    tools.truncate(limit);

    let dim = Style::new().dim();
    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&tools)?);
        return Ok(());
    }
    if tools.is_empty() {
        println!("{}", dim.apply_to("No tools discovered yet"));
        return Ok(());
    }

    println!("{}", style(format!("Tools ({total})")).bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    for tool in &tools {
        println!("  {} {}", style(&tool.name).cyan(), dim.apply_to(&tool.url));
        println!("    {}", truncate(&tool.description, 70));
    }
    if total > tools.len() {
        println!();
        println!(
            "{}",
            dim.apply_to(format!("... {} more (use --limit)", total - tools.len()))
        );
    }
    Ok(())
}
