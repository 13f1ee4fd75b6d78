//! Sources command - manage crawl sources.

use anyhow::Result;
use clap::{Args, Subcommand};
use console::{Style, style};
use trawler_catalog::{SourceStore, SourceType, add_source_by_url, seed_sources};

use super::Context;

/// Arguments for the sources command.
#[derive(Args, Debug)]
pub struct SourcesArgs {
    #[command(subcommand)]
    pub command: SourcesCommand,
}

#[derive(Subcommand, Debug)]
pub enum SourcesCommand {
    /// List registered sources
    List,

    /// Register a source by URL
    Add {
        /// Source URL
        url: String,

        /// Display name (derived from the domain if omitted)
        #[arg(short, long)]
        name: Option<String>,

        /// Source type (detected from the URL if omitted)
        #[arg(short = 't', long = "type")]
        source_type: Option<SourceType>,
    },

    /// Register the sources from the [sources] config section
    Seed,
}

/// Run the sources command.
pub async fn run(args: SourcesArgs, ctx: &Context) -> Result<()> {
    match args.command {
        SourcesCommand::List => cmd_list(ctx).await,
        SourcesCommand::Add {
            url,
            name,
            source_type,
        } => cmd_add(&url, name.as_deref(), source_type, ctx).await,
        SourcesCommand::Seed => cmd_seed(ctx).await,
    }
}

async fn cmd_list(ctx: &Context) -> Result<()> {
    let catalog = ctx.catalog()?;
    let sources = SourceStore::list_all(catalog.as_ref()).await?;

    let dim = Style::new().dim();
    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&sources)?);
        return Ok(());
    }
    if sources.is_empty() {
        println!("{}", dim.apply_to("No sources registered"));
        return Ok(());
    }

    println!("{}", style("Sources").bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    for source in &sources {
        let last = source
            .last_crawled
            .map(|t| {
                let status = source
                    .last_crawl_status
                    .map(|s| s.as_str())
                    .unwrap_or("unknown");
                format!("{} ({status})", t.format("%Y-%m-%d %H:%M"))
            })
            .unwrap_or_else(|| "never crawled".to_string());
        println!("  {} {}", style(&source.name).cyan(), source.url);
        println!(
            "    {} {}",
            dim.apply_to(source.source_type.as_str()),
            dim.apply_to(last)
        );
    }
    Ok(())
}

async fn cmd_add(
    url: &str,
    name: Option<&str>,
    source_type: Option<SourceType>,
    ctx: &Context,
) -> Result<()> {
    let catalog = ctx.catalog()?;
    let source = add_source_by_url(catalog.as_ref(), url, name, source_type).await?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&source)?);
    } else {
        println!(
            "{} {} {}",
            Style::new().green().apply_to("Registered"),
            style(&source.name).bold(),
            Style::new().dim().apply_to(format!("({})", source.source_type))
        );
    }
    Ok(())
}

async fn cmd_seed(ctx: &Context) -> Result<()> {
    let catalog = ctx.catalog()?;
    let settings = ctx.crawl_settings()?;
    let added = seed_sources(catalog.as_ref(), &settings.seeds).await?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&added)?);
    } else if added.is_empty() {
        println!("{}", Style::new().dim().apply_to("All configured sources already registered"));
    } else {
        println!("{}", style(format!("Added {} source(s)", added.len())).bold());
        for source in &added {
            println!("  {} {}", style(&source.name).cyan(), source.url);
        }
    }
    Ok(())
}
