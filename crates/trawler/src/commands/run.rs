//! Run command - execute the crawl pipeline once.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Args;
use console::{Style, style};
use serde_json::json;
use trawler_pipeline::{CRAWL_WORKFLOW, CrawlSummary, ExecutionSnapshot, StateBag, WorkflowStatus};

use super::Context;

/// How often the execution store is polled while waiting.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Arguments for the run command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Recrawl sources not crawled within this many hours
    #[arg(long)]
    pub threshold: Option<u64>,

    /// Maximum number of sources crawled at once
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Extra seed list (TOML) registered before crawling
    #[arg(long)]
    pub sources_file: Option<PathBuf>,

    /// Give up waiting after this many seconds
    #[arg(long, default_value = "3600")]
    pub timeout: u64,
}

/// Run the run command.
pub async fn run(args: RunArgs, ctx: &Context) -> Result<()> {
    let orchestrator = ctx.orchestrator()?;
    let dim = Style::new().dim();

    let recovered = orchestrator.recover_interrupted().await?;
    if recovered > 0 && !ctx.json_output {
        println!(
            "{}",
            dim.apply_to(format!("Marked {recovered} interrupted execution(s) as aborted"))
        );
    }

    let input = build_input(&args, ctx);
    let started = orchestrator.start(CRAWL_WORKFLOW, input).await?;
    if ctx.verbose && !ctx.json_output {
        println!("{}", dim.apply_to(format!("Execution {}", started.execution_id)));
    }

    let snapshot = orchestrator
        .wait(
            started.execution_id,
            POLL_INTERVAL,
            Duration::from_secs(args.timeout),
        )
        .await?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_summary(&snapshot);
    }

    if snapshot.status() != WorkflowStatus::Succeeded {
        bail!(
            "execution {} ended {}{}",
            snapshot.id(),
            snapshot.status(),
            snapshot
                .execution
                .error
                .as_deref()
                .map(|e| format!(": {e}"))
                .unwrap_or_default()
        );
    }
    Ok(())
}

fn build_input(args: &RunArgs, ctx: &Context) -> StateBag {
    let threshold = args
        .threshold
        .unwrap_or(ctx.config.crawler().recrawl_threshold_hours);

    let mut input = StateBag::new();
    input.insert("timeThreshold".into(), json!(threshold));
    if let Some(limit) = args.concurrency {
        input.insert("concurrencyLimit".into(), json!(limit));
    }
    if let Some(path) = &args.sources_file {
        input.insert("sourcesFile".into(), json!(path.display().to_string()));
    }
    input
}

fn print_summary(snapshot: &ExecutionSnapshot) {
    let dim = Style::new().dim();
    let status = snapshot.status();
    let status_style = match status {
        WorkflowStatus::Succeeded => Style::new().green(),
        WorkflowStatus::Failed | WorkflowStatus::Aborted => Style::new().red(),
        _ => Style::new().yellow(),
    };

    println!("{}", style("Crawl Execution").bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    println!("  {} {}", dim.apply_to("Execution:"), snapshot.id());
    println!("  {} {}", dim.apply_to("Status:   "), status_style.apply_to(status));

    if let Some(summary) = snapshot
        .output_value("summary")
        .and_then(|v| serde_json::from_value::<CrawlSummary>(v.clone()).ok())
    {
        println!(
            "  {} {} ({} ok, {} failed)",
            dim.apply_to("Sources:  "),
            summary.total_sources,
            summary.success_count,
            summary.failure_count
        );
        println!(
            "  {} {} ({} new, {} updated)",
            dim.apply_to("Tools:    "),
            summary.total_tools,
            summary.new_tools,
            summary.updated_tools
        );
    }
    if let Some(size) = snapshot.output_value("catalogSize") {
        println!("  {} {}", dim.apply_to("Catalog:  "), size);
    }
    if let Some(message) = snapshot.output_value("message").and_then(|v| v.as_str()) {
        println!("  {} {}", dim.apply_to("Message:  "), message);
    }

    println!();
    for step in &snapshot.steps {
        println!(
            "  {:<24} {:<10} {}",
            step.name,
            step.status.as_str(),
            dim.apply_to(format!("attempts: {}", step.attempts))
        );
    }
}
