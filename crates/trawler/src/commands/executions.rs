//! Executions command - inspect workflow executions.

use anyhow::{Context as _, Result, bail};
use clap::{Args, Subcommand};
use console::{Style, style};
use trawler_pipeline::{ExecutionFilter, ExecutionId, ExecutionStore, StepStatus, WorkflowStatus};

use super::Context;

/// Arguments for the executions command.
#[derive(Args, Debug)]
pub struct ExecutionsArgs {
    #[command(subcommand)]
    pub command: ExecutionsCommand,
}

#[derive(Subcommand, Debug)]
pub enum ExecutionsCommand {
    /// List executions, newest first
    List {
        /// Only show executions with this status (e.g. running, failed)
        #[arg(short, long)]
        status: Option<WorkflowStatus>,

        /// Maximum executions to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Skip this many executions
        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Show one execution with its steps
    Show {
        /// Execution ID
        id: String,
    },
}

/// Run the executions command.
pub async fn run(args: ExecutionsArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ExecutionsCommand::List {
            status,
            limit,
            offset,
        } => cmd_list(status, limit, offset, ctx).await,
        ExecutionsCommand::Show { id } => cmd_show(&id, ctx).await,
    }
}

async fn cmd_list(
    status: Option<WorkflowStatus>,
    limit: usize,
    offset: usize,
    ctx: &Context,
) -> Result<()> {
    let store = ctx.execution_store()?;
    let mut filter = ExecutionFilter::default()
        .with_limit(limit)
        .with_offset(offset);
    if let Some(status) = status {
        filter = filter.with_status(status);
    }
    let executions = store.list(&filter).await?;

    let dim = Style::new().dim();
    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&executions)?);
        return Ok(());
    }
    if executions.is_empty() {
        println!("{}", dim.apply_to("No executions"));
        return Ok(());
    }

    println!("{}", style("Executions").bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    for snapshot in &executions {
        let record = &snapshot.execution;
        println!(
            "  {} {:<10} {} {}",
            style(record.id).cyan(),
            record.status.as_str(),
            record.workflow_name,
            dim.apply_to(record.created_at.format("%Y-%m-%d %H:%M:%S"))
        );
    }
    Ok(())
}

async fn cmd_show(id: &str, ctx: &Context) -> Result<()> {
    let id: ExecutionId = id
        .parse()
        .with_context(|| format!("invalid execution id: {id}"))?;
    let store = ctx.execution_store()?;
    let Some(snapshot) = store.get(id).await? else {
        bail!("execution not found: {id}");
    };

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    let record = &snapshot.execution;
    println!("{}", style(format!("Execution {}", record.id)).bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    println!("  {} {}", dim.apply_to("Workflow:"), record.workflow_name);
    println!("  {} {}", dim.apply_to("Status:  "), record.status);
    println!("  {} {}", dim.apply_to("Created: "), record.created_at.to_rfc3339());
    if let Some(ended) = record.ended_at {
        println!("  {} {}", dim.apply_to("Ended:   "), ended.to_rfc3339());
    }
    if let Some(error) = &record.error {
        println!("  {} {}", Style::new().red().apply_to("Error:   "), error);
    }

    println!();
    println!("{}", style("Steps").bold());
    for step in &snapshot.steps {
        let marker = match step.status {
            StepStatus::Succeeded => style("✓").green(),
            StepStatus::Failed => style("✗").red(),
            StepStatus::Running => style("…").yellow(),
            StepStatus::Pending | StepStatus::Skipped => style("·").dim(),
        };
        println!(
            "  {} {:<24} {:<10} {}",
            marker,
            step.name,
            step.status.as_str(),
            dim.apply_to(format!("attempts: {}", step.attempts))
        );
        if let Some(error) = &step.error {
            println!("      {}", dim.apply_to(error));
        }
    }
    Ok(())
}
