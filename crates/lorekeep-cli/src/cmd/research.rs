use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Args, Subcommand};
use lorekeep_agent::research::{DEFAULT_MAX_TASKS, run_research};
use lorekeep_agent::{AnthropicClient, CancelToken, Stage};
use lorekeep_core::model::{ResearchTask, TaskStatus, TaskType};
use lorekeep_core::research::NewTask;
use serde::Serialize;

use crate::output::{OutputMode, clip, pretty_kv, pretty_section, render, render_mode};
use crate::project::Project;
use crate::reviewer::require_reviewer;

#[derive(Args, Debug)]
pub struct ResearchArgs {
    #[command(subcommand)]
    command: Option<ResearchCommand>,
}

#[derive(Subcommand, Debug)]
enum ResearchCommand {
    /// Queue a research task
    Add(AddArgs),
    /// List tasks, highest priority first (default)
    List {
        /// Filter by status: queued, in_progress, needs_review, ...
        #[arg(long)]
        status: Option<String>,
    },
    /// Show one task with its findings
    Show { id: String },
    /// Work through queued tasks now
    Run {
        #[arg(long, default_value_t = DEFAULT_MAX_TASKS)]
        max_tasks: usize,
    },
    /// Publish a task's suggested entry
    Approve(ReviewArgs),
    /// Discard a task's suggestion
    Reject(ReviewArgs),
    /// Put a failed task back in the queue
    Retry { id: String },
    /// Drop finished tasks older than N days
    Cleanup {
        #[arg(long, default_value_t = 30)]
        days: i64,
    },
}

#[derive(Args, Debug)]
struct AddArgs {
    /// explore_topic, expand_entry, verify_facts, find_connections,
    /// update_citations, web_research or create_entry
    #[arg(long = "type", default_value = "explore_topic")]
    task_type: String,

    topic: String,

    #[arg(long, default_value = "")]
    description: String,

    /// 1 (lowest) to 10 (highest)
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u8).range(1..=10))]
    priority: u8,

    /// Lore entry the task concerns, relative to the lore root
    #[arg(long)]
    target: Option<String>,
}

#[derive(Args, Debug)]
struct ReviewArgs {
    id: String,
    /// Reviewer name (default: LOREKEEP_REVIEWER)
    #[arg(long)]
    reviewer: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PublishedView {
    task_id: String,
    pending_id: String,
    path: String,
}

#[derive(Debug, Serialize)]
struct CleanupView {
    removed: usize,
}

pub fn run_research_cmd(args: &ResearchArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let project = Project::open(project_root)?;
    let stores = &project.stores;
    let research = &stores.research;
    let now = Utc::now();
    match &args.command {
        None => list(research.list(None), output),
        Some(ResearchCommand::List { status }) => {
            let status = status.as_deref().map(str::parse::<TaskStatus>).transpose()?;
            list(research.list(status), output)
        }
        Some(ResearchCommand::Add(add)) => {
            let task = research.add(
                NewTask {
                    task_type: add.task_type.parse::<TaskType>()?,
                    topic: add.topic.clone(),
                    description: add.description.clone(),
                    priority: add.priority,
                    target_file: add.target.clone(),
                },
                now,
            )?;
            render(output, &task, |t, w| writeln!(w, "Queued {} ({})", t.topic, t.id))
        }
        Some(ResearchCommand::Show { id }) => {
            let task = research.get(id)?;
            render(output, &task, |t, w| show(t, w))
        }
        Some(ResearchCommand::Run { max_tasks }) => {
            let client = AnthropicClient::from_env(&project.config.ai)?;
            let pipeline = project.pipeline();
            let library = pipeline.load_library();
            let budget = pipeline.budget(CancelToken::new());
            let stage = Stage {
                stores,
                client: &client,
                library: &library,
                config: &project.config,
                budget: &budget,
                run_id: None,
            };
            let session = run_research(stage, *max_tasks, now).context("research session")?;
            render(output, &session, |s, w| {
                writeln!(
                    w,
                    "Session {}: {} processed, {} failed",
                    s.id, s.tasks_processed, s.tasks_failed
                )
            })
        }
        Some(ResearchCommand::Approve(r)) => {
            let reviewer = require_reviewer(r.reviewer.as_deref())?;
            let published = research
                .approve(&r.id, &reviewer, &stores.pending, stores.publisher(), now)
                .with_context(|| format!("approving task {}", r.id))?;
            let view = PublishedView {
                task_id: r.id.clone(),
                pending_id: published.entry.id,
                path: published.path,
            };
            render(output, &view, |v, w| writeln!(w, "Published {} from {}", v.path, v.task_id))
        }
        Some(ResearchCommand::Reject(r)) => {
            let reviewer = require_reviewer(r.reviewer.as_deref())?;
            let task = research.reject(&r.id, &reviewer)?;
            render(output, &task, |t, w| writeln!(w, "Rejected {} ({})", t.topic, t.id))
        }
        Some(ResearchCommand::Retry { id }) => {
            let task = research.retry(id)?;
            render(output, &task, |t, w| writeln!(w, "Requeued {} ({})", t.topic, t.id))
        }
        Some(ResearchCommand::Cleanup { days }) => {
            let removed = research.cleanup(Duration::days(*days), now)?;
            render(output, &CleanupView { removed }, |v, w| {
                writeln!(w, "Removed {} finished task(s)", v.removed)
            })
        }
    }
}

fn show(task: &ResearchTask, w: &mut dyn Write) -> std::io::Result<()> {
    pretty_section(w, &task.topic)?;
    pretty_kv(w, "ID", &task.id)?;
    pretty_kv(w, "Type", task.task_type.to_string())?;
    pretty_kv(w, "Status", task.status.to_string())?;
    pretty_kv(w, "Priority", task.priority.to_string())?;
    if let Some(target) = &task.target_file {
        pretty_kv(w, "Target", target)?;
    }
    if let Some(error) = &task.error {
        pretty_kv(w, "Error", error)?;
    }
    if let Some(findings) = &task.findings {
        writeln!(w)?;
        writeln!(w, "{}", findings.summary)?;
        for fact in &findings.facts {
            writeln!(w, "  - {fact}")?;
        }
    }
    if let Some(suggested) = &task.suggested_entry {
        writeln!(w)?;
        pretty_kv(w, "Suggests", format!("{} ({})", suggested.title, suggested.category))?;
    }
    Ok(())
}

fn list(mut tasks: Vec<ResearchTask>, output: OutputMode) -> Result<()> {
    tasks.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));
    render_mode(
        output,
        &tasks,
        |items, w| {
            for t in items {
                writeln!(w, "{}\t{}\t{}\t{}\t{}", t.id, t.status, t.task_type, t.priority, t.topic)?;
            }
            Ok(())
        },
        |items, w| {
            if items.is_empty() {
                return writeln!(w, "Research queue is empty");
            }
            writeln!(w, "{:<13} {:<17} {:>3}  TOPIC", "STATUS", "TYPE", "PRI")?;
            for t in items {
                writeln!(
                    w,
                    "{:<13} {:<17} {:>3}  {}",
                    t.status.to_string(),
                    t.task_type.to_string(),
                    t.priority,
                    clip(&t.topic, 44)
                )?;
            }
            Ok(())
        },
    )
}
