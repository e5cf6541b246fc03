use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Subcommand};
use lorekeep_agent::generate::{generate_entity, generate_next};
use lorekeep_agent::{AnthropicClient, CancelToken, Stage};
use lorekeep_core::model::{DiscoveredEntity, EntityStatus};
use serde::Serialize;

use crate::output::{OutputMode, clip, render, render_mode};
use crate::project::Project;

#[derive(Args, Debug)]
pub struct QueueArgs {
    #[command(subcommand)]
    command: Option<QueueCommand>,
}

#[derive(Subcommand, Debug)]
enum QueueCommand {
    /// List discovered entities (default)
    List(ListArgs),
    /// Drop an entity so it is never generated
    Reject {
        /// Entity id (slug)
        id: String,
    },
    /// Draft an entry now, for one entity or the highest-priority queued one
    Generate {
        /// Entity id (slug)
        id: Option<String>,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DraftedView {
    entity_id: String,
    pending_id: String,
    target: String,
    changelog_id: String,
    published: Option<String>,
}

#[derive(Args, Debug, Default)]
struct ListArgs {
    /// Filter by status: queued, processing, done, rejected
    #[arg(long)]
    status: Option<String>,

    #[arg(long, default_value_t = 50)]
    limit: usize,
}

pub fn run_queue(args: &QueueArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let project = Project::open(project_root)?;
    match &args.command {
        None => list(&project, &ListArgs { limit: 50, ..ListArgs::default() }, output),
        Some(QueueCommand::List(list_args)) => list(&project, list_args, output),
        Some(QueueCommand::Reject { id }) => {
            let entity = project
                .stores
                .discovery
                .reject(id, Utc::now())
                .with_context(|| format!("rejecting {id}"))?;
            render(output, &entity, |e, w| writeln!(w, "Rejected {} ({})", e.name, e.id))
        }
        Some(QueueCommand::Generate { id }) => generate_now(&project, id.as_deref(), output),
    }
}

fn generate_now(project: &Project, id: Option<&str>, output: OutputMode) -> Result<()> {
    let client = AnthropicClient::from_env(&project.config.ai)?;
    let pipeline = project.pipeline();
    let library = pipeline.load_library();
    let budget = pipeline.budget(CancelToken::new());
    let stage = Stage {
        stores: &project.stores,
        client: &client,
        library: &library,
        config: &project.config,
        budget: &budget,
        run_id: None,
    };

    let now = Utc::now();
    let drafted = match id {
        Some(id) => Some(generate_entity(stage, id, now).with_context(|| format!("generating {id}"))?),
        None => generate_next(stage, now).context("generating next entity")?,
    };
    let view = drafted.map(|d| DraftedView {
        target: d.draft.target_path(),
        entity_id: d.entity.id,
        pending_id: d.draft.id,
        changelog_id: d.changelog.id,
        published: d.published,
    });
    render(output, &view, |v, w| match v {
        Some(v) => match &v.published {
            Some(path) => writeln!(w, "Published {path} (auto-approved)"),
            None => writeln!(w, "Drafted {} as {}", v.target, v.pending_id),
        },
        None => writeln!(w, "Nothing queued"),
    })
}

fn list(project: &Project, args: &ListArgs, output: OutputMode) -> Result<()> {
    let status = args
        .status
        .as_deref()
        .map(str::parse::<EntityStatus>)
        .transpose()?;
    let mut entities: Vec<DiscoveredEntity> = project
        .stores
        .discovery
        .list()
        .into_iter()
        .filter(|e| status.is_none_or(|s| e.status == s))
        .collect();
    entities.truncate(args.limit);

    render_mode(
        output,
        &entities,
        |items, w| {
            for e in items {
                writeln!(w, "{}\t{}\t{}\t{}\t{}", e.id, e.status, e.category, e.priority, e.name)?;
            }
            Ok(())
        },
        |items, w| {
            if items.is_empty() {
                return writeln!(w, "Discovery queue is empty");
            }
            writeln!(w, "{:<11} {:<10} {:>4} {:>3}  NAME", "STATUS", "CATEGORY", "PRI", "TRY")?;
            for e in items {
                writeln!(
                    w,
                    "{:<11} {:<10} {:>4} {:>3}  {}",
                    e.status.to_string(),
                    e.category.to_string(),
                    e.priority,
                    e.attempts,
                    clip(&e.name, 40)
                )?;
            }
            Ok(())
        },
    )
}
