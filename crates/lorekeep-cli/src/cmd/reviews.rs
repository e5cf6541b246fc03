use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Args, Subcommand};
use lorekeep_agent::review::{RevisionTarget, revise};
use lorekeep_agent::{AnthropicClient, CancelToken, Stage};
use lorekeep_core::LoreError;
use lorekeep_core::model::{ReviewMode, ReviewQueueEntry, ReviewStatus};
use lorekeep_core::scanner::scan_all;
use serde::Serialize;

use crate::output::{OutputMode, clip, render, render_mode};
use crate::project::Project;

#[derive(Args, Debug)]
pub struct ReviewsArgs {
    #[command(subcommand)]
    command: Option<ReviewsCommand>,
}

#[derive(Subcommand, Debug)]
enum ReviewsCommand {
    /// List review records, most urgent first (default)
    List {
        /// Filter by status: queued, reviewing, pending_approval, completed, skipped
        #[arg(long)]
        status: Option<String>,
    },
    /// Stop reviewing an entry
    Skip {
        id: String,
        #[arg(long)]
        note: Option<String>,
    },
    /// Put a skipped or completed record back in the queue
    Requeue { id: String },
    /// Draft a revision of one entry now
    Revise {
        /// Entry path relative to the lore root
        path: String,
        #[arg(long, value_enum, default_value = "repair")]
        mode: ModeArg,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum ModeArg {
    Repair,
    Expand,
    Refresh,
}

impl From<ModeArg> for ReviewMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Repair => Self::Repair,
            ModeArg::Expand => Self::Expand,
            ModeArg::Refresh => Self::Refresh,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RevisedView {
    pending_id: String,
    path: String,
    version: u32,
    changelog_id: String,
    links_fixed: usize,
}

pub fn run_reviews(args: &ReviewsArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let project = Project::open(project_root)?;
    let reviews = &project.stores.reviews;
    let now = Utc::now();
    match &args.command {
        None => list(&project, None, output),
        Some(ReviewsCommand::List { status }) => list(&project, status.as_deref(), output),
        Some(ReviewsCommand::Skip { id, note }) => {
            let entry = reviews.set_status(id, ReviewStatus::Skipped, None, note.as_deref(), now)?;
            render(output, &entry, |e, w| writeln!(w, "Skipped {}", e.file_path))
        }
        Some(ReviewsCommand::Requeue { id }) => {
            let current = reviews
                .get(id)
                .ok_or_else(|| LoreError::not_found("review entry", id.as_str()))?;
            if current.status.is_active() {
                bail!(LoreError::InvalidTransition {
                    id: id.clone(),
                    from: current.status.to_string(),
                    to: ReviewStatus::Queued.to_string(),
                });
            }
            let entry = reviews.set_status(id, ReviewStatus::Queued, None, None, now)?;
            render(output, &entry, |e, w| writeln!(w, "Requeued {}", e.file_path))
        }
        Some(ReviewsCommand::Revise { path, mode }) => revise_now(&project, path, (*mode).into(), output),
    }
}

fn list(project: &Project, status: Option<&str>, output: OutputMode) -> Result<()> {
    let status = status.map(str::parse::<ReviewStatus>).transpose()?;
    let mut entries: Vec<ReviewQueueEntry> = project
        .stores
        .reviews
        .entries()
        .into_iter()
        .filter(|e| status.is_none_or(|s| e.status == s))
        .collect();
    entries.sort_by(|a, b| b.priority.cmp(&a.priority));

    render_mode(
        output,
        &entries,
        |items, w| {
            for e in items {
                writeln!(w, "{}\t{}\t{}\t{}", e.id, e.status, e.score, e.file_path)?;
            }
            Ok(())
        },
        |items, w| {
            if items.is_empty() {
                return writeln!(w, "Review queue is empty");
            }
            writeln!(w, "{:<17} {:>5} {:>4}  ENTRY", "STATUS", "SCORE", "PRI")?;
            for e in items {
                writeln!(
                    w,
                    "{:<17} {:>5} {:>4}  {}",
                    e.status.to_string(),
                    e.score,
                    e.priority,
                    clip(&e.file_path, 48)
                )?;
                for issue in &e.issues {
                    writeln!(w, "{:>30} {}: {}", "", issue.kind, clip(&issue.detail, 60))?;
                }
            }
            Ok(())
        },
    )
}

fn revise_now(project: &Project, path: &str, mode: ReviewMode, output: OutputMode) -> Result<()> {
    let stores = &project.stores;
    let now = Utc::now();
    let client = AnthropicClient::from_env(&project.config.ai)?;
    let pipeline = project.pipeline();
    let library = pipeline.load_library();
    let budget = pipeline.budget(CancelToken::new());

    let snapshot = stores.tree.snapshot()?;
    let target = match stores.reviews.for_path(path) {
        Some(record) if mode == ReviewMode::Repair && record.status == ReviewStatus::Queued => {
            RevisionTarget::from_review(&record)
        }
        _ => {
            let report = scan_all(&snapshot, now.date_naive(), &project.config.review);
            let scanned = report
                .entries
                .iter()
                .find(|e| e.file_path == path)
                .ok_or_else(|| LoreError::not_found("entry", path))?;
            RevisionTarget::from_scan(scanned, mode)
        }
    };

    let stage = Stage {
        stores,
        client: &client,
        library: &library,
        config: &project.config,
        budget: &budget,
        run_id: None,
    };
    let revised = revise(stage, &target, &snapshot.link_index(), now)
        .with_context(|| format!("revising {path}"))?;

    let view = RevisedView {
        pending_id: revised.draft.id.clone(),
        path: revised.draft.target_path(),
        version: revised.draft.version,
        changelog_id: revised.changelog.id.clone(),
        links_fixed: revised.links_fixed,
    };
    render(output, &view, |v, w| {
        writeln!(
            w,
            "Drafted {} v{} as {} ({} link(s) fixed)",
            v.path, v.version, v.pending_id, v.links_fixed
        )
    })
}
