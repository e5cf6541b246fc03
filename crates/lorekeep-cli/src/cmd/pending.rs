use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Subcommand};
use lorekeep_core::model::{PendingEntry, PendingKind, PendingStatus};
use serde::Serialize;

use crate::output::{OutputMode, clip, pretty_kv, pretty_section, render, render_mode};
use crate::project::Project;
use crate::reviewer::require_reviewer;

#[derive(Args, Debug)]
pub struct PendingArgs {
    #[command(subcommand)]
    command: Option<PendingCommand>,
}

#[derive(Subcommand, Debug)]
enum PendingCommand {
    /// List drafts awaiting review (default)
    List {
        /// Filter by status: pending, approved, rejected
        #[arg(long)]
        status: Option<String>,
    },
    /// Show one draft with its full content
    Show { id: String },
    /// Publish a draft into the lore tree
    Approve(DispositionArgs),
    /// Reject a draft; nothing is published
    Reject(DispositionArgs),
}

#[derive(Args, Debug)]
struct DispositionArgs {
    id: String,
    /// Note recorded on the draft and its changelog entry
    #[arg(long)]
    note: Option<String>,
    /// Reviewer name (default: LOREKEEP_REVIEWER)
    #[arg(long)]
    reviewer: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApprovedView {
    id: String,
    path: String,
    changelog_id: String,
    reviewed_by: String,
}

fn kind_label(entry: &PendingEntry) -> &'static str {
    match &entry.kind {
        PendingKind::NewEntry { .. } => "new",
        PendingKind::Revision { .. } => "revision",
        PendingKind::Research { .. } => "research",
    }
}

pub fn run_pending(args: &PendingArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let project = Project::open(project_root)?;
    let stores = &project.stores;
    match &args.command {
        None => list(&project, Some(PendingStatus::Pending), output),
        Some(PendingCommand::List { status }) => {
            let status = status.as_deref().map(str::parse::<PendingStatus>).transpose()?;
            list(&project, status, output)
        }
        Some(PendingCommand::Show { id }) => {
            let entry = stores.pending.get(id)?;
            render_mode(
                output,
                &entry,
                |e, w| write!(w, "{}", e.content),
                |e, w| {
                    pretty_section(w, &format!("{} ({})", e.title, e.id))?;
                    pretty_kv(w, "Kind", kind_label(e))?;
                    pretty_kv(w, "Target", e.target_path())?;
                    pretty_kv(w, "Version", e.version.to_string())?;
                    pretty_kv(w, "Status", e.status.to_string())?;
                    pretty_kv(w, "Confidence", e.confidence.to_string())?;
                    pretty_kv(w, "Citations", e.citations.join(", "))?;
                    pretty_kv(w, "Sources", e.source_files.join(", "))?;
                    writeln!(w)?;
                    write!(w, "{}", e.content)
                },
            )
        }
        Some(PendingCommand::Approve(d)) => {
            let reviewer = require_reviewer(d.reviewer.as_deref())?;
            let published = stores
                .pending
                .approve(&d.id, &reviewer, d.note.as_deref(), stores.publisher(), Utc::now())
                .with_context(|| format!("approving {}", d.id))?;
            let view = ApprovedView {
                id: published.entry.id,
                path: published.path,
                changelog_id: published.changelog.id,
                reviewed_by: reviewer,
            };
            render(output, &view, |v, w| writeln!(w, "Published {} ({})", v.path, v.id))
        }
        Some(PendingCommand::Reject(d)) => {
            let reviewer = require_reviewer(d.reviewer.as_deref())?;
            let entry = stores
                .pending
                .reject(&d.id, &reviewer, d.note.as_deref(), stores.publisher(), Utc::now())
                .with_context(|| format!("rejecting {}", d.id))?;
            render(output, &entry, |e, w| writeln!(w, "Rejected {} ({})", e.title, e.id))
        }
    }
}

fn list(project: &Project, status: Option<PendingStatus>, output: OutputMode) -> Result<()> {
    let entries = project.stores.pending.list(status);
    render_mode(
        output,
        &entries,
        |items, w| {
            for e in items {
                writeln!(w, "{}\t{}\t{}\t{}", e.id, e.status, kind_label(e), e.target_path())?;
            }
            Ok(())
        },
        |items, w| {
            if items.is_empty() {
                return writeln!(w, "No drafts");
            }
            writeln!(w, "{:<28} {:<9} {:<11} TARGET", "ID", "KIND", "CONFIDENCE")?;
            for e in items {
                writeln!(
                    w,
                    "{:<28} {:<9} {:<11} {} (v{})",
                    clip(&e.id, 28),
                    kind_label(e),
                    e.confidence.to_string(),
                    e.target_path(),
                    e.version
                )?;
            }
            Ok(())
        },
    )
}
