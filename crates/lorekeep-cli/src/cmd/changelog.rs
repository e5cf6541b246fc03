use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Subcommand};
use lorekeep_core::LoreError;
use lorekeep_core::changelog::ChangelogFilter;
use lorekeep_core::model::{ChangeReviewStatus, ChangeSource, ChangeType, ChangelogEntry};

use crate::output::{OutputMode, clip, pretty_kv, pretty_section, render, render_mode};
use crate::project::Project;
use crate::reviewer::require_reviewer;

#[derive(Args, Debug)]
pub struct ChangelogArgs {
    #[command(subcommand)]
    command: Option<ChangelogCommand>,
}

#[derive(Subcommand, Debug)]
enum ChangelogCommand {
    /// List changes, newest first (default)
    List(FilterArgs),
    /// Show one change
    Show { id: String },
    /// Mark a change approved
    Approve(ReviewArgs),
    /// Mark a change rejected
    Reject(ReviewArgs),
    /// Print matching changes as a markdown document
    Export(FilterArgs),
    /// Counts by type, source and review status
    Stats,
}

#[derive(Args, Debug, Default)]
struct FilterArgs {
    /// Change type (repeatable): create, update, expand, ...
    #[arg(long = "type")]
    types: Vec<String>,

    /// Change source (repeatable): agent_research, human_review, ...
    #[arg(long = "source")]
    sources: Vec<String>,

    /// Review status (repeatable): pending_review, approved, ...
    #[arg(long = "status")]
    statuses: Vec<String>,

    /// Only changes at or after this date (YYYY-MM-DD or RFC 3339)
    #[arg(long)]
    since: Option<String>,

    /// Only changes at or before this date (YYYY-MM-DD or RFC 3339)
    #[arg(long)]
    until: Option<String>,

    /// Substring of an affected file path
    #[arg(long)]
    file: Option<String>,

    /// Case-insensitive text in title or description
    #[arg(long)]
    search: Option<String>,

    #[arg(long)]
    limit: Option<usize>,

    #[arg(long, default_value_t = 0)]
    offset: usize,
}

#[derive(Args, Debug)]
struct ReviewArgs {
    id: String,
    #[arg(long)]
    note: Option<String>,
    /// Reviewer name (default: LOREKEEP_REVIEWER)
    #[arg(long)]
    reviewer: Option<String>,
}

impl FilterArgs {
    fn to_filter(&self) -> Result<ChangelogFilter> {
        Ok(ChangelogFilter {
            types: parse_all::<ChangeType>(&self.types)?,
            sources: parse_all::<ChangeSource>(&self.sources)?,
            statuses: parse_all::<ChangeReviewStatus>(&self.statuses)?,
            since: self.since.as_deref().map(|s| parse_time("since", s, false)).transpose()?,
            until: self.until.as_deref().map(|s| parse_time("until", s, true)).transpose()?,
            file: self.file.clone(),
            search: self.search.clone(),
            limit: self.limit,
            offset: self.offset,
        })
    }
}

fn parse_all<T>(raw: &[String]) -> Result<Vec<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.iter().map(|s| s.parse::<T>().map_err(Into::into)).collect()
}

/// Bare dates cover the whole day: start of day for lower bounds, end of day for upper.
fn parse_time(field: &'static str, raw: &str, end_of_day: bool) -> Result<DateTime<Utc>, LoreError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let invalid = || LoreError::InvalidValue {
        field,
        value: raw.to_string(),
    };
    let day = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| invalid())?;
    let time = if end_of_day {
        day.and_hms_opt(23, 59, 59)
    } else {
        day.and_hms_opt(0, 0, 0)
    };
    time.map(|t| t.and_utc()).ok_or_else(invalid)
}

pub fn run_changelog(args: &ChangelogArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let project = Project::open(project_root)?;
    let changelog = &project.stores.changelog;
    match &args.command {
        None => list(changelog.list(&ChangelogFilter { limit: Some(20), ..ChangelogFilter::default() }), output),
        Some(ChangelogCommand::List(filter)) => list(changelog.list(&filter.to_filter()?), output),
        Some(ChangelogCommand::Show { id }) => {
            let entry = changelog
                .get(id)
                .ok_or_else(|| LoreError::not_found("changelog entry", id.as_str()))?;
            render_mode(
                output,
                &entry,
                |e, w| writeln!(w, "{}\t{}\t{}\t{}", e.id, e.change_type, e.review_status, e.title),
                |e, w| {
                    pretty_section(w, &e.title)?;
                    pretty_kv(w, "ID", &e.id)?;
                    pretty_kv(w, "When", e.timestamp.to_rfc3339())?;
                    pretty_kv(w, "Type", e.change_type.to_string())?;
                    pretty_kv(w, "Source", e.source.to_string())?;
                    pretty_kv(w, "Status", e.review_status.to_string())?;
                    pretty_kv(w, "Files", e.files.join(", "))?;
                    pretty_kv(w, "Diff", format!("+{} / -{}", e.diff.lines_added, e.diff.lines_removed))?;
                    if let Some(reviewer) = &e.reviewed_by {
                        pretty_kv(w, "Reviewer", reviewer)?;
                    }
                    if let Some(note) = &e.review_note {
                        pretty_kv(w, "Note", note)?;
                    }
                    if !e.description.is_empty() {
                        writeln!(w)?;
                        writeln!(w, "{}", e.description)?;
                    }
                    Ok(())
                },
            )
        }
        Some(ChangelogCommand::Approve(r)) => {
            let reviewer = require_reviewer(r.reviewer.as_deref())?;
            let entry = changelog
                .approve(&r.id, &reviewer, r.note.as_deref(), Utc::now())
                .with_context(|| format!("approving change {}", r.id))?;
            render(output, &entry, |e, w| writeln!(w, "Approved {}", e.id))
        }
        Some(ChangelogCommand::Reject(r)) => {
            let reviewer = require_reviewer(r.reviewer.as_deref())?;
            let entry = changelog
                .reject(&r.id, &reviewer, r.note.as_deref(), Utc::now())
                .with_context(|| format!("rejecting change {}", r.id))?;
            render(output, &entry, |e, w| writeln!(w, "Rejected {}", e.id))
        }
        Some(ChangelogCommand::Export(filter)) => {
            let markdown = changelog.export_markdown(&filter.to_filter()?);
            render(output, &markdown, |m, w| write!(w, "{m}"))
        }
        Some(ChangelogCommand::Stats) => {
            let stats = changelog.stats();
            render(output, &stats, |s, w| {
                pretty_section(w, "Changelog")?;
                pretty_kv(w, "Total", s.total.to_string())?;
                for (label, counts) in [("Type", &s.by_type), ("Source", &s.by_source), ("Status", &s.by_status)] {
                    let parts: Vec<String> = counts.iter().map(|(k, n)| format!("{k}={n}")).collect();
                    pretty_kv(w, label, parts.join(" "))?;
                }
                Ok(())
            })
        }
    }
}

fn list(entries: Vec<ChangelogEntry>, output: OutputMode) -> Result<()> {
    render_mode(
        output,
        &entries,
        |items, w| {
            for e in items {
                writeln!(w, "{}\t{}\t{}\t{}", e.id, e.change_type, e.review_status, e.title)?;
            }
            Ok(())
        },
        |items, w| {
            if items.is_empty() {
                return writeln!(w, "No changes recorded");
            }
            writeln!(w, "{:<16} {:<9} {:<15} TITLE", "WHEN", "TYPE", "STATUS")?;
            for e in items {
                writeln!(
                    w,
                    "{:<16} {:<9} {:<15} {}",
                    e.timestamp.format("%Y-%m-%d %H:%M"),
                    e.change_type.to_string(),
                    e.review_status.to_string(),
                    clip(&e.title, 48)
                )?;
            }
            Ok(())
        },
    )
}
