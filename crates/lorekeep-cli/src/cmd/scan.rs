use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use lorekeep_core::model::IssueKind;
use lorekeep_core::scanner::{ScannedEntry, scan_all};
use serde::Serialize;

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use crate::project::Project;

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Report only; leave the review queue untouched.
    #[arg(long)]
    pub dry_run: bool,

    /// Entries to list, worst first.
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScanView {
    scanned: usize,
    total_issues: usize,
    average_score: u8,
    issues_by_type: BTreeMap<IssueKind, usize>,
    needing_review: usize,
    synced: Option<SyncView>,
    worst: Vec<ScannedEntry>,
}

#[derive(Debug, Serialize)]
struct SyncView {
    queued: usize,
    updated: usize,
    resolved: usize,
}

pub fn run_scan(args: &ScanArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let project = Project::open(project_root)?;
    let stores = &project.stores;
    let now = Utc::now();
    let threshold = project.config.review.score_threshold;

    let snapshot = stores.tree.snapshot()?;
    let report = scan_all(&snapshot, now.date_naive(), &project.config.review);

    let synced = if args.dry_run {
        None
    } else {
        let sync = stores.reviews.sync(&report, threshold, now)?;
        stores.agent.record_scan_complete(now)?;
        Some(SyncView {
            queued: sync.queued,
            updated: sync.updated,
            resolved: sync.resolved,
        })
    };

    let view = ScanView {
        scanned: report.entries.len(),
        total_issues: report.total_issues,
        average_score: report.average_score,
        issues_by_type: report.issues_by_type.clone(),
        needing_review: report.needing_review(threshold).count(),
        synced,
        worst: report.entries.iter().take(args.limit).cloned().collect(),
    };

    render_mode(
        output,
        &view,
        |v, w| {
            for e in &v.worst {
                writeln!(w, "{}\t{}\t{}", e.score, e.file_path, e.issues.len())?;
            }
            Ok(())
        },
        |v, w| {
            pretty_section(w, "Scan")?;
            pretty_kv(w, "Entries", v.scanned.to_string())?;
            pretty_kv(w, "Issues", v.total_issues.to_string())?;
            pretty_kv(w, "Avg score", v.average_score.to_string())?;
            pretty_kv(w, "Need review", v.needing_review.to_string())?;
            if let Some(s) = &v.synced {
                pretty_kv(
                    w,
                    "Queue",
                    format!("+{} queued, {} updated, {} resolved", s.queued, s.updated, s.resolved),
                )?;
            }
            for (kind, n) in &v.issues_by_type {
                writeln!(w, "  {kind:<22} {n}")?;
            }
            if !v.worst.is_empty() {
                writeln!(w)?;
                pretty_section(w, "Worst entries")?;
                for e in &v.worst {
                    let kinds: Vec<String> = e.issues.iter().map(|i| i.kind.to_string()).collect();
                    writeln!(w, "  {:>3}  {:<40} {}", e.score, e.file_path, kinds.join(", "))?;
                }
            }
            Ok(())
        },
    )
}
