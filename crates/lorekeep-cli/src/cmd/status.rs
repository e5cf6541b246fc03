use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use lorekeep_core::model::{AgentState, EntityStatus, PendingStatus, ReviewStatus, TaskStatus};
use lorekeep_core::scanner::scan_all;
use lorekeep_triage::{HealthStats, Scheduler, SchedulerState};
use serde::Serialize;

use crate::output::{OutputMode, pretty_kv, pretty_section, render, render_mode};
use crate::project::Project;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Number of recent runs to show.
    #[arg(long, default_value_t = 5)]
    pub history: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusView {
    backend: &'static str,
    agent: AgentState,
    health: HealthStats,
    discovery: BTreeMap<EntityStatus, usize>,
    reviews: BTreeMap<ReviewStatus, usize>,
    pending_drafts: usize,
    research_queued: usize,
    last_plan: SchedulerState,
}

fn when(at: Option<DateTime<Utc>>) -> String {
    at.map_or_else(|| "never".to_string(), |t| t.format("%Y-%m-%d %H:%M UTC").to_string())
}

fn counts<K: std::fmt::Display>(map: &BTreeMap<K, usize>) -> String {
    if map.is_empty() {
        return "-".to_string();
    }
    map.iter()
        .map(|(k, n)| format!("{k}={n}"))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn run_status(args: &StatusArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let project = Project::open(project_root)?;
    let stores = &project.stores;
    let mut agent = stores.agent.load();
    agent.history.truncate(args.history);

    let snapshot = stores.tree.snapshot()?;
    let report = scan_all(&snapshot, Utc::now().date_naive(), &project.config.review);
    let health = HealthStats::measure(
        &report,
        &stores.reviews.entries(),
        &stores.discovery.list(),
    );

    let view = StatusView {
        backend: project.backend,
        agent,
        health,
        discovery: stores.discovery.stats(),
        reviews: stores.reviews.stats(),
        pending_drafts: stores.pending.list(Some(PendingStatus::Pending)).len(),
        research_queued: stores.research.list(Some(TaskStatus::Queued)).len(),
        last_plan: Scheduler::new(stores.storage.clone(), project.config.scheduler.clone()).last(),
    };

    render_mode(
        output,
        &view,
        |v, w| {
            writeln!(
                w,
                "{}\thealth={}\tpending={}\tlast_run={}\tnext_run={}",
                v.agent.status,
                v.health.health_score,
                v.pending_drafts,
                when(v.agent.last_run),
                when(v.agent.next_run)
            )
        },
        |v, w| {
            pretty_section(w, "Agent")?;
            pretty_kv(w, "Status", v.agent.status.to_string())?;
            if let Some(task) = &v.agent.current_task {
                pretty_kv(w, "Current", task)?;
            }
            pretty_kv(w, "Last run", when(v.agent.last_run))?;
            pretty_kv(w, "Next run", when(v.agent.next_run))?;
            pretty_kv(w, "Last scan", when(v.agent.last_scan))?;
            if let Some(err) = &v.agent.error {
                pretty_kv(w, "Last error", err)?;
            }
            pretty_kv(w, "Storage", v.backend)?;
            writeln!(w)?;

            pretty_section(w, "Lore health")?;
            pretty_kv(w, "Score", v.health.health_score.to_string())?;
            pretty_kv(w, "Broken", v.health.broken_entries.to_string())?;
            pretty_kv(w, "In review", v.health.quality_issues.to_string())?;
            pretty_kv(w, "Basic", v.health.basic_entries.to_string())?;
            pretty_kv(w, "Stale", v.health.stale_entries.to_string())?;
            writeln!(w)?;

            pretty_section(w, "Queues")?;
            pretty_kv(w, "Discovery", counts(&v.discovery))?;
            pretty_kv(w, "Reviews", counts(&v.reviews))?;
            pretty_kv(w, "Drafts", v.pending_drafts.to_string())?;
            pretty_kv(w, "Research", v.research_queued.to_string())?;
            pretty_kv(w, "Last plan", counts(&v.last_plan.counts))?;
            writeln!(w)?;

            pretty_section(w, "Recent runs")?;
            if v.agent.history.is_empty() {
                writeln!(w, "  (none)")?;
            }
            for run in &v.agent.history {
                writeln!(
                    w,
                    "  {}  {:<8} gen={} rev={} exp={} ref={} errors={}",
                    run.started_at.format("%Y-%m-%d %H:%M"),
                    run.outcome.map_or_else(|| "-".to_string(), |o| o.to_string()),
                    run.entries_generated,
                    run.entries_reviewed,
                    run.entries_expanded,
                    run.entries_refreshed,
                    run.errors.len()
                )?;
            }
            Ok(())
        },
    )
}

pub fn run_pause(output: OutputMode, project_root: &Path) -> Result<()> {
    let project = Project::open(project_root)?;
    let state = project.stores.agent.pause()?;
    render(output, &state, |s, w| writeln!(w, "Agent {}", s.status))
}

pub fn run_resume(output: OutputMode, project_root: &Path) -> Result<()> {
    let project = Project::open(project_root)?;
    let state = project.stores.agent.resume(Utc::now())?;
    render(output, &state, |s, w| {
        writeln!(w, "Agent {} (next run {})", s.status, when(s.next_run))
    })
}
