//! The pipeline driver.
//!
//! One [`Pipeline::run`] is one scheduled invocation:
//!
//! 1. Take the run gate (`idle -> running`); a busy or paused agent skips.
//!    A pause landing right after the gate stops the run before any queue
//!    is touched.
//! 2. Return entities orphaned in `processing` by an interrupted run.
//! 3. Scan the lore tree. When the scan interval has passed, sync the review
//!    queue from it.
//! 4. Top up the discovery queue when fewer entities wait than one run uses.
//! 5. Plan the run with the scheduler and work through the plan item by item,
//!    sleeping `apiDelayMs` between service-backed items. Entries whose
//!    drafts still await review are left out of the plan.
//! 6. Complete the run log with its outcome.
//!
//! Per-item service failures are logged on the run and skipped. Pausing,
//! cancellation and the run deadline stop the loop between suspension
//! points; whatever was finished stays finished and the rest resumes from
//! queue state next time.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use lorekeep_core::LoreError;
use lorekeep_core::config::AgentConfig;
use lorekeep_core::lore::LoreSnapshot;
use lorekeep_core::lore::links::LinkIndex;
use lorekeep_core::model::{
    PendingEntry, PendingStatus, ReviewMode, ReviewStatus, RunLog, RunOutcome,
};
use lorekeep_core::scanner::{ScanReport, scan_all};
use lorekeep_core::state::{RunGuard, StartOutcome};
use lorekeep_triage::schedule::Inputs;
use lorekeep_triage::{HealthStats, Scheduler, Target, WorkClass, WorkItem};

use crate::cancel::{CancelToken, RunBudget};
use crate::client::GenerationClient;
use crate::context::{Stage, Stores, stamp};
use crate::discovery::{DiscoverySettings, discover};
use crate::error::{AgentError, ExternalError};
use crate::generate::generate_entity;
use crate::review::{RevisionTarget, revise};
use crate::sources::SourceLibrary;

/// Why the work loop ended before the plan did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Paused,
    Cancelled,
    DeadlineExceeded,
}

impl StopReason {
    const fn from_interrupt(err: &ExternalError) -> Self {
        match err {
            ExternalError::DeadlineExceeded => Self::DeadlineExceeded,
            _ => Self::Cancelled,
        }
    }
}

/// What a finished run did.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub outcome: RunOutcome,
    /// The completed log, as appended to history.
    pub log: RunLog,
    /// Planned items per class.
    pub planned: BTreeMap<WorkClass, usize>,
    pub health: Option<HealthStats>,
    /// Entities returned from `processing` at start.
    pub requeued: usize,
    /// Published entries left out of the plan because a draft for the
    /// same file awaits review.
    pub skipped: usize,
    /// Whether the review queue was synced this run.
    pub scanned: bool,
    pub stopped: Option<StopReason>,
}

/// Result of one invocation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunReport {
    /// The gate was closed; nothing was touched.
    Skipped { reason: String },
    Finished(RunSummary),
}

#[derive(Debug, Default)]
struct Progress {
    planned: BTreeMap<WorkClass, usize>,
    health: Option<HealthStats>,
    requeued: usize,
    skipped: usize,
    scanned: bool,
    stopped: Option<StopReason>,
}

/// Drives runs over one set of stores.
#[derive(Debug, Clone)]
pub struct Pipeline {
    stores: Stores,
    config: AgentConfig,
    sources_root: PathBuf,
}

impl Pipeline {
    #[must_use]
    pub const fn new(stores: Stores, config: AgentConfig, sources_root: PathBuf) -> Self {
        Self {
            stores,
            config,
            sources_root,
        }
    }

    #[must_use]
    pub const fn stores(&self) -> &Stores {
        &self.stores
    }

    #[must_use]
    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Budget for one run: the configured wall-clock limit, or none when
    /// `maxRunSeconds` is zero.
    #[must_use]
    pub fn budget(&self, token: CancelToken) -> RunBudget {
        match self.config.schedule.max_run_seconds {
            0 => RunBudget::unlimited(token),
            secs => RunBudget::new(token, Duration::from_secs(secs)),
        }
    }

    /// Read the source library from disk.
    #[must_use]
    pub fn load_library(&self) -> SourceLibrary {
        SourceLibrary::load(&self.sources_root, &self.config.sources.priority)
    }

    /// One scheduled invocation.
    ///
    /// Returns `Err` only when the gate itself cannot be read or written.
    /// Failures after the gate is taken end the run as `failed` and are
    /// reported in the summary's log.
    #[instrument(skip_all, fields(run_id = tracing::field::Empty))]
    pub fn run(
        &self,
        client: &dyn GenerationClient,
        budget: &RunBudget,
        now: DateTime<Utc>,
    ) -> Result<RunReport, AgentError> {
        let started = Instant::now();
        let log = match self.stores.agent.try_start(now)? {
            StartOutcome::Skipped { reason } => {
                info!(%reason, "run skipped");
                return Ok(RunReport::Skipped { reason });
            }
            StartOutcome::Started(log) => log,
        };
        tracing::Span::current().record("run_id", log.id.as_str());

        let mut guard = RunGuard::new(self.stores.agent.clone(), log);
        let mut progress = Progress::default();
        let outcome = match self.execute(&mut guard, &mut progress, client, budget, now, started) {
            Ok(()) => decide_outcome(guard.log(), progress.stopped),
            Err(err) => {
                error!(error = %err, code = %err.code(), "run failed");
                guard.log_mut().push_error(err.to_string());
                RunOutcome::Failed
            }
        };

        let fallback = guard.log().clone();
        let state = guard.finish(outcome, stamp(now, started))?;
        let log = state
            .history
            .into_iter()
            .find(|l| l.id == fallback.id)
            .unwrap_or(fallback);
        Ok(RunReport::Finished(RunSummary {
            outcome,
            log,
            planned: progress.planned,
            health: progress.health,
            requeued: progress.requeued,
            skipped: progress.skipped,
            scanned: progress.scanned,
            stopped: progress.stopped,
        }))
    }

    fn execute(
        &self,
        guard: &mut RunGuard,
        progress: &mut Progress,
        client: &dyn GenerationClient,
        budget: &RunBudget,
        now: DateTime<Utc>,
        started: Instant,
    ) -> Result<(), AgentError> {
        let stores = &self.stores;
        let run_id = guard.log().id.clone();

        if stores.agent.is_paused() {
            info!("agent paused before any work");
            progress.stopped = Some(StopReason::Paused);
            return Ok(());
        }

        progress.requeued = stores.discovery.reset_orphaned()?;
        if progress.requeued > 0 {
            info!(count = progress.requeued, "orphaned entities requeued");
        }

        stores.agent.set_current_task("Scanning entries");
        let snapshot = stores.tree.snapshot().map_err(|source| AgentError::Io {
            path: stores.tree.root().display().to_string(),
            source,
        })?;
        let report = scan_all(&snapshot, now.date_naive(), &self.config.review);
        if stores
            .agent
            .should_run_scan(now, self.config.schedule.scan_interval_hours)
        {
            stores
                .reviews
                .sync(&report, self.config.review.score_threshold, now)?;
            stores.agent.record_scan_complete(now)?;
            progress.scanned = true;
        }

        let library = self.load_library();
        let stage = Stage {
            stores,
            client,
            library: &library,
            config: &self.config,
            budget,
            run_id: Some(&run_id),
        };

        let run_budget = self.config.schedule.max_entries_per_run;
        let mut called = false;
        if stores.discovery.queued().len() < run_budget && !library.is_empty() {
            stores.agent.set_current_task("Discovering entities");
            let found = self.refill(&library, client, &snapshot, budget, stamp(now, started))?;
            guard.log_mut().entities_discovered += u32::try_from(found.added.added.len()).unwrap_or(u32::MAX);
            called = self.config.discovery.use_classifier && found.sources_scanned > 0;
            if found.interrupted {
                progress.stopped = Some(
                    budget
                        .check()
                        .err()
                        .map_or(StopReason::Cancelled, |err| StopReason::from_interrupt(&err)),
                );
                return Ok(());
            }
        }

        let reviews = stores.reviews.entries();
        let discovered = stores.discovery.list();
        let awaiting: HashSet<String> = stores
            .pending
            .list(Some(PendingStatus::Pending))
            .iter()
            .map(PendingEntry::target_path)
            .collect();
        progress.skipped = report
            .entries
            .iter()
            .filter(|e| awaiting.contains(&e.file_path))
            .count();
        if progress.skipped > 0 {
            debug!(count = progress.skipped, "entries held back while drafts await review");
        }
        let (plan, health) = Scheduler::new(stores.storage.clone(), self.config.scheduler.clone())
            .plan_run(
                Inputs {
                    report: &report,
                    review_queue: &reviews,
                    discovered: &discovered,
                    awaiting: &awaiting,
                },
                run_budget,
                now,
            );
        progress.planned.clone_from(&plan.counts);
        progress.health = Some(health);

        let links = snapshot.link_index();
        let delay = Duration::from_millis(self.config.schedule.api_delay_ms);

        for item in &plan.items {
            if stores.agent.is_paused() {
                info!("agent paused, stopping run");
                progress.stopped = Some(StopReason::Paused);
                break;
            }
            if let Err(err) = budget.sleep(if called { delay } else { Duration::ZERO }) {
                info!(%err, "run interrupted");
                progress.stopped = Some(StopReason::from_interrupt(&err));
                break;
            }

            stores
                .agent
                .set_current_task(&format!("{}: {}", item.class, item.label));
            called = true;
            match work(stage, item, &report, &links, stamp(now, started)) {
                Ok(()) => count(guard.log_mut(), item.class),
                Err(AgentError::External(err)) if err.is_interrupt() => {
                    info!(%err, item = %item.label, "run interrupted");
                    progress.stopped = Some(StopReason::from_interrupt(&err));
                    break;
                }
                Err(err) if err.is_item_failure() => {
                    warn!(class = %item.class, item = %item.label, error = %err, "item failed");
                    guard
                        .log_mut()
                        .push_error(format!("{} {}: {err}", item.class, item.label));
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn refill(
        &self,
        library: &SourceLibrary,
        client: &dyn GenerationClient,
        snapshot: &LoreSnapshot,
        budget: &RunBudget,
        now: DateTime<Utc>,
    ) -> Result<crate::discovery::DiscoveryReport, AgentError> {
        let settings = DiscoverySettings::from_config(&self.config);
        discover(
            library,
            Some(client),
            &self.stores.discovery,
            &snapshot.published_names(),
            &settings,
            budget,
            now,
        )
    }
}

fn work(
    stage: Stage<'_>,
    item: &WorkItem,
    report: &ScanReport,
    links: &LinkIndex,
    now: DateTime<Utc>,
) -> Result<(), AgentError> {
    let path = match &item.target {
        Target::Entity { id } => return generate_entity(stage, id, now).map(|_| ()),
        Target::Entry { path } => path,
    };
    let mode = item.class.review_mode().ok_or_else(|| LoreError::InvalidValue {
        field: "work item",
        value: format!("{} {path}", item.class),
    })?;

    let target = match stage.stores.reviews.for_path(path) {
        Some(record) if mode == ReviewMode::Repair && record.status == ReviewStatus::Queued => {
            RevisionTarget::from_review(&record)
        }
        _ => {
            let scanned = report
                .entries
                .iter()
                .find(|e| &e.file_path == path)
                .ok_or_else(|| LoreError::not_found("scanned entry", path.as_str()))?;
            RevisionTarget::from_scan(scanned, mode)
        }
    };
    revise(stage, &target, links, now).map(|_| ())
}

fn count(log: &mut RunLog, class: WorkClass) {
    match class {
        WorkClass::Repair | WorkClass::Review => log.entries_reviewed += 1,
        WorkClass::Expand => log.entries_expanded += 1,
        WorkClass::Stale => log.entries_refreshed += 1,
        WorkClass::Generate => log.entries_generated += 1,
    }
}

/// `failed` when items failed and none succeeded, `partial` when some
/// failed or the loop stopped early, otherwise `success`.
fn decide_outcome(log: &RunLog, stopped: Option<StopReason>) -> RunOutcome {
    let failed = !log.errors.is_empty();
    if failed && log.items_succeeded() == 0 {
        RunOutcome::Failed
    } else if failed || stopped.is_some() {
        RunOutcome::Partial
    } else {
        RunOutcome::Success
    }
}
