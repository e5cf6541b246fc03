//! The run gate.
//!
//! [`AgentStateMachine`] owns every transition of the persisted
//! [`AgentState`]. The `idle -> running` check-and-set in
//! [`AgentStateMachine::try_start`] is the only mutual exclusion between
//! pipeline runs. It holds the store lock across the read and the write,
//! and relies on every trigger going through it.

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::error::LoreError;
use crate::ids::new_id;
use crate::model::{AgentState, AgentStatus, RunLog, RunOutcome};
use crate::storage::{Storage, keys};

/// Runs retained in history.
pub const HISTORY_LIMIT: usize = 50;

/// Result of asking to start a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started(RunLog),
    /// Not an error: another run holds the gate, or the agent is paused.
    Skipped { reason: String },
}

/// Transitions over the persisted agent state.
#[derive(Debug, Clone)]
pub struct AgentStateMachine {
    storage: Storage,
    interval_minutes: u32,
}

impl AgentStateMachine {
    #[must_use]
    pub const fn new(storage: Storage, interval_minutes: u32) -> Self {
        Self {
            storage,
            interval_minutes,
        }
    }

    #[must_use]
    pub fn load(&self) -> AgentState {
        self.storage.get_or_default(keys::AGENT_STATE)
    }

    fn save(&self, state: &AgentState) -> Result<(), LoreError> {
        if self.storage.set(keys::AGENT_STATE, state) {
            Ok(())
        } else {
            Err(LoreError::StorageWrite(keys::AGENT_STATE.to_string()))
        }
    }

    fn next_run_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::minutes(i64::from(self.interval_minutes))
    }

    /// Move `idle -> running` and hand back a fresh [`RunLog`].
    ///
    /// The status check and the write happen under the store lock, so two
    /// triggers racing on the same data directory cannot both start. From
    /// `running` or `paused` nothing is written and the reason is returned
    /// as [`StartOutcome::Skipped`].
    pub fn try_start(&self, now: DateTime<Utc>) -> Result<StartOutcome, LoreError> {
        let mut blocked = None;
        let started = self
            .storage
            .check_and_set(keys::AGENT_STATE, |state: &mut AgentState| {
                match state.status {
                    AgentStatus::Running => {
                        blocked = Some("a run is already in progress");
                        return None;
                    }
                    AgentStatus::Paused => {
                        blocked = Some("agent is paused");
                        return None;
                    }
                    AgentStatus::Idle => {}
                }
                state.status = AgentStatus::Running;
                state.current_task = Some("Starting run".to_string());
                state.error = None;
                Some(RunLog::new(new_id("run", now), now))
            })?;

        match started {
            Some(log) => {
                info!(run_id = %log.id, "run started");
                Ok(StartOutcome::Started(log))
            }
            None => Ok(StartOutcome::Skipped {
                reason: blocked.unwrap_or("agent is busy").to_string(),
            }),
        }
    }

    /// Close out a run: stamp the log, prepend it to history and leave the
    /// `running` state.
    ///
    /// The state returns to `idle` unless an operator paused the agent while
    /// the run was in flight, in which case it stays `paused`.
    pub fn complete(
        &self,
        mut log: RunLog,
        outcome: RunOutcome,
        now: DateTime<Utc>,
    ) -> Result<AgentState, LoreError> {
        log.completed_at = Some(now);
        log.outcome = Some(outcome);
        log.duration_ms = u64::try_from((now - log.started_at).num_milliseconds()).unwrap_or(0);

        let mut state = self.load();
        state.stats.total_runs += 1;
        state.stats.entities_discovered += u64::from(log.entities_discovered);
        state.stats.entries_generated += u64::from(log.entries_generated);
        state.stats.entries_reviewed += u64::from(
            log.entries_reviewed + log.entries_expanded + log.entries_refreshed,
        );
        state.last_run = Some(now);
        state.next_run = Some(self.next_run_after(now));
        state.current_task = None;
        if state.status != AgentStatus::Paused {
            state.status = AgentStatus::Idle;
        }
        state.error = match outcome {
            RunOutcome::Failed => Some(
                log.errors
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "run failed".to_string()),
            ),
            RunOutcome::Success | RunOutcome::Partial => None,
        };

        info!(
            run_id = %log.id,
            outcome = %outcome,
            generated = log.entries_generated,
            reviewed = log.entries_reviewed,
            errors = log.errors.len(),
            duration_ms = log.duration_ms,
            "run completed"
        );

        state.history.insert(0, log);
        state.history.truncate(HISTORY_LIMIT);
        self.save(&state)?;
        Ok(state)
    }

    /// Operator pause. Takes effect for the next trigger; a run in flight
    /// notices it at its next checkpoint.
    pub fn pause(&self) -> Result<AgentState, LoreError> {
        let mut state = self.load();
        state.status = AgentStatus::Paused;
        self.save(&state)?;
        info!("agent paused");
        Ok(state)
    }

    /// Operator resume. Only `paused` changes; other states are returned as-is.
    pub fn resume(&self, now: DateTime<Utc>) -> Result<AgentState, LoreError> {
        let mut state = self.load();
        if state.status == AgentStatus::Paused {
            state.status = AgentStatus::Idle;
            state.next_run = Some(self.next_run_after(now));
            self.save(&state)?;
            info!("agent resumed");
        }
        Ok(state)
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.load().status == AgentStatus::Paused
    }

    /// Free-text progress note shown by `status`. Failures are logged only.
    pub fn set_current_task(&self, task: &str) {
        let mut state = self.load();
        state.current_task = Some(task.to_string());
        if let Err(err) = self.save(&state) {
            warn!(%err, "failed to record current task");
        }
    }

    /// Whether a full scan is due.
    #[must_use]
    pub fn should_run_scan(&self, now: DateTime<Utc>, interval_hours: u32) -> bool {
        scan_due(self.load().last_scan, now, interval_hours)
    }

    pub fn record_scan_complete(&self, now: DateTime<Utc>) -> Result<(), LoreError> {
        let mut state = self.load();
        state.last_scan = Some(now);
        self.save(&state)
    }

    /// Bump the approval counters after a human disposition.
    pub fn record_disposition(&self, approved: bool) {
        let mut state = self.load();
        if approved {
            state.stats.entries_approved += 1;
        } else {
            state.stats.entries_rejected += 1;
        }
        if let Err(err) = self.save(&state) {
            warn!(%err, "failed to record disposition stats");
        }
    }
}

/// Pure scan-interval check.
#[must_use]
pub fn scan_due(last_scan: Option<DateTime<Utc>>, now: DateTime<Utc>, interval_hours: u32) -> bool {
    last_scan.is_none_or(|last| now - last >= Duration::hours(i64::from(interval_hours)))
}

// ---------------------------------------------------------------------------
// Run guard
// ---------------------------------------------------------------------------

/// Holds an admitted run and guarantees it is completed.
///
/// If the guard is dropped without [`RunGuard::finish`] (early return or
/// panic unwinding) the run is completed as `failed`, so the state never
/// stays `running` after the driver returns.
#[derive(Debug)]
pub struct RunGuard {
    machine: AgentStateMachine,
    log: RunLog,
    finished: bool,
}

impl RunGuard {
    #[must_use]
    pub const fn new(machine: AgentStateMachine, log: RunLog) -> Self {
        Self {
            machine,
            log,
            finished: false,
        }
    }

    /// The in-flight run log.
    #[must_use]
    pub const fn log(&self) -> &RunLog {
        &self.log
    }

    pub const fn log_mut(&mut self) -> &mut RunLog {
        &mut self.log
    }

    #[must_use]
    pub const fn machine(&self) -> &AgentStateMachine {
        &self.machine
    }

    /// Complete the run with `outcome`.
    pub fn finish(mut self, outcome: RunOutcome, now: DateTime<Utc>) -> Result<AgentState, LoreError> {
        self.finished = true;
        let log = std::mem::replace(&mut self.log, RunLog::new(String::new(), now));
        self.machine.complete(log, outcome, now)
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut log = self.log.clone();
        log.push_error("run aborted before completion");
        if let Err(err) = self.machine.complete(log, RunOutcome::Failed, Utc::now()) {
            warn!(%err, "failed to close aborted run");
        }
    }
}
