use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::wire_enum;

wire_enum! {
    /// Run gate. Only `idle` admits a new run.
    AgentStatus ("agent status") {
        Idle => "idle",
        Running => "running",
        Paused => "paused",
    }
}

impl Default for AgentStatus {
    fn default() -> Self {
        Self::Idle
    }
}

wire_enum! {
    /// How a finished run went.
    RunOutcome ("run outcome") {
        /// Every planned item succeeded.
        Success => "success",
        /// Some items failed or the run was cut short.
        Partial => "partial",
        /// The run aborted or nothing succeeded.
        Failed => "failed",
    }
}

/// Cumulative counters across all runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentStats {
    pub total_runs: u64,
    pub entities_discovered: u64,
    pub entries_generated: u64,
    pub entries_reviewed: u64,
    pub entries_approved: u64,
    pub entries_rejected: u64,
}

/// One bounded execution of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunLog {
    pub id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub outcome: Option<RunOutcome>,
    #[serde(default)]
    pub entities_discovered: u32,
    #[serde(default)]
    pub entries_generated: u32,
    #[serde(default)]
    pub entries_reviewed: u32,
    #[serde(default)]
    pub entries_expanded: u32,
    #[serde(default)]
    pub entries_refreshed: u32,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl RunLog {
    #[must_use]
    pub fn new(id: String, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            started_at,
            completed_at: None,
            outcome: None,
            entities_discovered: 0,
            entries_generated: 0,
            entries_reviewed: 0,
            entries_expanded: 0,
            entries_refreshed: 0,
            errors: Vec::new(),
            duration_ms: 0,
        }
    }

    /// Items that produced a draft this run.
    #[must_use]
    pub const fn items_succeeded(&self) -> u32 {
        self.entries_generated + self.entries_reviewed + self.entries_expanded + self.entries_refreshed
    }

    /// Record a recoverable failure.
    pub fn push_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }
}

/// The persisted singleton behind the run gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentState {
    pub status: AgentStatus,
    pub current_task: Option<String>,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub last_scan: Option<DateTime<Utc>>,
    /// Error from the most recent failed run, cleared by the next success.
    pub error: Option<String>,
    pub stats: AgentStats,
    /// Most recent first.
    pub history: Vec<RunLog>,
}
