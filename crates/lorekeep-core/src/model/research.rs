use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ConfidenceLevel, EntityCategory, wire_enum};

wire_enum! {
    TaskType ("task type") {
        ExploreTopic => "explore_topic",
        ExpandEntry => "expand_entry",
        VerifyFacts => "verify_facts",
        FindConnections => "find_connections",
        UpdateCitations => "update_citations",
        WebResearch => "web_research",
        CreateEntry => "create_entry",
    }
}

wire_enum! {
    TaskStatus ("task status") {
        Queued => "queued",
        InProgress => "in_progress",
        Completed => "completed",
        Failed => "failed",
        NeedsReview => "needs_review",
        Approved => "approved",
        Rejected => "rejected",
    }
}

impl TaskStatus {
    /// Valid moves:
    /// - `queued -> in_progress`
    /// - `in_progress -> completed | failed | needs_review`
    /// - `completed -> needs_review`
    /// - `needs_review -> approved | rejected`
    /// - `failed -> queued` (retry)
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Queued, Self::InProgress)
                | (
                    Self::InProgress,
                    Self::Completed | Self::Failed | Self::NeedsReview
                )
                | (Self::Completed, Self::NeedsReview)
                | (Self::NeedsReview, Self::Approved | Self::Rejected)
                | (Self::Failed, Self::Queued)
        )
    }

    /// No further work or review is expected.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Failed)
    }
}

/// Facts gathered by a research task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResearchFindings {
    pub summary: String,
    pub facts: Vec<String>,
    pub connections: Vec<String>,
    pub sources: Vec<String>,
}

/// Entry a research task proposes to publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedEntry {
    pub title: String,
    pub category: EntityCategory,
    pub content: String,
    pub confidence: ConfidenceLevel,
}

/// A unit of scheduled research work, separate from discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchTask {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub topic: String,
    #[serde(default)]
    pub description: String,
    /// 1 (lowest) to 10 (highest).
    pub priority: u8,
    #[serde(default)]
    pub target_file: Option<String>,
    #[serde(default)]
    pub findings: Option<ResearchFindings>,
    #[serde(default)]
    pub suggested_entry: Option<SuggestedEntry>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reviewed_by: Option<String>,
}

/// Log line for one research runner invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchSession {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub tasks_processed: u32,
    pub tasks_failed: u32,
    #[serde(default)]
    pub task_ids: Vec<String>,
}
