use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ConfidenceLevel, wire_enum};

wire_enum! {
    ChangeType ("change type") {
        Create => "create",
        Update => "update",
        Delete => "delete",
        Expand => "expand",
        Verify => "verify",
        Link => "link",
        Citation => "citation",
        Metadata => "metadata",
    }
}

wire_enum! {
    /// Who or what made a change.
    ChangeSource ("change source") {
        AgentResearch => "agent_research",
        AgentExpansion => "agent_expansion",
        AgentVerification => "agent_verification",
        HumanReview => "human_review",
        HumanEdit => "human_edit",
        Import => "import",
        System => "system",
    }
}

wire_enum! {
    ChangeReviewStatus ("review status") {
        AutoApproved => "auto_approved",
        PendingReview => "pending_review",
        Approved => "approved",
        Rejected => "rejected",
        RolledBack => "rolled_back",
    }
}

/// Line-level summary of a change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiffSummary {
    pub lines_added: u32,
    pub lines_removed: u32,
    pub sections_changed: Vec<String>,
}

impl DiffSummary {
    /// Multiset line diff between two texts. Good enough for an audit
    /// summary; not a minimal edit script.
    #[must_use]
    pub fn between(before: &str, after: &str) -> Self {
        use std::collections::HashMap;

        let mut counts: HashMap<&str, i64> = HashMap::new();
        for line in before.lines() {
            *counts.entry(line).or_default() -= 1;
        }
        for line in after.lines() {
            *counts.entry(line).or_default() += 1;
        }
        let (mut added, mut removed) = (0u32, 0u32);
        for delta in counts.values() {
            let magnitude = u32::try_from(delta.unsigned_abs()).unwrap_or(u32::MAX);
            if *delta > 0 {
                added = added.saturating_add(magnitude);
            } else {
                removed = removed.saturating_add(magnitude);
            }
        }

        let headings = |text: &str| -> Vec<String> {
            text.lines()
                .filter(|l| l.starts_with("## "))
                .map(|l| l.trim_start_matches('#').trim().to_string())
                .collect()
        };
        let old_heads = headings(before);
        let sections_changed = headings(after)
            .into_iter()
            .filter(|h| !old_heads.contains(h))
            .collect();

        Self {
            lines_added: added,
            lines_removed: removed,
            sections_changed,
        }
    }
}

/// Immutable audit record. Only review fields change after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangelogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub source: ChangeSource,
    /// Affected files, relative to the lore root.
    pub files: Vec<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub diff: DiffSummary,
    #[serde(default)]
    pub confidence: Option<ConfidenceLevel>,
    pub review_status: ChangeReviewStatus,
    #[serde(default)]
    pub reviewed_by: Option<String>,
    #[serde(default)]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub review_note: Option<String>,
    #[serde(default)]
    pub pending_entry_id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub run_id: Option<String>,
}
