use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EntityCategory, wire_enum};

wire_enum! {
    Severity ("severity") {
        Low => "low",
        Medium => "medium",
        High => "high",
    }
}

impl Severity {
    /// Score penalty per issue of this severity.
    #[must_use]
    pub const fn penalty(self) -> u32 {
        match self {
            Self::High => 20,
            Self::Medium => 10,
            Self::Low => 5,
        }
    }
}

wire_enum! {
    /// Scanner rule that produced an issue.
    IssueKind ("issue kind") {
        MissingFrontmatter => "missing_frontmatter",
        MalformedFrontmatter => "malformed_frontmatter",
        MissingField => "missing_field",
        QuotedArray => "quoted_array",
        MissingCitations => "missing_citations",
        DuplicateCitation => "duplicate_citation",
        BrokenLink => "broken_link",
        StaleContent => "stale_content",
        ThinContent => "thin_content",
        ConfidenceMismatch => "confidence_mismatch",
        MissingOverview => "missing_overview",
        MissingTitle => "missing_title",
    }
}

impl IssueKind {
    /// Fixed severity of each rule.
    #[must_use]
    pub const fn severity(self) -> Severity {
        match self {
            Self::MissingFrontmatter
            | Self::MalformedFrontmatter
            | Self::MissingCitations
            | Self::BrokenLink => Severity::High,
            Self::MissingField
            | Self::QuotedArray
            | Self::DuplicateCitation
            | Self::ThinContent
            | Self::ConfidenceMismatch => Severity::Medium,
            Self::StaleContent | Self::MissingOverview | Self::MissingTitle => Severity::Low,
        }
    }

    /// Broken content that blocks readers, as opposed to quality gaps.
    #[must_use]
    pub const fn is_structural(self) -> bool {
        matches!(
            self,
            Self::MissingFrontmatter | Self::MalformedFrontmatter | Self::BrokenLink
        )
    }
}

/// One detected defect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    #[serde(rename = "type")]
    pub kind: IssueKind,
    pub severity: Severity,
    pub detail: String,
}

impl Issue {
    #[must_use]
    pub fn new(kind: IssueKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            detail: detail.into(),
        }
    }
}

wire_enum! {
    ReviewStatus ("review status") {
        Queued => "queued",
        Reviewing => "reviewing",
        PendingApproval => "pending_approval",
        Completed => "completed",
        Skipped => "skipped",
    }
}

impl ReviewStatus {
    /// Still occupies the entry's single slot in the active queue.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Queued | Self::Reviewing | Self::PendingApproval)
    }
}

/// A published entry flagged by the scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewQueueEntry {
    pub id: String,
    /// Relative to the lore root; the queue key.
    pub file_path: String,
    pub entry_name: String,
    pub category: Option<EntityCategory>,
    pub issues: Vec<Issue>,
    pub score: u8,
    pub priority: u32,
    pub status: ReviewStatus,
    pub queued_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pending_entry_id: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

impl ReviewQueueEntry {
    #[must_use]
    pub fn has_issue(&self, kind: IssueKind) -> bool {
        self.issues.iter().any(|i| i.kind == kind)
    }

    /// Any issue that counts as broken content.
    #[must_use]
    pub fn needs_repair(&self) -> bool {
        self.issues.iter().any(|i| i.kind.is_structural())
    }
}
