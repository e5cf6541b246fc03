use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ConfidenceLevel, EntityCategory, wire_enum};

wire_enum! {
    /// Disposition of a draft.
    PendingStatus ("pending status") {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
    }
}

wire_enum! {
    /// What a revision draft was asked to do.
    ReviewMode ("review mode") {
        /// Fix scanner issues only.
        Repair => "repair",
        /// Deepen a shallow entry.
        Expand => "expand",
        /// Bring stale metadata and facts up to date.
        Refresh => "refresh",
    }
}

/// Where a draft came from and where it publishes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingKind {
    /// Brand-new entry generated for a discovered entity.
    NewEntry {
        #[serde(rename = "entityId")]
        entity_id: String,
    },
    /// Revision of a published file, relative to the lore root.
    Revision {
        #[serde(rename = "originalPath")]
        original_path: String,
        mode: ReviewMode,
    },
    /// Entry suggested by a research task.
    Research {
        #[serde(rename = "taskId")]
        task_id: String,
    },
}

/// A draft awaiting approval. Approval is the only path into the published
/// lore tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEntry {
    pub id: String,
    #[serde(flatten)]
    pub kind: PendingKind,
    pub title: String,
    pub slug: String,
    pub category: EntityCategory,
    /// Full markdown including frontmatter.
    pub content: String,
    /// Citation ids (`[400-404]`) referenced by the draft.
    #[serde(default)]
    pub citations: Vec<String>,
    pub confidence: ConfidenceLevel,
    #[serde(default)]
    pub source_files: Vec<String>,
    #[serde(default)]
    pub connections: Vec<String>,
    pub status: PendingStatus,
    /// Revision counter for the target path, starting at 1.
    #[serde(default = "first_version")]
    pub version: u32,
    /// Changelog entry written alongside this draft.
    #[serde(default)]
    pub changelog_id: Option<String>,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reviewed_by: Option<String>,
    #[serde(default)]
    pub review_notes: Option<String>,
}

const fn first_version() -> u32 {
    1
}

impl PendingEntry {
    /// Target path relative to the lore root.
    #[must_use]
    pub fn target_path(&self) -> String {
        match &self.kind {
            PendingKind::Revision { original_path, .. } => original_path.clone(),
            PendingKind::NewEntry { .. } | PendingKind::Research { .. } => {
                format!("{}/{}.md", self.category.dir_name(), self.slug)
            }
        }
    }
}
