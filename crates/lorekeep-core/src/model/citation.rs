use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SourceKind;

/// First citation number issued to a fresh index.
pub const FIRST_CITATION_NUMBER: u32 = 400;

/// A numbered reference to a source, rendered as `[N-M]` in entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    /// Marker text without brackets, e.g. `400-404`.
    pub id: String,
    pub number: u32,
    pub source: String,
    pub source_kind: SourceKind,
    /// Source file relative to the sources root.
    pub path: String,
    pub topic: String,
    pub created_at: DateTime<Utc>,
}

impl Citation {
    /// Marker as written in entry bodies.
    #[must_use]
    pub fn marker(&self) -> String {
        format!("[{}]", self.id)
    }
}

/// Monotonic citation numbering, deduplicated by (source path, topic).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CitationIndex {
    pub next_number: u32,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

impl Default for CitationIndex {
    fn default() -> Self {
        Self {
            next_number: FIRST_CITATION_NUMBER,
            citations: Vec::new(),
        }
    }
}
