use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EntityCategory, wire_enum};

wire_enum! {
    /// Processing status of a discovered entity.
    EntityStatus ("entity status") {
        Queued => "queued",
        Processing => "processing",
        Done => "done",
        Rejected => "rejected",
    }
}

impl EntityStatus {
    /// Valid moves:
    /// - `queued -> processing` (claim)
    /// - `processing -> done`
    /// - `processing -> queued` (failure, retry later)
    /// - `queued -> rejected`, `processing -> rejected`
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Queued, Self::Processing | Self::Rejected)
                | (Self::Processing, Self::Done | Self::Queued | Self::Rejected)
        )
    }
}

/// A candidate topic found in source material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredEntity {
    pub id: String,
    pub name: String,
    pub category: EntityCategory,
    /// Source file paths relative to the sources root.
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub description: String,
    pub status: EntityStatus,
    pub discovered_at: DateTime<Utc>,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
    /// Pending entry produced for this entity, once generated.
    #[serde(default)]
    pub pending_entry_id: Option<String>,
    #[serde(default)]
    pub attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::EntityStatus;

    #[test]
    fn lifecycle_rules() {
        use EntityStatus::{Done, Processing, Queued, Rejected};
        assert!(Queued.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Done));
        assert!(Processing.can_transition_to(Queued));
        assert!(!Queued.can_transition_to(Done));
        assert!(!Done.can_transition_to(Processing));
        assert!(!Done.can_transition_to(Queued));
        assert!(!Processing.can_transition_to(Processing));
        assert!(!Rejected.can_transition_to(Queued));
    }
}
