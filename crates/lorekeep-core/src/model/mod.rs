//! Persisted records of the pipeline.
//!
//! Every record is owned by [`crate::storage::Storage`] and refers to others
//! by identifier only (slug, file path, task id). Field names serialize in
//! camelCase and enum values in `snake_case`, the shape of the JSON
//! documents the operational surface reads.

pub mod agent;
pub mod changelog;
pub mod citation;
pub mod entity;
pub mod pending;
pub mod research;
pub mod review;

pub use agent::{AgentState, AgentStats, AgentStatus, RunLog, RunOutcome};
pub use changelog::{ChangeReviewStatus, ChangeSource, ChangeType, ChangelogEntry, DiffSummary};
pub use citation::{Citation, CitationIndex};
pub use entity::{DiscoveredEntity, EntityStatus};
pub use pending::{PendingEntry, PendingKind, PendingStatus, ReviewMode};
pub use research::{ResearchSession, ResearchTask, TaskStatus, TaskType};
pub use review::{Issue, IssueKind, ReviewQueueEntry, ReviewStatus, Severity};

/// Error returned when parsing an enum value from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {expected}: '{got}'")]
pub struct ParseEnumError {
    pub expected: &'static str,
    pub got: String,
}

pub(crate) fn normalize(input: &str) -> String {
    input.trim().to_ascii_lowercase().replace('-', "_")
}

/// Declare a closed string enum with serde, `as_str`, `Display`, `FromStr`
/// and an `ALL` table, keeping the wire names in one place.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident ($label:literal) {
            $( $(#[$vmeta:meta])* $variant:ident => $wire:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            ::serde::Serialize, ::serde::Deserialize,
        )]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $wire)] $variant ),+
        }

        impl $name {
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $wire),+
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = $crate::model::ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let normalized = $crate::model::normalize(s);
                match normalized.as_str() {
                    $($wire => Ok(Self::$variant),)+
                    _ => Err($crate::model::ParseEnumError {
                        expected: $label,
                        got: s.to_string(),
                    }),
                }
            }
        }
    };
}

pub(crate) use wire_enum;

wire_enum! {
    /// How far a statement can be trusted. Ordered weakest first, so `min`
    /// over contributing sources gives the weakest.
    ConfidenceLevel ("confidence") {
        Speculative => "speculative",
        Likely => "likely",
        Confirmed => "confirmed",
    }
}

wire_enum! {
    /// Where a piece of source text was scraped from.
    SourceKind ("source kind") {
        Shop => "shop",
        Rulebook => "rulebook",
        Newsletter => "newsletter",
        Community => "community",
    }
}

impl SourceKind {
    /// Confidence a claim inherits from this kind of source.
    #[must_use]
    pub const fn confidence(self) -> ConfidenceLevel {
        match self {
            Self::Shop | Self::Rulebook => ConfidenceLevel::Confirmed,
            Self::Newsletter => ConfidenceLevel::Likely,
            Self::Community => ConfidenceLevel::Speculative,
        }
    }
}

wire_enum! {
    /// Lore category, also the directory name under the lore root.
    EntityCategory ("category") {
        Monster => "monster",
        Character => "character",
        Faction => "faction",
        Location => "location",
        Concept => "concept",
        Item => "item",
        Event => "event",
    }
}

impl EntityCategory {
    /// Directory that holds published entries of this category.
    #[must_use]
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::Monster => "monsters",
            Self::Character => "characters",
            Self::Faction => "factions",
            Self::Location => "locations",
            Self::Concept => "concepts",
            Self::Item => "items",
            Self::Event => "events",
        }
    }

    /// Inverse of [`Self::dir_name`]; also accepts the singular form.
    #[must_use]
    pub fn from_dir_name(dir: &str) -> Option<Self> {
        let d = normalize(dir);
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.dir_name() == d || c.as_str() == d)
    }
}
