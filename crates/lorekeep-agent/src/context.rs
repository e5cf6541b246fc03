use std::time::Instant;

use chrono::{DateTime, TimeDelta, Utc};

use lorekeep_core::changelog::Changelog;
use lorekeep_core::citations::Citations;
use lorekeep_core::config::AgentConfig;
use lorekeep_core::discovery_queue::DiscoveryQueue;
use lorekeep_core::lore::LoreTree;
use lorekeep_core::pending::{PendingEntries, Publisher};
use lorekeep_core::research::ResearchQueue;
use lorekeep_core::review_queue::ReviewQueue;
use lorekeep_core::state::AgentStateMachine;
use lorekeep_core::storage::Storage;

use crate::cancel::RunBudget;
use crate::client::GenerationClient;
use crate::sources::SourceLibrary;

/// Handles on every persisted structure, all over one [`Storage`].
#[derive(Debug, Clone)]
pub struct Stores {
    pub storage: Storage,
    pub tree: LoreTree,
    pub agent: AgentStateMachine,
    pub discovery: DiscoveryQueue,
    pub pending: PendingEntries,
    pub reviews: ReviewQueue,
    pub citations: Citations,
    pub changelog: Changelog,
    pub research: ResearchQueue,
}

impl Stores {
    #[must_use]
    pub fn open(storage: Storage, tree: LoreTree, config: &AgentConfig) -> Self {
        Self {
            agent: AgentStateMachine::new(storage.clone(), config.schedule.interval_minutes),
            discovery: DiscoveryQueue::new(storage.clone()),
            pending: PendingEntries::new(storage.clone()),
            reviews: ReviewQueue::new(storage.clone()),
            citations: Citations::new(storage.clone()),
            changelog: Changelog::new(storage.clone(), config.changelog.clone()),
            research: ResearchQueue::new(storage.clone()),
            storage,
            tree,
        }
    }

    /// Collaborators for approving or rejecting drafts.
    #[must_use]
    pub const fn publisher(&self) -> Publisher<'_> {
        Publisher {
            tree: &self.tree,
            changelog: &self.changelog,
            agent: &self.agent,
        }
    }
}

/// What a generating stage works with during one run.
#[derive(Clone, Copy)]
pub struct Stage<'a> {
    pub stores: &'a Stores,
    pub client: &'a dyn GenerationClient,
    pub library: &'a SourceLibrary,
    pub config: &'a AgentConfig,
    pub budget: &'a RunBudget,
    /// Run the work belongs to, recorded on changelog entries.
    pub run_id: Option<&'a str>,
}

/// `start` advanced by the wall time elapsed since `since`.
pub(crate) fn stamp(start: DateTime<Utc>, since: Instant) -> DateTime<Utc> {
    start + TimeDelta::from_std(since.elapsed()).unwrap_or_else(|_| TimeDelta::zero())
}
