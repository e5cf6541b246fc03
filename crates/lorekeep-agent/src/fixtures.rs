//! Shared setup for unit tests.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use lorekeep_core::config::AgentConfig;
use lorekeep_core::discovery_queue::Candidate;
use lorekeep_core::lore::LoreTree;
use lorekeep_core::model::{DiscoveredEntity, EntityCategory, SourceKind};
use lorekeep_core::storage::{FileBackend, Storage};
use tempfile::TempDir;

use crate::cancel::{CancelToken, RunBudget};
use crate::client::GenerationClient;
use crate::context::{Stage, Stores};
use crate::sources::{SourceDoc, SourceLibrary};

pub const SILVER_CITY_PAGE: &str = "# Silver City Expansion\n\n\
## LOCATIONS\n\n\
### Silver City\n\
Silver City is a gleaming ruin where the lanterns never go out. \
Survivors who settle there trade in quiet bargains with the Watcher.\n\n\
## NEW MONSTERS\n\n\
### Gilded Lion\n\
A lion whose mane is hammered gold, stalking the edges of Silver City.\n";

pub const SILVER_CITY_RUMOURS: &str = "# Forum: Silver City theories\n\n\
Some players think Silver City was built by the same people who carved the \
stone faces. Nobody has confirmed this, but the art for Silver City shows \
the same masks.\n";

pub const PRIORITY: &[SourceKind] = &[
    SourceKind::Shop,
    SourceKind::Rulebook,
    SourceKind::Newsletter,
    SourceKind::Community,
];

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap()
}

pub struct Fixture {
    pub dir: TempDir,
    pub stores: Stores,
    pub config: AgentConfig,
    pub library: SourceLibrary,
    pub budget: RunBudget,
}

impl Fixture {
    pub fn new(docs: Vec<SourceDoc>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(FileBackend::new(&dir.path().join("data")));
        let tree = LoreTree::new(&dir.path().join("lore"), &[]);
        let mut config = AgentConfig::default();
        config.schedule.api_delay_ms = 0;
        let stores = Stores::open(storage, tree, &config);
        Self {
            dir,
            stores,
            config,
            library: SourceLibrary::from_docs(docs, PRIORITY),
            budget: RunBudget::unlimited(CancelToken::new()),
        }
    }

    pub fn silver_city() -> Self {
        Self::new(vec![
            SourceDoc::new("shop/silver-city.txt", SourceKind::Shop, SILVER_CITY_PAGE),
            SourceDoc::new("community/theories.md", SourceKind::Community, SILVER_CITY_RUMOURS),
        ])
    }

    pub fn stage<'a>(&'a self, client: &'a dyn GenerationClient) -> Stage<'a> {
        Stage {
            stores: &self.stores,
            client,
            library: &self.library,
            config: &self.config,
            budget: &self.budget,
            run_id: Some("run-test"),
        }
    }

    /// Queue one entity and return it.
    pub fn queue_entity(&self, name: &str, category: EntityCategory) -> DiscoveredEntity {
        let candidate = Candidate {
            name: name.to_string(),
            category,
            sources: vec!["shop/silver-city.txt".into()],
            confidence: 0.9,
            priority: 1,
            description: format!("{name} from the shop page"),
        };
        let report = self
            .stores
            .discovery
            .add(vec![candidate], &Default::default(), now())
            .unwrap();
        self.stores.discovery.get(&report.added[0]).unwrap()
    }

    /// Publish `content` at `path` directly.
    pub fn publish(&self, path: &str, content: &str) {
        self.stores.tree.write(path, content).unwrap();
    }
}

pub fn zero_budget() -> RunBudget {
    RunBudget::new(CancelToken::new(), Duration::ZERO)
}
