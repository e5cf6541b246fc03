//! Opening a lore project from the working directory.

use std::path::Path;

use anyhow::{Context, Result};
use lorekeep_agent::{Pipeline, Stores};
use lorekeep_core::config::{AgentConfig, ProjectPaths, load_project_config};
use lorekeep_core::lore::LoreTree;
use lorekeep_core::storage::{Storage, StorageMode};
use tracing::debug;

/// Everything a command needs: resolved paths, stores and the agent config.
pub struct Project {
    pub paths: ProjectPaths,
    pub stores: Stores,
    pub config: AgentConfig,
    pub backend: &'static str,
}

impl Project {
    pub fn open(root: &Path) -> Result<Self> {
        let project = load_project_config(root).context("loading project config")?;
        let paths = project.resolve(root);
        let mode = StorageMode::from_env(&paths.data);
        let storage = Storage::open(&mode);
        let config = AgentConfig::load(&storage);
        // sources may live inside the lore tree
        let tree = LoreTree::new(&paths.lore, &[paths.sources.as_path()]);
        let stores = Stores::open(storage, tree, &config);
        debug!(
            root = %paths.root.display(),
            backend = mode.label(),
            "project opened"
        );
        Ok(Self {
            paths,
            stores,
            config,
            backend: mode.label(),
        })
    }

    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(
            self.stores.clone(),
            self.config.clone(),
            self.paths.sources.clone(),
        )
    }
}
