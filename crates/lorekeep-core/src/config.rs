use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::model::{ConfidenceLevel, SourceKind};
use crate::storage::{Storage, keys};

// ---------------------------------------------------------------------------
// Project config (.lorekeep/config.toml)
// ---------------------------------------------------------------------------

/// Filesystem layout of a lore project, read from `.lorekeep/config.toml`.
///
/// Relative paths are resolved against the project root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub paths: PathsConfig,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Published lore tree, one directory per category.
    #[serde(default = "default_lore_dir")]
    pub lore: PathBuf,
    /// Raw scraped source text, one directory per source kind.
    #[serde(default = "default_sources_dir")]
    pub sources: PathBuf,
    /// Document store for the file backend.
    #[serde(default = "default_data_dir")]
    pub data: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            lore: default_lore_dir(),
            sources: default_sources_dir(),
            data: default_data_dir(),
        }
    }
}

fn default_lore_dir() -> PathBuf {
    PathBuf::from("docs/lore")
}

fn default_sources_dir() -> PathBuf {
    PathBuf::from("docs/lore/sources")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".lorekeep/data")
}

/// Absolute paths derived from a [`ProjectConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub lore: PathBuf,
    pub sources: PathBuf,
    pub data: PathBuf,
}

impl ProjectConfig {
    #[must_use]
    pub fn resolve(&self, project_root: &Path) -> ProjectPaths {
        let abs = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                project_root.join(p)
            }
        };
        ProjectPaths {
            root: project_root.to_path_buf(),
            lore: abs(&self.paths.lore),
            sources: abs(&self.paths.sources),
            data: abs(&self.paths.data),
        }
    }
}

pub fn load_project_config(project_root: &Path) -> Result<ProjectConfig> {
    let path = project_root.join(".lorekeep/config.toml");
    if !path.exists() {
        return Ok(ProjectConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<ProjectConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

// ---------------------------------------------------------------------------
// Agent config (persisted document `agent-config`)
// ---------------------------------------------------------------------------

/// Runtime knobs for the pipeline. Stored as a JSON document; fields missing
/// from the stored copy take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub auto_approve: AutoApproveConfig,
    #[serde(default)]
    pub review: ReviewConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub changelog: ChangelogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleConfig {
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u32,
    #[serde(default = "default_max_entries_per_run")]
    pub max_entries_per_run: usize,
    #[serde(default = "default_api_delay_ms")]
    pub api_delay_ms: u64,
    #[serde(default = "default_scan_interval_hours")]
    pub scan_interval_hours: u32,
    /// Wall-clock budget for one run.
    #[serde(default = "default_max_run_seconds")]
    pub max_run_seconds: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            max_entries_per_run: default_max_entries_per_run(),
            api_delay_ms: default_api_delay_ms(),
            scan_interval_hours: default_scan_interval_hours(),
            max_run_seconds: default_max_run_seconds(),
        }
    }
}

const fn default_interval_minutes() -> u32 {
    60
}
const fn default_max_entries_per_run() -> usize {
    3
}
const fn default_api_delay_ms() -> u64 {
    2000
}
const fn default_scan_interval_hours() -> u32 {
    24
}
const fn default_max_run_seconds() -> u64 {
    60
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

fn default_model() -> String {
    "claude-opus-4-5-20251101".to_string()
}
const fn default_max_tokens() -> u32 {
    4096
}
const fn default_temperature() -> f64 {
    0.7
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcesConfig {
    /// Source kinds in the order they are scanned and ranked.
    #[serde(default = "default_source_priority")]
    pub priority: Vec<SourceKind>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            priority: default_source_priority(),
        }
    }
}

fn default_source_priority() -> Vec<SourceKind> {
    vec![
        SourceKind::Shop,
        SourceKind::Rulebook,
        SourceKind::Newsletter,
        SourceKind::Community,
    ]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryConfig {
    /// Source files read per invocation.
    #[serde(default = "default_max_sources")]
    pub max_sources: usize,
    /// Call the external classifier instead of the header heuristic.
    #[serde(default = "default_true")]
    pub use_classifier: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_sources: default_max_sources(),
            use_classifier: default_true(),
        }
    }
}

const fn default_max_sources() -> usize {
    10
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoApproveConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Drafts at or above this confidence are published without review.
    #[serde(default = "default_auto_approve_threshold")]
    pub min_confidence: ConfidenceLevel,
}

impl Default for AutoApproveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_confidence: default_auto_approve_threshold(),
        }
    }
}

const fn default_auto_approve_threshold() -> ConfidenceLevel {
    ConfidenceLevel::Confirmed
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewConfig {
    /// Entries scoring below this are queued for review.
    #[serde(default = "default_score_threshold")]
    pub score_threshold: u8,
    /// `lastUpdated` older than this many days counts as stale.
    #[serde(default = "default_stale_days")]
    pub stale_days: i64,
    /// Body text shorter than this (in characters) counts as thin.
    #[serde(default = "default_thin_chars")]
    pub thin_content_chars: usize,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            score_threshold: default_score_threshold(),
            stale_days: default_stale_days(),
            thin_content_chars: default_thin_chars(),
        }
    }
}

const fn default_score_threshold() -> u8 {
    80
}
const fn default_stale_days() -> i64 {
    180
}
const fn default_thin_chars() -> usize {
    600
}

/// Per-class caps for the work planner. `None` means uncapped; the review
/// and generate defaults are derived from `generate_ratio` at plan time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerConfig {
    #[serde(default = "default_generate_ratio")]
    pub generate_ratio: f64,
    #[serde(default)]
    pub repair_quota: Option<usize>,
    #[serde(default)]
    pub review_quota: Option<usize>,
    #[serde(default)]
    pub expand_quota: Option<usize>,
    #[serde(default)]
    pub stale_quota: Option<usize>,
    #[serde(default)]
    pub generate_quota: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            generate_ratio: default_generate_ratio(),
            repair_quota: None,
            review_quota: None,
            expand_quota: None,
            stale_quota: None,
            generate_quota: None,
        }
    }
}

const fn default_generate_ratio() -> f64 {
    0.7
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangelogConfig {
    #[serde(default = "default_retain_days")]
    pub retain_days: i64,
    #[serde(default = "default_max_changelog_entries")]
    pub max_entries: usize,
}

impl Default for ChangelogConfig {
    fn default() -> Self {
        Self {
            retain_days: default_retain_days(),
            max_entries: default_max_changelog_entries(),
        }
    }
}

const fn default_retain_days() -> i64 {
    365
}
const fn default_max_changelog_entries() -> usize {
    1000
}

const fn default_true() -> bool {
    true
}

impl AgentConfig {
    /// Load the persisted config, defaults filling any gaps.
    #[must_use]
    pub fn load(storage: &Storage) -> Self {
        storage.get_or_default(keys::AGENT_CONFIG)
    }

    /// Persist the config. Returns `false` if the write failed.
    pub fn save(&self, storage: &Storage) -> bool {
        storage.set(keys::AGENT_CONFIG, self)
    }

    /// Set one field by dotted camelCase path, e.g. `schedule.apiDelayMs`.
    ///
    /// The value is parsed as JSON when possible and as a bare string
    /// otherwise, then the whole config is re-validated by deserializing.
    pub fn set_path(&self, path: &str, raw: &str) -> Result<Self> {
        let mut doc = serde_json::to_value(self).context("failed to encode config")?;
        let value: serde_json::Value = serde_json::from_str(raw)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));

        let mut cursor = &mut doc;
        let segments: Vec<&str> = path.split('.').collect();
        let (last, parents) = segments
            .split_last()
            .with_context(|| format!("empty config path '{path}'"))?;
        for seg in parents {
            cursor = cursor
                .get_mut(*seg)
                .with_context(|| format!("unknown config section '{seg}' in '{path}'"))?;
        }
        let slot = cursor
            .get_mut(*last)
            .with_context(|| format!("unknown config key '{path}'"))?;
        *slot = value;

        serde_json::from_value(doc).with_context(|| format!("invalid value for '{path}': {raw}"))
    }
}
