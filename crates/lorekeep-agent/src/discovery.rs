//! Entity discovery from source material.
//!
//! Each source is read either by the external classifier or by a header
//! heuristic. A classifier failure on one source falls back to the
//! heuristic for that source and never aborts the batch.

use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use lorekeep_core::config::{AgentConfig, AiConfig};
use lorekeep_core::discovery_queue::{AddReport, Candidate, DiscoveryQueue};
use lorekeep_core::model::{EntityCategory, SourceKind};

use crate::cancel::RunBudget;
use crate::client::{CompletionRequest, GenerationClient, parse_array};
use crate::error::{AgentError, ExternalError};
use crate::sources::{SourceDoc, SourceLibrary};

/// Characters of a description kept on the entity.
const BRIEF_CHARS: usize = 300;
/// Characters of a source sent to the classifier.
const CLASSIFY_CHARS: usize = 12_000;

const SKIPPED_NAMES: &[&str] = &[
    "overview",
    "key features",
    "component list",
    "lore notes",
    "sources",
];

const MONSTER_WORDS: &[&str] = &[
    "lion", "gorm", "antelope", "phoenix", "dragon", "crocodile", "singer", "eater", "king",
    "knight", "butcher", "hand",
];
const CHARACTER_WORDS: &[&str] = &["survivor", "speaker", "archivist", "witch"];
const LOCATION_WORDS: &[&str] = &["city", "woods", "lands", "plain", "hoard", "settlement"];

static SECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^##\s+(NEW MONSTERS|MONSTERS|CHARACTERS|FACTIONS|LOCATIONS|SYSTEMS|CAMPAIGNS?)\s*$")
        .expect("valid regex")
});

static ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^###\s+([A-Z][^#\n]*?)\s*$").expect("valid regex"));

static PRODUCT_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#\s+([^-\n]+?)(?:\s+-.*)?$").expect("valid regex"));

static EXPANSION_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+expansion.*$").expect("valid regex"));

static MONSTER_CONTEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)quarry|nemesis|monster|hunt").expect("valid regex"));

/// How discovery behaves for one invocation.
#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    pub max_sources: usize,
    pub use_classifier: bool,
    /// Pause between classifier calls.
    pub api_delay: Duration,
    pub ai: AiConfig,
}

impl DiscoverySettings {
    #[must_use]
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            max_sources: config.discovery.max_sources,
            use_classifier: config.discovery.use_classifier,
            api_delay: Duration::from_millis(config.schedule.api_delay_ms),
            ai: config.ai.clone(),
        }
    }
}

/// What one invocation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub sources_scanned: usize,
    pub candidates: usize,
    /// Sources where the classifier failed and the heuristic was used.
    pub classifier_failures: usize,
    pub added: AddReport,
    /// Stopped early by cancellation or the run deadline.
    pub interrupted: bool,
}

/// Discovery confidence carried by a source kind.
#[must_use]
pub const fn kind_confidence(kind: SourceKind) -> f64 {
    match kind {
        SourceKind::Shop | SourceKind::Rulebook => 0.9,
        SourceKind::Newsletter => 0.7,
        SourceKind::Community => 0.4,
    }
}

/// Starting priority: one per source plus a bonus for the kinds readers
/// look up most.
#[must_use]
pub const fn base_priority(category: EntityCategory) -> u32 {
    1 + match category {
        EntityCategory::Monster => 3,
        EntityCategory::Character => 2,
        _ => 0,
    }
}

fn section_category(section: &str) -> Option<EntityCategory> {
    let upper = section.to_ascii_uppercase();
    if upper.contains("MONSTER") {
        Some(EntityCategory::Monster)
    } else if upper.contains("CHARACTER") {
        Some(EntityCategory::Character)
    } else if upper.contains("FACTION") {
        Some(EntityCategory::Faction)
    } else if upper.contains("LOCATION") {
        Some(EntityCategory::Location)
    } else if upper.contains("CAMPAIGN") {
        Some(EntityCategory::Event)
    } else {
        None
    }
}

/// Category from the enclosing section, then name keywords, then the
/// description. Defaults to concept.
#[must_use]
pub fn guess_category(section: Option<&str>, name: &str, description: &str) -> EntityCategory {
    if let Some(category) = section.and_then(section_category) {
        return category;
    }
    let name = name.to_lowercase();
    let has = |words: &[&str], text: &str| words.iter().any(|w| text.contains(w));
    if has(MONSTER_WORDS, &name) {
        return EntityCategory::Monster;
    }
    if has(CHARACTER_WORDS, &name) {
        return EntityCategory::Character;
    }
    if has(LOCATION_WORDS, &name) {
        return EntityCategory::Location;
    }

    let desc = description.to_lowercase();
    if has(&["monster", "quarry", "nemesis", "hunt"], &desc) {
        EntityCategory::Monster
    } else if has(&["survivor", "character"], &desc) {
        EntityCategory::Character
    } else if has(&["faction", "order", "cult"], &desc) {
        EntityCategory::Faction
    } else if has(&["location", "place", "settlement"], &desc) {
        EntityCategory::Location
    } else {
        EntityCategory::Concept
    }
}

fn brief(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    flat.chars().take(BRIEF_CHARS).collect()
}

fn candidate(doc: &SourceDoc, name: String, category: EntityCategory, description: &str) -> Candidate {
    Candidate {
        name,
        category,
        sources: vec![doc.path.clone()],
        confidence: kind_confidence(doc.kind),
        priority: base_priority(category),
        description: brief(description),
    }
}

/// Entities named by `###` headers inside known `##` sections. When there are
/// none, the product title of the page stands in.
#[must_use]
pub fn heuristic_candidates(doc: &SourceDoc) -> Vec<Candidate> {
    let lines: Vec<&str> = doc.content.lines().collect();
    let mut found = Vec::new();
    let mut section: Option<&str> = None;

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        if let Some(caps) = SECTION.captures(line) {
            section = caps.get(1).map(|m| m.as_str());
            i += 1;
            continue;
        }
        if line.starts_with("## ") || line.starts_with("# ") {
            section = None;
        }
        if let (Some(current), Some(caps)) = (section, ENTITY.captures(line)) {
            let name = caps.get(1).map_or("", |m| m.as_str()).trim().to_string();
            let body_end = lines[i + 1..]
                .iter()
                .position(|l| l.starts_with('#'))
                .map_or(lines.len(), |p| i + 1 + p);
            let description = lines[i + 1..body_end].join("\n");
            if !name.is_empty() && !SKIPPED_NAMES.contains(&name.to_lowercase().as_str()) {
                let category = guess_category(Some(current), &name, &description);
                found.push(candidate(doc, name, category, &description));
            }
            i = body_end;
            continue;
        }
        i += 1;
    }

    if found.is_empty()
        && let Some(title) = PRODUCT_TITLE
            .captures(&doc.content)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim())
    {
        let name = EXPANSION_SUFFIX.replace(title, "").trim().to_string();
        if name.chars().count() > 3 && !name.to_lowercase().contains("product page") {
            let category = if MONSTER_CONTEXT.is_match(&doc.content) {
                EntityCategory::Monster
            } else {
                EntityCategory::Concept
            };
            let description = overview(&doc.content).unwrap_or(&doc.content);
            found.push(candidate(doc, name, category, description));
        }
    }
    found
}

fn overview(content: &str) -> Option<&str> {
    let start = content.find("## Overview")?;
    let rest = &content[start + "## Overview".len()..];
    let end = rest.find("\n##").unwrap_or(rest.len());
    Some(rest[..end].trim())
}

#[derive(Debug, Deserialize)]
struct Classified {
    name: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    brief: String,
}

fn classifier_prompt(doc: &SourceDoc) -> String {
    let excerpt: String = doc.content.chars().take(CLASSIFY_CHARS).collect();
    format!(
        "Analyze this source file from the game's published material and extract every named \
         entity.\n\nSOURCE FILE: {title} ({kind})\n---\n{excerpt}\n---\n\n\
         Extract entities (monster, character, faction, location, concept, item, event) that are \
         explicitly named and described, unique to the setting, and not generic game terms.\n\n\
         Return only a JSON array:\n\
         [{{\"name\": \"Entity Name\", \"type\": \"monster|character|faction|location|concept|item|event\", \
         \"brief\": \"1-2 sentence description from the source\"}}]",
        title = doc.title,
        kind = doc.kind,
    )
}

/// Ask the classifier about one source.
pub fn classify(
    client: &dyn GenerationClient,
    doc: &SourceDoc,
    ai: &AiConfig,
    budget: &RunBudget,
) -> Result<Vec<Candidate>, ExternalError> {
    let reply = client.complete(&CompletionRequest::new(classifier_prompt(doc), ai), budget)?;
    let classified: Vec<Classified> = parse_array(&reply)?;
    Ok(classified
        .into_iter()
        .filter(|c| !c.name.trim().is_empty())
        .map(|c| {
            let name = c.name.trim().to_string();
            let category = c
                .kind
                .parse()
                .unwrap_or_else(|_| guess_category(None, &name, &c.brief));
            candidate(doc, name, category, &c.brief)
        })
        .collect())
}

/// Sources for this invocation: ones no queued entity cites yet come first,
/// each group in library order.
fn pick_sources<'a>(library: &'a SourceLibrary, queue: &DiscoveryQueue, max: usize) -> Vec<&'a SourceDoc> {
    let cited: HashSet<String> = queue.list().into_iter().flat_map(|e| e.sources).collect();
    let (fresh, seen): (Vec<&SourceDoc>, Vec<&SourceDoc>) =
        library.docs().iter().partition(|d| !cited.contains(&d.path));
    fresh.into_iter().chain(seen).take(max).collect()
}

/// Scan up to `max_sources` sources and queue what they name.
///
/// `published` holds normalized names of existing entries. Candidates found
/// before an interruption are still queued.
#[instrument(skip_all, fields(max_sources = settings.max_sources, classifier = client.is_some()))]
pub fn discover(
    library: &SourceLibrary,
    client: Option<&dyn GenerationClient>,
    queue: &DiscoveryQueue,
    published: &HashSet<String>,
    settings: &DiscoverySettings,
    budget: &RunBudget,
    now: DateTime<Utc>,
) -> Result<DiscoveryReport, AgentError> {
    let mut report = DiscoveryReport::default();
    let mut candidates = Vec::new();
    let classifier = client.filter(|_| settings.use_classifier);

    for (n, doc) in pick_sources(library, queue, settings.max_sources)
        .into_iter()
        .enumerate()
    {
        if let Err(err) = budget.check() {
            debug!(%err, "discovery interrupted");
            report.interrupted = true;
            break;
        }
        let found = match classifier {
            Some(client) => {
                if n > 0
                    && let Err(err) = budget.sleep(settings.api_delay)
                {
                    debug!(%err, "discovery interrupted");
                    report.interrupted = true;
                    break;
                }
                match classify(client, doc, &settings.ai, budget) {
                    Ok(found) => found,
                    Err(err) if err.is_interrupt() => {
                        report.interrupted = true;
                        break;
                    }
                    Err(err) => {
                        warn!(source = %doc.path, error = %err, "classifier failed, using heuristic");
                        report.classifier_failures += 1;
                        heuristic_candidates(doc)
                    }
                }
            }
            None => heuristic_candidates(doc),
        };
        debug!(source = %doc.path, found = found.len(), "source scanned");
        report.sources_scanned += 1;
        candidates.extend(found);
    }

    report.candidates = candidates.len();
    report.added = queue.add(candidates, published, now)?;
    info!(
        sources = report.sources_scanned,
        candidates = report.candidates,
        added = report.added.added.len(),
        classifier_failures = report.classifier_failures,
        interrupted = report.interrupted,
        "discovery finished"
    );
    Ok(report)
}
