//! Raw source material.
//!
//! Sources are scraped text files under `<sources>/<kind>/`, one directory per
//! [`SourceKind`]. They are read once per run into a [`SourceLibrary`] and
//! ranked per entity by how much they say about it. Image files found on the
//! same walk are kept for [`crate::images`] matching; text under image
//! folders is caption material, not a source.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};
use walkdir::WalkDir;

use lorekeep_core::citations::CitationRequest;
use lorekeep_core::model::{ConfidenceLevel, SourceKind};

use crate::images::{self, ImageFile, MatchedImage};

/// Sections shorter than this are not worth writing from.
pub const MIN_SECTION_CHARS: usize = 50;
/// Lines kept after a matching header.
const SECTION_LINES: usize = 30;
/// Paragraphs kept when no header matches.
const SECTION_PARAGRAPHS: usize = 3;

const IMAGE_DIRS: &[&str] = &["images", "img", "screenshots"];

static H1: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#[ \t]+(.+?)[ \t]*$").expect("valid regex"));

static HEADER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^#{2,3}\s+").expect("valid regex"));

/// One source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDoc {
    /// Relative to the sources root, `/`-separated.
    pub path: String,
    pub kind: SourceKind,
    pub title: String,
    pub content: String,
}

impl SourceDoc {
    #[must_use]
    pub fn new(path: impl Into<String>, kind: SourceKind, content: impl Into<String>) -> Self {
        let path = path.into();
        let content = content.into();
        let title = H1
            .captures(&content)
            .and_then(|c| c.get(1))
            .map_or_else(|| title_from_path(&path), |m| m.as_str().to_string());
        Self {
            path,
            kind,
            title,
            content,
        }
    }

    /// Citation request for this document on `topic`.
    #[must_use]
    pub fn citation_request(&self, topic: &str) -> CitationRequest {
        CitationRequest {
            source: self.title.clone(),
            source_kind: self.kind,
            path: self.path.clone(),
            topic: topic.to_string(),
        }
    }
}

fn title_from_path(path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
    stem.replace(['-', '_'], " ")
}

/// What one source says about one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Excerpt<'a> {
    pub doc: &'a SourceDoc,
    pub section: String,
    pub mentions: usize,
    pub header_match: bool,
    pub score: u32,
}

/// Every readable source, ordered by kind priority then path.
#[derive(Debug, Clone, Default)]
pub struct SourceLibrary {
    docs: Vec<SourceDoc>,
    images: Vec<ImageFile>,
    priority: Vec<SourceKind>,
}

impl SourceLibrary {
    /// Read `.txt` and `.md` files from `root/<kind>/` for each kind in
    /// `priority`, and note every image file. Missing kind directories are
    /// skipped; unreadable files are logged and skipped.
    #[must_use]
    pub fn load(root: &Path, priority: &[SourceKind]) -> Self {
        let mut docs = Vec::new();
        let mut found_images = Vec::new();
        for kind in priority {
            let dir = root.join(kind.as_str());
            if !dir.is_dir() {
                debug!(dir = %dir.display(), "source directory missing");
                continue;
            }
            let walker = WalkDir::new(&dir)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));
            for entry in walker {
                let entry = match entry {
                    Ok(e) => e,
                    Err(err) => {
                        warn!(%err, "skipping unreadable source path");
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(rel) = entry.path().strip_prefix(root) else {
                    continue;
                };
                let parts: Vec<String> = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                let rel = parts.join("/");
                let name = entry.file_name().to_string_lossy();
                if images::is_image(&name) {
                    found_images.push(ImageFile::load(rel, *kind, entry.path()));
                    continue;
                }
                let in_image_dir = parts[..parts.len().saturating_sub(1)]
                    .iter()
                    .any(|p| IMAGE_DIRS.contains(&p.to_ascii_lowercase().as_str()));
                if in_image_dir || !(name.ends_with(".txt") || name.ends_with(".md")) {
                    continue;
                }
                match fs::read_to_string(entry.path()) {
                    Ok(content) => docs.push(SourceDoc::new(rel, *kind, content)),
                    Err(err) => warn!(path = %rel, %err, "skipping unreadable source"),
                }
            }
        }
        debug!(
            count = docs.len(),
            images = found_images.len(),
            root = %root.display(),
            "sources loaded"
        );
        Self::from_docs(docs, priority).with_images(found_images)
    }

    /// Build from documents already in memory.
    #[must_use]
    pub fn from_docs(mut docs: Vec<SourceDoc>, priority: &[SourceKind]) -> Self {
        let rank = |kind: SourceKind| priority.iter().position(|k| *k == kind).unwrap_or(priority.len());
        docs.sort_by(|a, b| rank(a.kind).cmp(&rank(b.kind)).then_with(|| a.path.cmp(&b.path)));
        Self {
            docs,
            images: Vec::new(),
            priority: priority.to_vec(),
        }
    }

    #[must_use]
    pub fn with_images(mut self, mut found: Vec<ImageFile>) -> Self {
        found.sort_by(|a, b| a.path.cmp(&b.path));
        self.images = found;
        self
    }

    #[must_use]
    pub fn docs(&self) -> &[SourceDoc] {
        &self.docs
    }

    #[must_use]
    pub fn images(&self) -> &[ImageFile] {
        &self.images
    }

    /// Images whose file name or caption names the entity, best first.
    #[must_use]
    pub fn images_for(&self, name: &str, limit: usize) -> Vec<MatchedImage> {
        images::match_images(&self.images, name, limit)
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&SourceDoc> {
        self.docs.iter().find(|d| d.path == path)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Weight of a kind: the first configured kind weighs the most.
    fn kind_weight(&self, kind: SourceKind) -> u32 {
        let len = self.priority.len();
        let pos = self.priority.iter().position(|k| *k == kind).unwrap_or(len);
        u32::try_from(len - pos).unwrap_or(0)
    }

    /// Sources saying something usable about `name`, best first.
    ///
    /// Ranked by mention count, a header naming the entity, and source-kind
    /// weight. Sections shorter than [`MIN_SECTION_CHARS`] are dropped.
    #[must_use]
    pub fn relevant(&self, name: &str, limit: usize) -> Vec<Excerpt<'_>> {
        let terms = search_terms(name);
        let Some(primary) = terms.first() else {
            return Vec::new();
        };
        let mut found: Vec<Excerpt<'_>> = self
            .docs
            .iter()
            .filter_map(|doc| {
                let lower = doc.content.to_lowercase();
                let mentions: usize = terms.iter().map(|t| lower.matches(t.as_str()).count()).sum();
                if mentions == 0 {
                    return None;
                }
                let (section, header_match) = relevant_section(&doc.content, primary);
                if section.chars().count() < MIN_SECTION_CHARS {
                    return None;
                }
                let capped = u32::try_from(mentions.min(10)).unwrap_or(10);
                let score =
                    capped * 2 + if header_match { 10 } else { 0 } + self.kind_weight(doc.kind) * 3;
                Some(Excerpt {
                    doc,
                    section,
                    mentions,
                    header_match,
                    score,
                })
            })
            .collect();
        found.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.doc.path.cmp(&b.doc.path)));
        found.truncate(limit);
        found
    }
}

/// Lowercased spellings of a name as sources write it.
fn search_terms(name: &str) -> Vec<String> {
    let lower = name.trim().to_lowercase();
    if lower.is_empty() {
        return Vec::new();
    }
    let words: Vec<&str> = lower.split_whitespace().collect();
    let mut terms = vec![words.join(" ")];
    if words.len() > 1 {
        terms.push(words.join("-"));
        terms.push(words.concat());
    }
    terms
}

/// The part of `content` about `needle` (lowercase). A `##`/`###` header
/// naming it wins and keeps the lines up to the next `##`; otherwise the
/// first paragraphs mentioning it.
fn relevant_section(content: &str, needle: &str) -> (String, bool) {
    let lines: Vec<&str> = content.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        if HEADER.is_match(line) && line.to_lowercase().contains(needle) {
            let mut section = vec![*line];
            for next in &lines[i + 1..] {
                if next.starts_with("##") || section.len() > SECTION_LINES {
                    break;
                }
                section.push(next);
            }
            return (section.join("\n").trim().to_string(), true);
        }
    }

    let paragraphs: Vec<&str> = content
        .split("\n\n")
        .map(str::trim)
        .filter(|p| p.len() > MIN_SECTION_CHARS && p.to_lowercase().contains(needle))
        .take(SECTION_PARAGRAPHS)
        .collect();
    (paragraphs.join("\n\n"), false)
}

/// Confidence a draft may claim: that of its weakest contributing source.
/// No sources means speculative.
#[must_use]
pub fn weakest_confidence(excerpts: &[Excerpt<'_>]) -> ConfidenceLevel {
    excerpts
        .iter()
        .map(|e| e.doc.kind.confidence())
        .min()
        .unwrap_or(ConfidenceLevel::Speculative)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRIORITY: &[SourceKind] = &[
        SourceKind::Shop,
        SourceKind::Rulebook,
        SourceKind::Newsletter,
        SourceKind::Community,
    ];

    fn library() -> SourceLibrary {
        SourceLibrary::from_docs(
            vec![
                SourceDoc::new(
                    "community/forum.txt",
                    SourceKind::Community,
                    "Players keep asking about the Silver City. Some think the Silver City \
                     was built by the first survivors and abandoned long ago.",
                ),
                SourceDoc::new(
                    "shop/silver-city.txt",
                    SourceKind::Shop,
                    "# Silver City Expansion\n\n## LOCATIONS\n\n### Silver City\nA gleaming \
                     ruin where lanterns never go out. Its streets are lined with statues.\n\n\
                     ## COMPONENTS\nCards.",
                ),
                SourceDoc::new(
                    "newsletter/kdu-12.md",
                    SourceKind::Newsletter,
                    "Short mention of silver city.",
                ),
            ],
            PRIORITY,
        )
    }

    #[test]
    fn library_orders_by_kind_priority() {
        let lib = library();
        let paths: Vec<&str> = lib.docs().iter().map(|d| d.path.as_str()).collect();
        assert_eq!(
            paths,
            ["shop/silver-city.txt", "newsletter/kdu-12.md", "community/forum.txt"]
        );
        assert_eq!(lib.docs()[0].title, "Silver City Expansion");
        assert_eq!(lib.docs()[2].title, "forum");
    }

    #[test]
    fn header_match_outranks_mentions() {
        let lib = library();
        let found = lib.relevant("Silver City", 5);
        let paths: Vec<&str> = found.iter().map(|e| e.doc.path.as_str()).collect();
        // the newsletter section is too short to use
        assert_eq!(paths, ["shop/silver-city.txt", "community/forum.txt"]);
        assert!(found[0].header_match);
        assert!(found[0].section.starts_with("### Silver City"));
        assert!(!found[0].section.contains("COMPONENTS"));
        assert_eq!(found[1].mentions, 2);
    }

    #[test]
    fn weakest_source_caps_confidence() {
        let lib = library();
        let found = lib.relevant("Silver City", 5);
        assert_eq!(weakest_confidence(&found), ConfidenceLevel::Speculative);
        assert_eq!(weakest_confidence(&found[..1]), ConfidenceLevel::Confirmed);
        assert_eq!(weakest_confidence(&[]), ConfidenceLevel::Speculative);
    }

    #[test]
    fn dashed_spellings_count() {
        assert_eq!(
            search_terms("  White  Lion "),
            vec!["white lion", "white-lion", "whitelion"]
        );
        assert_eq!(search_terms("Gorm"), vec!["gorm"]);
        assert!(search_terms(" ").is_empty());
    }

    #[test]
    fn load_walks_kind_dirs_and_collects_images() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("shop/images")).unwrap();
        fs::create_dir_all(root.join("rulebook")).unwrap();
        fs::write(root.join("shop/gorm.txt"), "# Gorm\nA swamp beast.").unwrap();
        fs::write(root.join("shop/images/gorm-mini.png"), "").unwrap();
        fs::write(root.join("shop/images/gorm-mini.txt"), "Gorm miniature, painted").unwrap();
        fs::write(root.join("shop/.draft.txt"), "ignored").unwrap();
        fs::write(root.join("shop/cover.png"), "").unwrap();
        fs::write(root.join("rulebook/core.md"), "Rules").unwrap();

        let lib = SourceLibrary::load(root, PRIORITY);
        let paths: Vec<&str> = lib.docs().iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, ["shop/gorm.txt", "rulebook/core.md"]);
        assert_eq!(lib.get("shop/gorm.txt").map(|d| d.kind), Some(SourceKind::Shop));

        let images: Vec<&str> = lib.images().iter().map(|i| i.path.as_str()).collect();
        assert_eq!(images, ["shop/cover.png", "shop/images/gorm-mini.png"]);
        let matched = lib.images_for("Gorm", 3);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].caption, "Gorm miniature, painted");
    }

    #[test]
    fn citation_request_uses_title_and_path() {
        let lib = library();
        let req = lib.docs()[0].citation_request("Silver City");
        assert_eq!(req.source, "Silver City Expansion");
        assert_eq!(req.path, "shop/silver-city.txt");
        assert_eq!(req.source_kind, SourceKind::Shop);
    }
}
