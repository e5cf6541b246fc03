//! Quality audit of published entries.
//!
//! [`scan_entry`] is a pure function of the file path, its content, the link
//! index and the scan date; scanning the same tree twice on the same date
//! yields identical reports.

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use chrono::NaiveDate;
use pulldown_cmark::{Event, HeadingLevel, Parser, Tag, TagEnd};
use regex::Regex;
use serde::Serialize;
use tracing::info;

use crate::config::ReviewConfig;
use crate::lore::frontmatter::{self, DetailLevel, Frontmatter, FrontmatterError};
use crate::lore::{LinkIndex, LoreSnapshot, citation_markers, entry_title, is_citation_marker};
use crate::lore::{category_dir, links};
use crate::model::{ConfidenceLevel, EntityCategory, Issue, IssueKind, Severity};

const REQUIRED_FIELDS: [&str; 3] = ["title", "category", "confidence"];

static FACTUAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(arrives? at|appears? in|according to|lantern year \d+|was once|is an?|are known|first appeared?)\b",
    )
    .expect("valid regex")
});

static CITATION_DEF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:[-*][ \t]+)?\[([^\]\n]+)\]").expect("valid regex")
});

/// Scanner verdict for one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannedEntry {
    pub file_path: String,
    pub entry_name: String,
    pub category: Option<EntityCategory>,
    pub issues: Vec<Issue>,
    pub score: u8,
    pub priority: u32,
    pub detail_level: DetailLevel,
    pub citation_count: usize,
    pub last_updated: Option<NaiveDate>,
}

impl ScannedEntry {
    #[must_use]
    pub fn has_issue(&self, kind: IssueKind) -> bool {
        self.issues.iter().any(|i| i.kind == kind)
    }

    #[must_use]
    pub fn count_severity(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }
}

/// Whole-tree scan result, worst entries first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub scanned_on: NaiveDate,
    pub entries: Vec<ScannedEntry>,
    pub total_issues: usize,
    pub issues_by_type: BTreeMap<IssueKind, usize>,
    pub average_score: u8,
}

impl ScanReport {
    /// Entries that belong in the review queue.
    pub fn needing_review(&self, threshold: u8) -> impl Iterator<Item = &ScannedEntry> {
        self.entries
            .iter()
            .filter(move |e| !e.issues.is_empty() && e.score < threshold)
    }

    #[must_use]
    pub fn count_issue(&self, kind: IssueKind) -> usize {
        self.issues_by_type.get(&kind).copied().unwrap_or(0)
    }
}

/// Score from issue penalties: 100 minus the sum, floored at 0.
#[must_use]
pub fn quality_score(issues: &[Issue]) -> u8 {
    let penalty: u32 = issues.iter().map(|i| i.severity.penalty()).sum();
    u8::try_from(100_u32.saturating_sub(penalty)).unwrap_or(0)
}

/// Review ordering weight; larger is more urgent.
#[must_use]
pub fn review_priority(score: u8, issues: &[Issue]) -> u32 {
    let high = u32::try_from(issues.iter().filter(|i| i.severity == Severity::High).count())
        .unwrap_or(u32::MAX);
    let mut priority = (100 - u32::from(score.min(100))).saturating_add(high.saturating_mul(20));
    if issues.iter().any(|i| i.kind == IssueKind::MissingCitations) {
        priority += 15;
    }
    if issues.iter().any(|i| i.kind == IssueKind::MissingFrontmatter) {
        priority += 10;
    }
    priority
}

struct Heading {
    level: HeadingLevel,
    text: String,
}

fn headings(body: &str) -> Vec<Heading> {
    let mut out = Vec::new();
    let mut current: Option<Heading> = None;
    for event in Parser::new(body) {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                current = Some(Heading {
                    level,
                    text: String::new(),
                });
            }
            Event::Text(text) | Event::Code(text) => {
                if let Some(h) = current.as_mut() {
                    h.text.push_str(&text);
                }
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some(h) = current.take() {
                    out.push(h);
                }
            }
            _ => {}
        }
    }
    out
}

fn frontmatter_issues(content: &str, issues: &mut Vec<Issue>) -> Option<Frontmatter> {
    let fm = match Frontmatter::parse(content) {
        Ok(fm) => fm,
        Err(FrontmatterError::Missing) => {
            issues.push(Issue::new(IssueKind::MissingFrontmatter, "no frontmatter block"));
            return None;
        }
        Err(FrontmatterError::Malformed(reason)) => {
            issues.push(Issue::new(IssueKind::MalformedFrontmatter, reason));
            return None;
        }
    };

    for field in REQUIRED_FIELDS {
        if !fm.has(field) {
            issues.push(Issue::new(IssueKind::MissingField, format!("missing {field}")));
        }
    }
    if let Some(raw) = fm.get_str("category").filter(|_| fm.category().is_none()) {
        issues.push(Issue::new(IssueKind::MissingField, format!("invalid category: {raw}")));
    }
    if let Some(raw) = fm.get_str("confidence").filter(|_| fm.confidence().is_none()) {
        issues.push(Issue::new(IssueKind::MissingField, format!("invalid confidence: {raw}")));
    }
    for key in frontmatter::quoted_array_keys(content) {
        issues.push(Issue::new(IssueKind::QuotedArray, key));
    }
    Some(fm)
}

/// Audit one entry. `path` is relative to the lore root.
#[must_use]
pub fn scan_entry(
    path: &str,
    content: &str,
    index: &LinkIndex,
    as_of: NaiveDate,
    config: &ReviewConfig,
) -> ScannedEntry {
    let mut issues = Vec::new();
    let fm = frontmatter_issues(content, &mut issues);
    let body = frontmatter::body(content);

    let markers: HashSet<String> = citation_markers(body).into_iter().collect();
    let citation_count = markers.len();
    if citation_count == 0 && FACTUAL.is_match(body) {
        issues.push(Issue::new(
            IssueKind::MissingCitations,
            "factual claims without citations",
        ));
    }

    let mut defined = HashSet::new();
    for caps in CITATION_DEF.captures_iter(body) {
        let Some(inner) = caps.get(1).map(|m| m.as_str()) else {
            continue;
        };
        if is_citation_marker(inner) && !defined.insert(inner.to_string()) {
            issues.push(Issue::new(IssueKind::DuplicateCitation, format!("[{inner}]")));
        }
    }

    for link in links::find_broken_links(content, path, index) {
        issues.push(Issue::new(
            IssueKind::BrokenLink,
            format!("{}: {}", link.kind, link.original),
        ));
    }

    let last_updated = fm.as_ref().and_then(Frontmatter::last_updated);
    if let Some(fm) = &fm {
        match fm.last_updated() {
            Some(date) if (as_of - date).num_days() > config.stale_days => {
                issues.push(Issue::new(
                    IssueKind::StaleContent,
                    format!("last updated {date}"),
                ));
            }
            Some(_) => {}
            None => issues.push(Issue::new(IssueKind::StaleContent, "no lastUpdated date")),
        }

        match fm.confidence() {
            Some(ConfidenceLevel::Confirmed) if citation_count < 2 => {
                issues.push(Issue::new(
                    IssueKind::ConfidenceMismatch,
                    format!("confirmed with {citation_count} citations"),
                ));
            }
            Some(ConfidenceLevel::Likely) if citation_count == 0 => {
                issues.push(Issue::new(
                    IssueKind::ConfidenceMismatch,
                    "likely with no citations",
                ));
            }
            _ => {}
        }
    }

    let body_chars = body.trim().chars().count();
    if body_chars < config.thin_content_chars {
        issues.push(Issue::new(
            IssueKind::ThinContent,
            format!("{body_chars} characters"),
        ));
    }

    let heads = headings(body);
    if !heads
        .iter()
        .any(|h| h.level == HeadingLevel::H2 && h.text.trim().eq_ignore_ascii_case("overview"))
    {
        issues.push(Issue::new(IssueKind::MissingOverview, "no ## Overview section"));
    }
    if !heads.iter().any(|h| h.level == HeadingLevel::H1) {
        issues.push(Issue::new(IssueKind::MissingTitle, "no # title heading"));
    }

    let mut seen = HashSet::new();
    issues.retain(|i| seen.insert((i.kind, i.detail.clone())));
    issues.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.kind.cmp(&b.kind))
            .then_with(|| a.detail.cmp(&b.detail))
    });

    let score = quality_score(&issues);
    let category = fm
        .as_ref()
        .and_then(Frontmatter::category)
        .or_else(|| category_dir(path).and_then(EntityCategory::from_dir_name));

    ScannedEntry {
        file_path: path.to_string(),
        entry_name: entry_title(path, content),
        category,
        priority: review_priority(score, &issues),
        score,
        detail_level: frontmatter::assess_detail_level(content, citation_count),
        citation_count,
        last_updated,
        issues,
    }
}

/// Audit every entry in the snapshot.
#[must_use]
pub fn scan_all(snapshot: &LoreSnapshot, as_of: NaiveDate, config: &ReviewConfig) -> ScanReport {
    let index = snapshot.link_index();
    let mut entries: Vec<ScannedEntry> = snapshot
        .iter()
        .map(|(path, content)| scan_entry(path, content, &index, as_of, config))
        .collect();
    entries.sort_by(|a, b| {
        a.score
            .cmp(&b.score)
            .then_with(|| b.priority.cmp(&a.priority))
            .then_with(|| a.file_path.cmp(&b.file_path))
    });

    let mut issues_by_type = BTreeMap::new();
    for issue in entries.iter().flat_map(|e| &e.issues) {
        *issues_by_type.entry(issue.kind).or_insert(0) += 1;
    }
    let total_issues = issues_by_type.values().sum();
    let average_score = if entries.is_empty() {
        100
    } else {
        let sum: usize = entries.iter().map(|e| usize::from(e.score)).sum();
        u8::try_from(sum / entries.len()).unwrap_or(100)
    };

    info!(
        entries = entries.len(),
        total_issues,
        average_score,
        "lore scan complete"
    );

    ScanReport {
        scanned_on: as_of,
        entries,
        total_issues,
        issues_by_type,
        average_score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 10).unwrap()
    }

    fn config() -> ReviewConfig {
        ReviewConfig {
            thin_content_chars: 40,
            ..ReviewConfig::default()
        }
    }

    const CLEAN: &str = "---\ntitle: Gorm\ncategory: monster\nconfidence: confirmed\nlastUpdated: 2024-05-01\n---\n# Gorm\n\n## Overview\n\nGorm is a monster from the Gorm expansion [400-404] and hunts near [Silver City](../locations/silver-city.md) [405-409].\n\n## Sources\n\n[400-404]: Gorm Expansion\n[405-409]: Core Rulebook\n";

    fn index() -> LinkIndex {
        LinkIndex::build([
            ("locations/silver-city.md", "# Silver City\n"),
            ("monsters/gorm.md", CLEAN),
        ])
    }

    fn scan(path: &str, content: &str) -> ScannedEntry {
        scan_entry(path, content, &index(), as_of(), &config())
    }

    fn kinds(entry: &ScannedEntry) -> Vec<IssueKind> {
        entry.issues.iter().map(|i| i.kind).collect()
    }

    #[test]
    fn clean_entry_scores_100() {
        let entry = scan("monsters/gorm.md", CLEAN);
        assert!(entry.issues.is_empty(), "{:?}", entry.issues);
        assert_eq!(entry.score, 100);
        assert_eq!(entry.citation_count, 2);
        assert_eq!(entry.category, Some(EntityCategory::Monster));
        assert_eq!(entry.entry_name, "Gorm");
    }

    #[test]
    fn missing_frontmatter_is_high() {
        let entry = scan(
            "monsters/gorm.md",
            "# Gorm\n\n## Overview\n\nA quiet beast of the plains with many teeth.\n",
        );
        assert_eq!(kinds(&entry), vec![IssueKind::MissingFrontmatter]);
        assert_eq!(entry.score, 80);
        assert_eq!(entry.priority, 20 + 20 + 10);
        assert_eq!(entry.category, Some(EntityCategory::Monster));
    }

    #[test]
    fn frontmatter_field_rules() {
        let content = "---\ntitle: Gorm\ncategory: lizard\ntags: \"[a, b]\"\nlastUpdated: 2024-05-01\n---\n# Gorm\n\n## Overview\n\nA quiet beast of the plains with many teeth.\n";
        let entry = scan("monsters/gorm.md", content);
        let details: Vec<&str> = entry.issues.iter().map(|i| i.detail.as_str()).collect();
        assert!(details.contains(&"missing confidence"));
        assert!(details.contains(&"invalid category: lizard"));
        assert!(entry.has_issue(IssueKind::QuotedArray));
    }

    #[test]
    fn broken_links_each_reported() {
        let content = CLEAN.replace(
            "[Silver City](../locations/silver-city.md)",
            "[[Silver City]] and [[Ashen Wastes]]",
        );
        let entry = scan("monsters/gorm.md", &content);
        let broken: Vec<&Issue> = entry
            .issues
            .iter()
            .filter(|i| i.kind == IssueKind::BrokenLink)
            .collect();
        assert_eq!(broken.len(), 2);
        assert_eq!(broken[0].detail, "wiki_style: [[Ashen Wastes]]");
        assert_eq!(entry.score, 60);
    }

    #[test]
    fn stale_thin_and_confidence_rules() {
        let content = "---\ntitle: Gorm\ncategory: monster\nconfidence: confirmed\nlastUpdated: 2023-01-01\n---\n# Gorm\n\n## Overview\n\nShort [400-404].\n";
        let entry = scan("monsters/gorm.md", content);
        assert!(entry.has_issue(IssueKind::StaleContent));
        assert!(entry.has_issue(IssueKind::ThinContent));
        assert!(entry.has_issue(IssueKind::ConfidenceMismatch));
        assert_eq!(entry.score, 100 - 5 - 10 - 10);
    }

    #[test]
    fn factual_claims_need_citations() {
        let content = "---\ntitle: Gorm\ncategory: monster\nconfidence: speculative\nlastUpdated: 2024-05-01\n---\n# Gorm\n\n## Overview\n\nGorm is a monster that first appeared in the expansion.\n";
        let entry = scan("monsters/gorm.md", content);
        assert_eq!(kinds(&entry), vec![IssueKind::MissingCitations]);
        assert_eq!(entry.priority, 20 + 20 + 15);
    }

    #[test]
    fn duplicate_citation_definitions() {
        let content = format!("{CLEAN}[400-404]: Gorm Expansion again\n");
        let entry = scan("monsters/gorm.md", &content);
        assert_eq!(kinds(&entry), vec![IssueKind::DuplicateCitation]);
        assert_eq!(entry.issues[0].detail, "[400-404]");
    }

    #[test]
    fn missing_headings() {
        let content = CLEAN.replace("# Gorm\n\n## Overview\n", "Intro\n\n## Lore\n");
        let entry = scan("monsters/gorm.md", &content);
        assert!(entry.has_issue(IssueKind::MissingOverview));
        assert!(entry.has_issue(IssueKind::MissingTitle));
    }

    #[test]
    fn score_floors_at_zero() {
        let issues: Vec<Issue> = (0..8)
            .map(|n| Issue::new(IssueKind::BrokenLink, n.to_string()))
            .collect();
        assert_eq!(quality_score(&issues), 0);
    }

    #[test]
    fn scan_all_orders_worst_first_and_counts() {
        let snapshot = LoreSnapshot::from_docs([
            ("monsters/gorm.md", CLEAN.to_string()),
            ("locations/silver-city.md", "# Silver City\n".to_string()),
        ]);
        let report = scan_all(&snapshot, as_of(), &config());
        assert_eq!(report.entries[0].file_path, "locations/silver-city.md");
        assert_eq!(report.count_issue(IssueKind::MissingFrontmatter), 1);
        assert_eq!(report.needing_review(80).count(), 1);
        assert_eq!(report.total_issues, report.entries[0].issues.len());
    }

    #[test]
    fn scanning_is_idempotent() {
        let snapshot = LoreSnapshot::from_docs([
            ("monsters/gorm.md", CLEAN.replace("](../", "](./")),
            ("locations/silver-city.md", "# Silver City\n[[Gorm]]".to_string()),
        ]);
        let a = scan_all(&snapshot, as_of(), &config());
        let b = scan_all(&snapshot, as_of(), &config());
        assert_eq!(a, b);
    }
}
