//! Revision of published entries.
//!
//! A revision reads the published file, asks the service for a rewritten
//! version in one of three modes, and files the result as a pending draft.
//! The published file is never touched here. A rewrite that loses any
//! citation marker the original carried is refused.

use std::collections::HashSet;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use lorekeep_core::changelog::NewChange;
use lorekeep_core::ids::new_id;
use lorekeep_core::lore::links::{LinkIndex, fix_links};
use lorekeep_core::lore::{Frontmatter, category_dir, citation_markers, entry_title, file_stem};
use lorekeep_core::model::{
    ChangeSource, ChangeType, ChangelogEntry, DiffSummary, EntityCategory, Issue, PendingEntry,
    PendingKind, PendingStatus, ReviewMode, ReviewQueueEntry, ReviewStatus,
};
use lorekeep_core::scanner::ScannedEntry;

use crate::client::{CompletionRequest, strip_fence};
use crate::context::Stage;
use crate::error::{AgentError, ExternalError};
use crate::sources::{Excerpt, weakest_confidence};

/// Sources handed to the service per revision.
pub const REVISION_SOURCES: usize = 3;
const EXCERPT_CHARS: usize = 1500;

/// A published entry to revise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionTarget {
    /// Relative to the lore root.
    pub path: String,
    pub name: String,
    pub category: Option<EntityCategory>,
    pub mode: ReviewMode,
    pub issues: Vec<Issue>,
    /// Review-queue record tracking this entry, if any.
    pub review_id: Option<String>,
}

impl RevisionTarget {
    /// Repair of a review-queue record.
    #[must_use]
    pub fn from_review(entry: &ReviewQueueEntry) -> Self {
        Self {
            path: entry.file_path.clone(),
            name: entry.entry_name.clone(),
            category: entry.category,
            mode: ReviewMode::Repair,
            issues: entry.issues.clone(),
            review_id: Some(entry.id.clone()),
        }
    }

    /// Revision of a scanned entry with no review record.
    #[must_use]
    pub fn from_scan(entry: &ScannedEntry, mode: ReviewMode) -> Self {
        Self {
            path: entry.file_path.clone(),
            name: entry.entry_name.clone(),
            category: entry.category,
            mode,
            issues: entry.issues.clone(),
            review_id: None,
        }
    }
}

/// A filed revision draft.
#[derive(Debug, Clone)]
pub struct Revised {
    pub draft: PendingEntry,
    pub changelog: ChangelogEntry,
    /// Broken links rewritten after the service replied.
    pub links_fixed: usize,
}

/// Revise one entry into a pending draft.
///
/// The review record, if any, moves to `reviewing` while the service is
/// called, then to `pending_approval` with the draft linked. On failure it
/// returns to `queued`, except a dropped-citation rewrite, which is
/// `skipped` with the reason noted.
#[instrument(skip_all, fields(path = %target.path, mode = %target.mode))]
pub fn revise(
    stage: Stage<'_>,
    target: &RevisionTarget,
    links: &LinkIndex,
    now: DateTime<Utc>,
) -> Result<Revised, AgentError> {
    let reviews = &stage.stores.reviews;
    if let Some(id) = &target.review_id {
        reviews.set_status(id, ReviewStatus::Reviewing, None, None, now)?;
    }

    match draft_revision(stage, target, links, now) {
        Ok(revised) => {
            if let Some(id) = &target.review_id {
                reviews.set_status(
                    id,
                    ReviewStatus::PendingApproval,
                    Some(&revised.draft.id),
                    None,
                    now,
                )?;
            }
            Ok(revised)
        }
        Err(err) => {
            if let Some(id) = &target.review_id {
                let status = match err {
                    AgentError::DroppedCitations { .. } => ReviewStatus::Skipped,
                    _ => ReviewStatus::Queued,
                };
                let note = err.to_string();
                if let Err(update) = reviews.set_status(id, status, None, Some(&note), now) {
                    warn!(review = %id, error = %update, "could not record revision failure");
                }
            }
            Err(err)
        }
    }
}

fn draft_revision(
    stage: Stage<'_>,
    target: &RevisionTarget,
    links: &LinkIndex,
    now: DateTime<Utc>,
) -> Result<Revised, AgentError> {
    let original = stage.stores.tree.read(&target.path)?;
    let excerpts = stage.library.relevant(&target.name, REVISION_SOURCES);
    if excerpts.is_empty() && target.mode != ReviewMode::Repair {
        return Err(AgentError::NoSources(target.name.clone()));
    }

    let prompt = revision_prompt(target, &original, &excerpts);
    let reply = stage
        .client
        .complete(&CompletionRequest::new(prompt, &stage.config.ai), stage.budget)?;
    let rewritten = strip_fence(&reply).trim();
    if rewritten.is_empty() {
        return Err(ExternalError::Malformed("revision is empty".into()).into());
    }

    let missing = dropped_markers(&original, rewritten);
    if !missing.is_empty() {
        return Err(AgentError::DroppedCitations {
            path: target.path.clone(),
            missing,
        });
    }

    let (fixed, links_fixed) = fix_links(rewritten, &target.path, links);
    let content = format!("{}\n", fixed.trim_end());

    let original_fm = Frontmatter::parse(&original).ok();
    let revised_fm = Frontmatter::parse(&content).ok();
    let confidence = original_fm
        .as_ref()
        .and_then(Frontmatter::confidence)
        .or_else(|| revised_fm.as_ref().and_then(Frontmatter::confidence))
        .unwrap_or_else(|| weakest_confidence(&excerpts));
    let category = target
        .category
        .or_else(|| revised_fm.as_ref().and_then(Frontmatter::category))
        .or_else(|| category_dir(&target.path).and_then(EntityCategory::from_dir_name))
        .unwrap_or(EntityCategory::Concept);
    let title = entry_title(&target.path, &content);

    let mut draft = stage.stores.pending.add(PendingEntry {
        id: new_id("pending", now),
        kind: PendingKind::Revision {
            original_path: target.path.clone(),
            mode: target.mode,
        },
        title: title.clone(),
        slug: file_stem(&target.path).to_string(),
        category,
        content: content.clone(),
        citations: citation_ids(&content),
        confidence,
        source_files: excerpts.iter().map(|e| e.doc.path.clone()).collect(),
        connections: Vec::new(),
        status: PendingStatus::Pending,
        version: 1,
        changelog_id: None,
        generated_at: now,
        reviewed_at: None,
        reviewed_by: None,
        review_notes: None,
    })?;

    let (change_type, source) = change_kind(target.mode);
    let mut change = NewChange::new(change_type, source, &title)
        .description(describe(target, excerpts.len(), links_fixed))
        .file(&target.path)
        .diff(DiffSummary::between(&original, &content))
        .confidence(confidence)
        .pending_entry(&draft.id);
    if let Some(run) = stage.run_id {
        change = change.run(run);
    }
    let changelog = stage.stores.changelog.record(change, now)?;
    stage.stores.pending.link_changelog(&draft.id, &changelog.id)?;
    draft.changelog_id = Some(changelog.id.clone());

    info!(
        draft = %draft.id,
        version = draft.version,
        links_fixed,
        added = changelog.diff.lines_added,
        removed = changelog.diff.lines_removed,
        "revision drafted"
    );
    Ok(Revised {
        draft,
        changelog,
        links_fixed,
    })
}

const fn change_kind(mode: ReviewMode) -> (ChangeType, ChangeSource) {
    match mode {
        ReviewMode::Repair => (ChangeType::Verify, ChangeSource::AgentVerification),
        ReviewMode::Expand => (ChangeType::Expand, ChangeSource::AgentExpansion),
        ReviewMode::Refresh => (ChangeType::Update, ChangeSource::AgentVerification),
    }
}

fn describe(target: &RevisionTarget, sources: usize, links_fixed: usize) -> String {
    let mut out = match target.mode {
        ReviewMode::Repair => {
            let kinds: Vec<String> = target.issues.iter().map(|i| i.kind.to_string()).collect();
            if kinds.is_empty() {
                "Repaired".to_string()
            } else {
                format!("Repaired: {}", kinds.join(", "))
            }
        }
        ReviewMode::Expand => format!("Expanded from {sources} source(s)"),
        ReviewMode::Refresh => format!("Refreshed against {sources} source(s)"),
    };
    if links_fixed > 0 {
        let _ = write!(out, "; {links_fixed} link(s) fixed");
    }
    out
}

/// Distinct citation ids in `content`, without brackets.
fn citation_ids(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    citation_markers(content)
        .into_iter()
        .map(|m| m.trim_matches(['[', ']']).to_string())
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

/// Markers in `original` that `revised` no longer contains, first
/// appearance order.
#[must_use]
pub fn dropped_markers(original: &str, revised: &str) -> Vec<String> {
    let kept: HashSet<String> = citation_markers(revised).into_iter().collect();
    let mut seen = HashSet::new();
    citation_markers(original)
        .into_iter()
        .filter(|m| !kept.contains(m) && seen.insert(m.clone()))
        .collect()
}

fn revision_prompt(target: &RevisionTarget, original: &str, excerpts: &[Excerpt<'_>]) -> String {
    let task = match target.mode {
        ReviewMode::Repair => "Fix the issues listed below. Change nothing else.",
        ReviewMode::Expand => {
            "Expand this entry with more detail from the sources below. \
             Keep every existing fact and section."
        }
        ReviewMode::Refresh => {
            "Bring this entry up to date with the sources below. \
             Correct anything the sources contradict."
        }
    };

    let mut out = format!("You maintain a lore compendium. {task}\n\n");
    if !target.issues.is_empty() {
        out.push_str("ISSUES:\n");
        for issue in &target.issues {
            let _ = writeln!(out, "- {} ({}): {}", issue.kind, issue.severity, issue.detail);
        }
        out.push('\n');
    }
    if !excerpts.is_empty() {
        out.push_str("SOURCES:\n\n");
        for excerpt in excerpts {
            let section: String = excerpt.section.chars().take(EXCERPT_CHARS).collect();
            let _ = write!(
                out,
                "### {} ({})\n{}\n\n",
                excerpt.doc.title, excerpt.doc.kind, section
            );
        }
    }
    let _ = write!(
        out,
        "Keep the frontmatter block. Keep every citation marker such as [400-404] \
         exactly as written. Link other entries with relative markdown links, never \
         [[wiki links]].\n\n\
         CURRENT ENTRY ({path}):\n\n{original}\n\n\
         Return only the complete revised markdown file.",
        path = target.path,
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ScriptedClient;
    use crate::fixtures::{Fixture, now};
    use lorekeep_core::lore::LoreSnapshot;
    use lorekeep_core::model::{ConfidenceLevel, IssueKind};

    const GORM: &str = "---\ntitle: Gorm\ncategory: monster\nconfidence: likely\n\
lastUpdated: '2024-01-02'\n---\n# Gorm\n\nGorm roams the plains near [[Silver City]] [400-404].\n\
It sleeps in winter [405-409].\n";

    const SILVER_CITY: &str = "---\ntitle: Silver City\ncategory: location\n---\n# Silver City\n";

    fn published(fx: &Fixture) -> LinkIndex {
        fx.publish("monsters/gorm.md", GORM);
        fx.publish("locations/silver-city.md", SILVER_CITY);
        LoreSnapshot::from_docs([
            ("monsters/gorm.md", GORM),
            ("locations/silver-city.md", SILVER_CITY),
        ])
        .link_index()
    }

    fn review_record(fx: &Fixture) -> ReviewQueueEntry {
        let entry = ReviewQueueEntry {
            id: "review-gorm".into(),
            file_path: "monsters/gorm.md".into(),
            entry_name: "Gorm".into(),
            category: Some(EntityCategory::Monster),
            issues: vec![Issue::new(IssueKind::BrokenLink, "[[Silver City]]")],
            score: 62,
            priority: 25,
            status: ReviewStatus::Queued,
            queued_at: now(),
            updated_at: None,
            pending_entry_id: None,
            note: None,
        };
        assert!(fx.stores.storage.set(
            lorekeep_core::storage::keys::REVIEW_QUEUE,
            &vec![entry.clone()],
        ));
        entry
    }

    #[test]
    fn repair_files_draft_and_fixes_links() {
        let fx = Fixture::silver_city();
        let links = published(&fx);
        let record = review_record(&fx);
        // the service leaves the wiki link in place
        let client = ScriptedClient::new()
            .reply(format!("```markdown\n{GORM}\n## Overview\n\nA beast.\n```"));

        let revised = revise(fx.stage(&client), &RevisionTarget::from_review(&record), &links, now())
            .unwrap();

        let draft = &revised.draft;
        assert_eq!(revised.links_fixed, 1);
        assert!(draft.content.contains("[Silver City](../locations/silver-city.md)"));
        assert!(!draft.content.contains("[["));
        assert_eq!(draft.target_path(), "monsters/gorm.md");
        assert_eq!(draft.confidence, ConfidenceLevel::Likely);
        assert_eq!(draft.citations, vec!["400-404", "405-409"]);
        assert!(matches!(
            draft.kind,
            PendingKind::Revision { mode: ReviewMode::Repair, .. }
        ));

        assert_eq!(revised.changelog.change_type, ChangeType::Verify);
        assert_eq!(revised.changelog.source, ChangeSource::AgentVerification);
        assert!(revised.changelog.diff.lines_added > 0);
        assert!(revised.changelog.description.contains("broken_link"));

        let record = fx.stores.reviews.get("review-gorm").unwrap();
        assert_eq!(record.status, ReviewStatus::PendingApproval);
        assert_eq!(record.pending_entry_id.as_deref(), Some(draft.id.as_str()));
        // published file untouched until approval
        assert_eq!(fx.stores.tree.read("monsters/gorm.md").unwrap(), GORM);

        let prompt = &client.prompts()[0];
        assert!(prompt.contains("- broken_link (high): [[Silver City]]"));
        assert!(prompt.contains("CURRENT ENTRY (monsters/gorm.md)"));
    }

    #[test]
    fn dropped_citation_skips_review() {
        let fx = Fixture::silver_city();
        let links = published(&fx);
        let record = review_record(&fx);
        let client = ScriptedClient::new().reply(GORM.replace(" [405-409]", ""));

        let err = revise(fx.stage(&client), &RevisionTarget::from_review(&record), &links, now())
            .unwrap_err();
        match &err {
            AgentError::DroppedCitations { path, missing } => {
                assert_eq!(path, "monsters/gorm.md");
                assert_eq!(missing, &vec!["[405-409]".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }

        let record = fx.stores.reviews.get("review-gorm").unwrap();
        assert_eq!(record.status, ReviewStatus::Skipped);
        assert!(record.note.unwrap().contains("[405-409]"));
        assert!(fx.stores.pending.entries().is_empty());
    }

    #[test]
    fn service_failure_requeues_review() {
        let fx = Fixture::silver_city();
        let links = published(&fx);
        let record = review_record(&fx);
        let client = ScriptedClient::new().fail(ExternalError::Status {
            status: 500,
            body: "overloaded".into(),
        });

        let err = revise(fx.stage(&client), &RevisionTarget::from_review(&record), &links, now())
            .unwrap_err();
        assert!(err.is_item_failure());
        assert_eq!(
            fx.stores.reviews.get("review-gorm").unwrap().status,
            ReviewStatus::Queued
        );
    }

    #[test]
    fn expand_without_review_record() {
        let fx = Fixture::silver_city();
        let links = published(&fx);
        fx.publish(
            "locations/silver-city.md",
            "---\ntitle: Silver City\ncategory: location\nconfidence: confirmed\n---\n# Silver City\n\nA ruin [400-404].\n",
        );
        let target = RevisionTarget {
            path: "locations/silver-city.md".into(),
            name: "Silver City".into(),
            category: Some(EntityCategory::Location),
            mode: ReviewMode::Expand,
            issues: Vec::new(),
            review_id: None,
        };
        let client = ScriptedClient::new().reply(
            "---\ntitle: Silver City\ncategory: location\nconfidence: confirmed\n---\n# Silver City\n\n\
## Overview\n\nA ruin where the lanterns never go out [400-404].\n",
        );

        let revised = revise(fx.stage(&client), &target, &links, now()).unwrap();
        assert_eq!(revised.changelog.change_type, ChangeType::Expand);
        assert_eq!(revised.changelog.source, ChangeSource::AgentExpansion);
        assert_eq!(revised.draft.confidence, ConfidenceLevel::Confirmed);
        assert!(fx.stores.reviews.entries().is_empty());
        assert!(client.prompts()[0].contains("SOURCES:"));
    }

    #[test]
    fn second_revision_gets_next_version() {
        let fx = Fixture::silver_city();
        let links = published(&fx);
        let target = RevisionTarget {
            path: "monsters/gorm.md".into(),
            name: "Gorm".into(),
            category: Some(EntityCategory::Monster),
            mode: ReviewMode::Repair,
            issues: Vec::new(),
            review_id: None,
        };
        let client = ScriptedClient::new().reply(GORM).reply(GORM);
        let first = revise(fx.stage(&client), &target, &links, now()).unwrap();
        let second = revise(fx.stage(&client), &target, &links, now()).unwrap();
        assert_eq!(first.draft.version, 1);
        assert_eq!(second.draft.version, 2);
    }

    #[test]
    fn markers_dropped_in_order() {
        let original = "a [400-404] b [405-409] c [400-404] d [410]";
        assert_eq!(dropped_markers(original, "a [405-409]"), vec!["[400-404]", "[410]"]);
        assert!(dropped_markers(original, original).is_empty());
    }
}
