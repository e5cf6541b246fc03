//! Append-only audit log of lore mutations.
//!
//! Entries are stored newest first. After creation only the review fields
//! change; entries leave the log only through retention pruning on save.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::ChangelogConfig;
use crate::error::LoreError;
use crate::ids::new_id;
use crate::model::{
    ChangeReviewStatus, ChangeSource, ChangeType, ChangelogEntry, ConfidenceLevel, DiffSummary,
};
use crate::storage::{Storage, keys};

/// Builder for a new [`ChangelogEntry`].
#[derive(Debug, Clone)]
pub struct NewChange {
    change_type: ChangeType,
    source: ChangeSource,
    title: String,
    description: String,
    files: Vec<String>,
    diff: DiffSummary,
    confidence: Option<ConfidenceLevel>,
    review_status: ChangeReviewStatus,
    reviewed_by: Option<String>,
    pending_entry_id: Option<String>,
    task_id: Option<String>,
    run_id: Option<String>,
}

impl NewChange {
    #[must_use]
    pub fn new(change_type: ChangeType, source: ChangeSource, title: impl Into<String>) -> Self {
        Self {
            change_type,
            source,
            title: title.into(),
            description: String::new(),
            files: Vec::new(),
            diff: DiffSummary::default(),
            confidence: None,
            review_status: ChangeReviewStatus::PendingReview,
            reviewed_by: None,
            pending_entry_id: None,
            task_id: None,
            run_id: None,
        }
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn file(mut self, path: impl Into<String>) -> Self {
        self.files.push(path.into());
        self
    }

    #[must_use]
    pub fn diff(mut self, diff: DiffSummary) -> Self {
        self.diff = diff;
        self
    }

    #[must_use]
    pub const fn confidence(mut self, confidence: ConfidenceLevel) -> Self {
        self.confidence = Some(confidence);
        self
    }

    #[must_use]
    pub const fn status(mut self, status: ChangeReviewStatus) -> Self {
        self.review_status = status;
        self
    }

    #[must_use]
    pub fn reviewed_by(mut self, reviewer: impl Into<String>) -> Self {
        self.reviewed_by = Some(reviewer.into());
        self
    }

    #[must_use]
    pub fn pending_entry(mut self, id: impl Into<String>) -> Self {
        self.pending_entry_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn task(mut self, id: impl Into<String>) -> Self {
        self.task_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn run(mut self, id: impl Into<String>) -> Self {
        self.run_id = Some(id.into());
        self
    }

    fn build(self, now: DateTime<Utc>) -> ChangelogEntry {
        let reviewed_at = self.reviewed_by.as_ref().map(|_| now);
        ChangelogEntry {
            id: new_id("change", now),
            timestamp: now,
            change_type: self.change_type,
            source: self.source,
            files: self.files,
            title: self.title,
            description: self.description,
            diff: self.diff,
            confidence: self.confidence,
            review_status: self.review_status,
            reviewed_by: self.reviewed_by,
            reviewed_at,
            review_note: None,
            pending_entry_id: self.pending_entry_id,
            task_id: self.task_id,
            run_id: self.run_id,
        }
    }
}

/// Query over the log. Empty lists match everything.
#[derive(Debug, Clone, Default)]
pub struct ChangelogFilter {
    pub types: Vec<ChangeType>,
    pub sources: Vec<ChangeSource>,
    pub statuses: Vec<ChangeReviewStatus>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Substring of any affected file path.
    pub file: Option<String>,
    /// Case-insensitive substring of title or description.
    pub search: Option<String>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl ChangelogFilter {
    fn matches(&self, entry: &ChangelogEntry) -> bool {
        let search = self.search.as_deref().map(str::to_lowercase);
        (self.types.is_empty() || self.types.contains(&entry.change_type))
            && (self.sources.is_empty() || self.sources.contains(&entry.source))
            && (self.statuses.is_empty() || self.statuses.contains(&entry.review_status))
            && self.since.is_none_or(|t| entry.timestamp >= t)
            && self.until.is_none_or(|t| entry.timestamp <= t)
            && self
                .file
                .as_deref()
                .is_none_or(|f| entry.files.iter().any(|p| p.contains(f)))
            && search.is_none_or(|s| {
                entry.title.to_lowercase().contains(&s)
                    || entry.description.to_lowercase().contains(&s)
            })
    }
}

/// Counts by type, source and review status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangelogStats {
    pub total: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_source: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
}

/// Persisted changelog.
#[derive(Debug, Clone)]
pub struct Changelog {
    storage: Storage,
    retention: ChangelogConfig,
}

impl Changelog {
    #[must_use]
    pub const fn new(storage: Storage, retention: ChangelogConfig) -> Self {
        Self { storage, retention }
    }

    /// All entries, newest first.
    #[must_use]
    pub fn entries(&self) -> Vec<ChangelogEntry> {
        self.storage.get_or_default(keys::CHANGELOG)
    }

    fn save(&self, mut entries: Vec<ChangelogEntry>, now: DateTime<Utc>) -> Result<(), LoreError> {
        let before = entries.len();
        prune(&mut entries, &self.retention, now);
        if entries.len() < before {
            debug!(pruned = before - entries.len(), "changelog retention applied");
        }
        if self.storage.set(keys::CHANGELOG, &entries) {
            Ok(())
        } else {
            Err(LoreError::StorageWrite(keys::CHANGELOG.to_string()))
        }
    }

    /// Append one entry.
    pub fn record(&self, change: NewChange, now: DateTime<Utc>) -> Result<ChangelogEntry, LoreError> {
        let entry = change.build(now);
        let mut entries = self.entries();
        entries.insert(0, entry.clone());
        self.save(entries, now)?;
        info!(
            id = %entry.id,
            change_type = %entry.change_type,
            source = %entry.source,
            status = %entry.review_status,
            "changelog entry recorded"
        );
        Ok(entry)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<ChangelogEntry> {
        self.entries().into_iter().find(|e| e.id == id)
    }

    /// Newest entry linked to a pending draft.
    #[must_use]
    pub fn for_pending(&self, pending_id: &str) -> Option<ChangelogEntry> {
        self.entries()
            .into_iter()
            .find(|e| e.pending_entry_id.as_deref() == Some(pending_id))
    }

    /// Entries matching `filter`, newest first, paged.
    #[must_use]
    pub fn list(&self, filter: &ChangelogFilter) -> Vec<ChangelogEntry> {
        self.entries()
            .into_iter()
            .filter(|e| filter.matches(e))
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect()
    }

    /// Attach a review decision.
    pub fn review(
        &self,
        id: &str,
        status: ChangeReviewStatus,
        reviewer: &str,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ChangelogEntry, LoreError> {
        let mut entries = self.entries();
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| LoreError::not_found("changelog entry", id))?;
        entry.review_status = status;
        entry.reviewed_by = Some(reviewer.to_string());
        entry.reviewed_at = Some(now);
        entry.review_note = note.map(str::to_string);
        let updated = entry.clone();
        self.save(entries, now)?;
        info!(id, status = %status, reviewer, "changelog entry reviewed");
        Ok(updated)
    }

    pub fn approve(
        &self,
        id: &str,
        reviewer: &str,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ChangelogEntry, LoreError> {
        self.review(id, ChangeReviewStatus::Approved, reviewer, note, now)
    }

    pub fn reject(
        &self,
        id: &str,
        reviewer: &str,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ChangelogEntry, LoreError> {
        self.review(id, ChangeReviewStatus::Rejected, reviewer, note, now)
    }

    #[must_use]
    pub fn stats(&self) -> ChangelogStats {
        let entries = self.entries();
        let mut stats = ChangelogStats {
            total: entries.len(),
            ..ChangelogStats::default()
        };
        for entry in &entries {
            *stats.by_type.entry(entry.change_type.to_string()).or_insert(0) += 1;
            *stats.by_source.entry(entry.source.to_string()).or_insert(0) += 1;
            *stats
                .by_status
                .entry(entry.review_status.to_string())
                .or_insert(0) += 1;
        }
        stats
    }

    /// Render matching entries as markdown, one section per day.
    #[must_use]
    pub fn export_markdown(&self, filter: &ChangelogFilter) -> String {
        render_markdown(&self.list(filter))
    }
}

/// Drop entries older than `retain_days`, then keep the newest `max_entries`.
/// Expects newest-first order.
pub fn prune(entries: &mut Vec<ChangelogEntry>, retention: &ChangelogConfig, now: DateTime<Utc>) {
    let cutoff = now - Duration::days(retention.retain_days);
    entries.retain(|e| e.timestamp >= cutoff);
    entries.truncate(retention.max_entries);
}

/// Markdown document grouped by date, newest day first.
#[must_use]
pub fn render_markdown(entries: &[ChangelogEntry]) -> String {
    let mut out = String::from("# Lore Changelog\n");
    if entries.is_empty() {
        out.push_str("\nNo changes recorded.\n");
        return out;
    }

    let mut current_day = None;
    for entry in entries {
        let day = entry.timestamp.date_naive();
        if current_day != Some(day) {
            let _ = write!(out, "\n## {}\n\n", day.format("%Y-%m-%d"));
            current_day = Some(day);
        }
        let _ = writeln!(
            out,
            "- {} **{}** {} ({}, {})",
            entry.timestamp.format("%H:%M"),
            entry.change_type,
            entry.title,
            entry.source,
            entry.review_status
        );
        if !entry.files.is_empty() {
            let files: Vec<String> = entry.files.iter().map(|f| format!("`{f}`")).collect();
            let _ = writeln!(out, "  - Files: {}", files.join(", "));
        }
        if entry.diff.lines_added > 0 || entry.diff.lines_removed > 0 {
            let _ = writeln!(
                out,
                "  - Diff: +{} / -{}",
                entry.diff.lines_added, entry.diff.lines_removed
            );
        }
        if let Some(reviewer) = &entry.reviewed_by {
            let _ = write!(out, "  - Reviewed by {reviewer}");
            match &entry.review_note {
                Some(note) => {
                    let _ = writeln!(out, ": {note}");
                }
                None => out.push('\n'),
            }
        }
    }
    out
}
