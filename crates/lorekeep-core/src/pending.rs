//! Drafts awaiting a human decision.
//!
//! [`PendingEntries::approve`] is the only code path that writes into the
//! published lore tree. Rejection records the decision and leaves the tree
//! untouched.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::changelog::{Changelog, NewChange};
use crate::error::LoreError;
use crate::lore::{Frontmatter, LoreTree, frontmatter};
use crate::model::{
    ChangeReviewStatus, ChangeSource, ChangeType, ChangelogEntry, DiffSummary, PendingEntry,
    PendingKind, PendingStatus, ReviewStatus,
};
use crate::review_queue::ReviewQueue;
use crate::state::AgentStateMachine;
use crate::storage::{Storage, keys};

/// Reviewer name recorded for drafts published without a human.
pub const AUTO_REVIEWER: &str = "auto-approve";

/// Collaborators touched by a disposition.
#[derive(Debug, Clone, Copy)]
pub struct Publisher<'a> {
    pub tree: &'a LoreTree,
    pub changelog: &'a Changelog,
    pub agent: &'a AgentStateMachine,
}

/// Result of approving a draft.
#[derive(Debug, Clone)]
pub struct Published {
    pub entry: PendingEntry,
    pub changelog: ChangelogEntry,
    /// Written path, relative to the lore root.
    pub path: String,
}

/// Persisted list of [`PendingEntry`] drafts.
#[derive(Debug, Clone)]
pub struct PendingEntries {
    storage: Storage,
}

impl PendingEntries {
    #[must_use]
    pub const fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Every draft, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<PendingEntry> {
        self.storage.get_or_default(keys::PENDING_ENTRIES)
    }

    fn save(&self, entries: &[PendingEntry]) -> Result<(), LoreError> {
        if self.storage.set(keys::PENDING_ENTRIES, entries) {
            Ok(())
        } else {
            Err(LoreError::StorageWrite(keys::PENDING_ENTRIES.to_string()))
        }
    }

    /// Drafts with the given status (all when `None`), newest first.
    #[must_use]
    pub fn list(&self, status: Option<PendingStatus>) -> Vec<PendingEntry> {
        let mut entries: Vec<PendingEntry> = self
            .entries()
            .into_iter()
            .filter(|e| status.is_none_or(|s| e.status == s))
            .collect();
        entries.reverse();
        entries
    }

    pub fn get(&self, id: &str) -> Result<PendingEntry, LoreError> {
        self.entries()
            .into_iter()
            .find(|e| e.id == id)
            .ok_or_else(|| LoreError::not_found("pending entry", id))
    }

    /// Version the next draft for `target_path` will carry.
    #[must_use]
    pub fn next_version(&self, target_path: &str) -> u32 {
        version_after(&self.entries(), target_path)
    }

    /// Store a new draft, assigning its version.
    pub fn add(&self, mut entry: PendingEntry) -> Result<PendingEntry, LoreError> {
        let mut entries = self.entries();
        let target = entry.target_path();
        entry.version = version_after(&entries, &target);
        entry.status = PendingStatus::Pending;
        entries.push(entry.clone());
        self.save(&entries)?;
        info!(id = %entry.id, path = %target, version = entry.version, "draft stored");
        Ok(entry)
    }

    /// Link a draft to the changelog entry recorded for it.
    pub fn link_changelog(&self, id: &str, changelog_id: &str) -> Result<(), LoreError> {
        let mut entries = self.entries();
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| LoreError::not_found("pending entry", id))?;
        entry.changelog_id = Some(changelog_id.to_string());
        self.save(&entries)
    }

    fn pending(&self, id: &str, target: PendingStatus) -> Result<PendingEntry, LoreError> {
        let entry = self.get(id)?;
        if entry.status != PendingStatus::Pending {
            return Err(LoreError::InvalidTransition {
                id: id.to_string(),
                from: entry.status.to_string(),
                to: target.to_string(),
            });
        }
        Ok(entry)
    }

    fn finish(
        &self,
        id: &str,
        status: PendingStatus,
        reviewer: &str,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<PendingEntry, LoreError> {
        let mut entries = self.entries();
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| LoreError::not_found("pending entry", id))?;
        entry.status = status;
        entry.reviewed_at = Some(now);
        entry.reviewed_by = Some(reviewer.to_string());
        entry.review_notes = note.map(str::to_string);
        let updated = entry.clone();
        self.save(&entries)?;
        Ok(updated)
    }

    /// Publish a draft into the lore tree.
    ///
    /// Exactly one changelog entry ends up `approved` for the written path:
    /// the one recorded with the draft if it exists, otherwise a new
    /// `human_review` entry.
    pub fn approve(
        &self,
        id: &str,
        reviewer: &str,
        note: Option<&str>,
        publisher: Publisher<'_>,
        now: DateTime<Utc>,
    ) -> Result<Published, LoreError> {
        self.publish(id, reviewer, note, ChangeReviewStatus::Approved, publisher, now)
    }

    /// Publish a draft that met the auto-approval threshold.
    pub fn auto_approve(
        &self,
        id: &str,
        publisher: Publisher<'_>,
        now: DateTime<Utc>,
    ) -> Result<Published, LoreError> {
        self.publish(id, AUTO_REVIEWER, None, ChangeReviewStatus::AutoApproved, publisher, now)
    }

    fn publish(
        &self,
        id: &str,
        reviewer: &str,
        note: Option<&str>,
        status: ChangeReviewStatus,
        publisher: Publisher<'_>,
        now: DateTime<Utc>,
    ) -> Result<Published, LoreError> {
        let draft = self.pending(id, PendingStatus::Approved)?;
        let path = draft.target_path();
        let previous = match publisher.tree.read(&path) {
            Ok(content) => Some(content),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err),
        };
        let content = stamp_last_updated(&draft.content, now);
        publisher.tree.write(&path, &content)?;

        let linked = draft
            .changelog_id
            .as_deref()
            .and_then(|cid| publisher.changelog.get(cid));
        let changelog = match linked {
            Some(existing) => publisher
                .changelog
                .review(&existing.id, status, reviewer, note, now)?,
            None => {
                let change_type = if previous.is_some() {
                    ChangeType::Update
                } else {
                    ChangeType::Create
                };
                let change = NewChange::new(change_type, ChangeSource::HumanReview, &draft.title)
                    .file(&path)
                    .diff(DiffSummary::between(
                        previous.as_deref().unwrap_or_default(),
                        &content,
                    ))
                    .confidence(draft.confidence)
                    .status(status)
                    .reviewed_by(reviewer)
                    .pending_entry(&draft.id);
                publisher.changelog.record(change, now)?
            }
        };

        let entry = self.finish(id, PendingStatus::Approved, reviewer, note, now)?;
        if let PendingKind::Revision { original_path, .. } = &entry.kind {
            ReviewQueue::new(self.storage.clone()).resolve_path(
                original_path,
                ReviewStatus::Completed,
                now,
            )?;
        }
        publisher.agent.record_disposition(true);
        info!(id, path = %path, reviewer, "draft published");
        Ok(Published {
            entry,
            changelog,
            path,
        })
    }

    /// Reject a draft. Nothing is written to the lore tree.
    pub fn reject(
        &self,
        id: &str,
        reviewer: &str,
        note: Option<&str>,
        publisher: Publisher<'_>,
        now: DateTime<Utc>,
    ) -> Result<PendingEntry, LoreError> {
        let draft = self.pending(id, PendingStatus::Rejected)?;
        let linked = draft
            .changelog_id
            .as_deref()
            .and_then(|cid| publisher.changelog.get(cid));
        match linked {
            Some(existing) => {
                publisher.changelog.reject(&existing.id, reviewer, note, now)?;
            }
            None => {
                warn!(id, "rejected draft had no changelog entry, recording one");
                let path = draft.target_path();
                let change_type = if publisher.tree.exists(&path) {
                    ChangeType::Update
                } else {
                    ChangeType::Create
                };
                let change = NewChange::new(change_type, ChangeSource::HumanReview, &draft.title)
                    .file(path)
                    .confidence(draft.confidence)
                    .status(ChangeReviewStatus::Rejected)
                    .reviewed_by(reviewer)
                    .pending_entry(&draft.id);
                publisher.changelog.record(change, now)?;
            }
        }

        let entry = self.finish(id, PendingStatus::Rejected, reviewer, note, now)?;
        if let PendingKind::Revision { original_path, .. } = &entry.kind {
            ReviewQueue::new(self.storage.clone()).resolve_path(
                original_path,
                ReviewStatus::Skipped,
                now,
            )?;
        }
        publisher.agent.record_disposition(false);
        info!(id, reviewer, "draft rejected");
        Ok(entry)
    }
}

fn version_after(entries: &[PendingEntry], target_path: &str) -> u32 {
    entries
        .iter()
        .filter(|e| e.target_path() == target_path)
        .map(|e| e.version)
        .max()
        .map_or(1, |v| v + 1)
}

/// Set `lastUpdated` to the publication date when the draft carries
/// frontmatter.
fn stamp_last_updated(content: &str, now: DateTime<Utc>) -> String {
    match Frontmatter::parse(content) {
        Ok(mut fm) => {
            fm.set("lastUpdated", now.format("%Y-%m-%d").to_string());
            fm.render(frontmatter::body(content))
        }
        Err(_) => content.to_string(),
    }
}
