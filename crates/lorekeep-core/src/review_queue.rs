//! Published entries flagged by the scanner, waiting for the reviewer.
//!
//! The queue holds one record per file path. Re-scanning updates that
//! record in place; an entry that scans clean while still `queued` is marked
//! `completed`.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::LoreError;
use crate::ids::new_id;
use crate::model::{ReviewQueueEntry, ReviewStatus};
use crate::scanner::{ScanReport, ScannedEntry};
use crate::storage::{Storage, keys};

/// Outcome of folding a scan into the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub queued: usize,
    pub updated: usize,
    pub resolved: usize,
}

/// Persisted review queue.
#[derive(Debug, Clone)]
pub struct ReviewQueue {
    storage: Storage,
}

impl ReviewQueue {
    #[must_use]
    pub const fn new(storage: Storage) -> Self {
        Self { storage }
    }

    #[must_use]
    pub fn entries(&self) -> Vec<ReviewQueueEntry> {
        self.storage.get_or_default(keys::REVIEW_QUEUE)
    }

    fn save(&self, entries: &[ReviewQueueEntry]) -> Result<(), LoreError> {
        if self.storage.set(keys::REVIEW_QUEUE, entries) {
            Ok(())
        } else {
            Err(LoreError::StorageWrite(keys::REVIEW_QUEUE.to_string()))
        }
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<ReviewQueueEntry> {
        self.entries().into_iter().find(|e| e.id == id)
    }

    #[must_use]
    pub fn for_path(&self, file_path: &str) -> Option<ReviewQueueEntry> {
        self.entries().into_iter().find(|e| e.file_path == file_path)
    }

    /// Entries with status `queued`, most urgent first, oldest first on ties.
    #[must_use]
    pub fn queued(&self) -> Vec<ReviewQueueEntry> {
        let mut queued: Vec<ReviewQueueEntry> = self
            .entries()
            .into_iter()
            .filter(|e| e.status == ReviewStatus::Queued)
            .collect();
        queued.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.queued_at.cmp(&b.queued_at))
        });
        queued
    }

    #[must_use]
    pub fn next(&self) -> Option<ReviewQueueEntry> {
        self.queued().into_iter().next()
    }

    /// Insert or refresh the record for one scanned entry.
    ///
    /// Returns `true` when a new record was queued (or a finished one
    /// re-queued), `false` when an active record was updated in place.
    pub fn upsert(&self, scanned: &ScannedEntry, now: DateTime<Utc>) -> Result<bool, LoreError> {
        let mut entries = self.entries();
        let queued = upsert_into(&mut entries, scanned, now);
        self.save(&entries)?;
        Ok(queued)
    }

    /// Fold a whole scan into the queue.
    ///
    /// Entries below `threshold` with issues are upserted. Records still
    /// `queued` whose file now passes, or no longer exists, are completed.
    pub fn sync(
        &self,
        report: &ScanReport,
        threshold: u8,
        now: DateTime<Utc>,
    ) -> Result<SyncReport, LoreError> {
        let mut entries = self.entries();
        let mut summary = SyncReport::default();

        let flagged: HashSet<&str> = report
            .needing_review(threshold)
            .map(|e| e.file_path.as_str())
            .collect();
        for scanned in report.needing_review(threshold) {
            if upsert_into(&mut entries, scanned, now) {
                summary.queued += 1;
            } else {
                summary.updated += 1;
            }
        }

        for entry in &mut entries {
            if entry.status == ReviewStatus::Queued && !flagged.contains(entry.file_path.as_str()) {
                entry.status = ReviewStatus::Completed;
                entry.updated_at = Some(now);
                entry.note = Some("resolved by rescan".to_string());
                summary.resolved += 1;
            }
        }

        self.save(&entries)?;
        info!(
            queued = summary.queued,
            updated = summary.updated,
            resolved = summary.resolved,
            "review queue synced"
        );
        Ok(summary)
    }

    /// Set status (and optionally the linked draft and a note) by record id.
    pub fn set_status(
        &self,
        id: &str,
        status: ReviewStatus,
        pending_entry_id: Option<&str>,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ReviewQueueEntry, LoreError> {
        let mut entries = self.entries();
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| LoreError::not_found("review entry", id))?;
        entry.status = status;
        entry.updated_at = Some(now);
        if let Some(pending) = pending_entry_id {
            entry.pending_entry_id = Some(pending.to_string());
        }
        if let Some(note) = note {
            entry.note = Some(note.to_string());
        }
        let updated = entry.clone();
        self.save(&entries)?;
        debug!(id, status = %status, "review entry updated");
        Ok(updated)
    }

    /// Mark whatever record tracks `file_path` as finished after its revision
    /// was approved or rejected.
    pub fn resolve_path(
        &self,
        file_path: &str,
        status: ReviewStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<ReviewQueueEntry>, LoreError> {
        match self.for_path(file_path) {
            Some(entry) if entry.status.is_active() => self
                .set_status(&entry.id, status, None, None, now)
                .map(Some),
            _ => Ok(None),
        }
    }

    /// Count of records per status.
    #[must_use]
    pub fn stats(&self) -> BTreeMap<ReviewStatus, usize> {
        let mut counts = BTreeMap::new();
        for entry in self.entries() {
            *counts.entry(entry.status).or_insert(0) += 1;
        }
        counts
    }
}

fn upsert_into(entries: &mut Vec<ReviewQueueEntry>, scanned: &ScannedEntry, now: DateTime<Utc>) -> bool {
    if let Some(existing) = entries.iter_mut().find(|e| e.file_path == scanned.file_path) {
        let requeue = !existing.status.is_active();
        existing.entry_name.clone_from(&scanned.entry_name);
        existing.category = scanned.category;
        existing.issues.clone_from(&scanned.issues);
        existing.score = scanned.score;
        existing.priority = scanned.priority;
        existing.updated_at = Some(now);
        if requeue {
            existing.status = ReviewStatus::Queued;
            existing.queued_at = now;
            existing.pending_entry_id = None;
            existing.note = None;
        }
        return requeue;
    }

    entries.push(ReviewQueueEntry {
        id: new_id("review", now),
        file_path: scanned.file_path.clone(),
        entry_name: scanned.entry_name.clone(),
        category: scanned.category,
        issues: scanned.issues.clone(),
        score: scanned.score,
        priority: scanned.priority,
        status: ReviewStatus::Queued,
        queued_at: now,
        updated_at: None,
        pending_entry_id: None,
        note: None,
    });
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lore::frontmatter::DetailLevel;
    use crate::model::{Issue, IssueKind};
    use crate::scanner::{quality_score, review_priority};
    use crate::storage::FileBackend;
    use chrono::{Duration, NaiveDate, TimeZone};

    fn queue() -> (tempfile::TempDir, ReviewQueue) {
        let dir = tempfile::tempdir().unwrap();
        let queue = ReviewQueue::new(Storage::new(FileBackend::new(dir.path())));
        (dir, queue)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap()
    }

    fn scanned(path: &str, kinds: &[IssueKind]) -> ScannedEntry {
        let issues: Vec<Issue> = kinds.iter().map(|k| Issue::new(*k, k.as_str())).collect();
        let score = quality_score(&issues);
        ScannedEntry {
            file_path: path.to_string(),
            entry_name: path.to_string(),
            category: None,
            priority: review_priority(score, &issues),
            score,
            issues,
            detail_level: DetailLevel::Basic,
            citation_count: 0,
            last_updated: None,
        }
    }

    fn report(entries: Vec<ScannedEntry>) -> ScanReport {
        ScanReport {
            scanned_on: NaiveDate::from_ymd_opt(2024, 6, 10).unwrap(),
            total_issues: entries.iter().map(|e| e.issues.len()).sum(),
            issues_by_type: BTreeMap::new(),
            average_score: 0,
            entries,
        }
    }

    #[test]
    fn rescan_updates_in_place() {
        let (_d, q) = queue();
        assert!(q
            .upsert(&scanned("monsters/gorm.md", &[IssueKind::BrokenLink]), now())
            .unwrap());
        assert!(!q
            .upsert(
                &scanned("monsters/gorm.md", &[IssueKind::BrokenLink, IssueKind::ThinContent]),
                now() + Duration::hours(1),
            )
            .unwrap());
        let all = q.entries();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].issues.len(), 2);
        assert_eq!(all[0].score, 70);
    }

    #[test]
    fn sync_queues_below_threshold_and_resolves_clean() {
        let (_d, q) = queue();
        let first = report(vec![
            scanned("monsters/gorm.md", &[IssueKind::BrokenLink, IssueKind::MissingOverview]),
            scanned("monsters/phoenix.md", &[IssueKind::MissingOverview]),
        ]);
        let summary = q.sync(&first, 80, now()).unwrap();
        assert_eq!(summary.queued, 1);
        assert_eq!(q.queued()[0].file_path, "monsters/gorm.md");

        let second = report(vec![scanned("monsters/gorm.md", &[])]);
        let summary = q.sync(&second, 80, now()).unwrap();
        assert_eq!(summary.resolved, 1);
        assert!(q.queued().is_empty());
    }

    #[test]
    fn pending_approval_survives_rescan() {
        let (_d, q) = queue();
        q.upsert(&scanned("monsters/gorm.md", &[IssueKind::BrokenLink]), now())
            .unwrap();
        let id = q.entries()[0].id.clone();
        q.set_status(&id, ReviewStatus::PendingApproval, Some("pending-1"), None, now())
            .unwrap();

        let rescan = report(vec![scanned(
            "monsters/gorm.md",
            &[IssueKind::BrokenLink, IssueKind::ThinContent],
        )]);
        q.sync(&rescan, 80, now()).unwrap();
        let entry = q.get(&id).unwrap();
        assert_eq!(entry.status, ReviewStatus::PendingApproval);
        assert_eq!(entry.pending_entry_id.as_deref(), Some("pending-1"));
    }

    #[test]
    fn finished_entries_requeue_when_issues_return() {
        let (_d, q) = queue();
        q.upsert(&scanned("monsters/gorm.md", &[IssueKind::BrokenLink]), now())
            .unwrap();
        let id = q.entries()[0].id.clone();
        q.set_status(&id, ReviewStatus::Skipped, None, Some("dropped citations"), now())
            .unwrap();
        assert!(q
            .upsert(&scanned("monsters/gorm.md", &[IssueKind::BrokenLink]), now())
            .unwrap());
        let entry = q.get(&id).unwrap();
        assert_eq!(entry.status, ReviewStatus::Queued);
        assert_eq!(entry.note, None);
    }

    #[test]
    fn next_prefers_priority() {
        let (_d, q) = queue();
        q.upsert(&scanned("a.md", &[IssueKind::MissingOverview]), now())
            .unwrap();
        q.upsert(
            &scanned("b.md", &[IssueKind::MissingFrontmatter]),
            now() + Duration::minutes(1),
        )
        .unwrap();
        assert_eq!(q.next().unwrap().file_path, "b.md");
        assert_eq!(q.stats().get(&ReviewStatus::Queued), Some(&2));
    }

    #[test]
    fn unknown_id_is_not_found() {
        let (_d, q) = queue();
        let err = q
            .set_status("review-x", ReviewStatus::Completed, None, None, now())
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
