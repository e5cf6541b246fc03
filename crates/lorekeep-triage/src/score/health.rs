//! Whole-compendium health score.
//!
//! `100 - 5*broken - 2*quality - 1*basic - stale/5`, clamped to `[0, 100]`.
//! An entry with both broken links and broken frontmatter counts twice.

use serde::{Deserialize, Serialize};

use lorekeep_core::lore::DetailLevel;
use lorekeep_core::model::{
    DiscoveredEntity, EntityStatus, IssueKind, ReviewQueueEntry, ReviewStatus,
};
use lorekeep_core::scanner::ScanReport;

/// Counts behind a health score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStats {
    pub broken_entries: usize,
    /// Records waiting in the review queue.
    pub quality_issues: usize,
    pub basic_entries: usize,
    pub stale_entries: usize,
    /// Entities queued for generation. Informational; not scored.
    pub pending_entities: usize,
    pub health_score: u8,
}

impl HealthStats {
    #[must_use]
    pub fn measure(
        report: &ScanReport,
        review_queue: &[ReviewQueueEntry],
        discovered: &[DiscoveredEntity],
    ) -> Self {
        let mut stats = Self::default();
        for entry in &report.entries {
            if entry.has_issue(IssueKind::BrokenLink) {
                stats.broken_entries += 1;
            }
            if entry.has_issue(IssueKind::MalformedFrontmatter)
                || entry.has_issue(IssueKind::MissingFrontmatter)
                || entry.has_issue(IssueKind::QuotedArray)
            {
                stats.broken_entries += 1;
            }
            if entry.detail_level <= DetailLevel::Basic {
                stats.basic_entries += 1;
            }
            if entry.has_issue(IssueKind::StaleContent) {
                stats.stale_entries += 1;
            }
        }
        stats.quality_issues = review_queue
            .iter()
            .filter(|e| e.status == ReviewStatus::Queued)
            .count();
        stats.pending_entities = discovered
            .iter()
            .filter(|e| e.status == EntityStatus::Queued)
            .count();
        stats.health_score = health_score(
            stats.broken_entries,
            stats.quality_issues,
            stats.basic_entries,
            stats.stale_entries,
        );
        stats
    }
}

#[must_use]
pub fn health_score(broken: usize, quality: usize, basic: usize, stale: usize) -> u8 {
    let deductions = broken
        .saturating_mul(5)
        .saturating_add(quality.saturating_mul(2))
        .saturating_add(basic)
        .saturating_add(stale / 5);
    u8::try_from(100usize.saturating_sub(deductions)).unwrap_or(0)
}
