//! Candidate collection from scanner output and the persisted queues.
//!
//! Each entry is offered in at most one class, the highest it qualifies
//! for. Entries with a draft still awaiting review are not offered at all,
//! so their slots go to the next eligible class. Priorities are banded so a class's numbers read the same in logs:
//! repair 90-100, review 60-90, expand 40-50, stale 20-40, generate 0-20.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use lorekeep_core::lore::DetailLevel;
use lorekeep_core::model::{
    DiscoveredEntity, EntityCategory, EntityStatus, IssueKind, ReviewQueueEntry, ReviewStatus,
};
use lorekeep_core::scanner::{ScanReport, ScannedEntry};

use super::plan::{Target, WorkClass, WorkItem};

/// Everything the planner can draw from for one run.
#[derive(Debug, Clone, Copy)]
pub struct Inputs<'a> {
    pub report: &'a ScanReport,
    pub review_queue: &'a [ReviewQueueEntry],
    pub discovered: &'a [DiscoveredEntity],
    /// Entry paths with a pending draft.
    pub awaiting: &'a HashSet<String>,
}

/// Scanner issues that make an entry broken rather than merely weak.
#[must_use]
pub fn repair_issues(entry: &ScannedEntry) -> usize {
    entry
        .issues
        .iter()
        .filter(|i| i.kind.is_structural() || i.kind == IssueKind::QuotedArray)
        .count()
}

/// Days since `lastUpdated`, as of the scan date.
#[must_use]
pub fn days_stale(entry: &ScannedEntry, report: &ScanReport) -> Option<i64> {
    entry
        .last_updated
        .map(|d| (report.scanned_on - d).num_days())
}

/// Build work items, one per target, in class order.
#[must_use]
pub fn collect(inputs: Inputs<'_>, now: DateTime<Utc>) -> Vec<WorkItem> {
    let mut seen: HashSet<String> = inputs.awaiting.clone();
    let mut out = Vec::new();
    let mut push = |out: &mut Vec<WorkItem>, item: WorkItem| {
        if seen.insert(item.target.key().to_string()) {
            out.push(item);
        }
    };

    for entry in &inputs.report.entries {
        let broken = repair_issues(entry);
        if broken > 0 {
            let bump = u32::try_from(broken.saturating_mul(5)).unwrap_or(u32::MAX).min(10);
            push(&mut out, entry_item(WorkClass::Repair, entry, 90 + bump, now));
        }
    }

    for queued in inputs
        .review_queue
        .iter()
        .filter(|e| e.status == ReviewStatus::Queued)
    {
        push(
            &mut out,
            WorkItem {
                class: WorkClass::Review,
                target: Target::Entry {
                    path: queued.file_path.clone(),
                },
                label: queued.entry_name.clone(),
                priority: 60 + queued.priority.min(30),
                queued_at: queued.queued_at,
            },
        );
    }

    for entry in &inputs.report.entries {
        if entry.detail_level <= DetailLevel::Basic {
            let bonus = if entry.category == Some(EntityCategory::Monster) {
                10
            } else {
                0
            };
            push(&mut out, entry_item(WorkClass::Expand, entry, 40 + bonus, now));
        }
    }

    for entry in &inputs.report.entries {
        if entry.has_issue(IssueKind::StaleContent) {
            let days = days_stale(entry, inputs.report).unwrap_or(0).max(0);
            let bump = u32::try_from(days / 10).unwrap_or(u32::MAX).min(20);
            push(&mut out, entry_item(WorkClass::Stale, entry, 20 + bump, now));
        }
    }

    for entity in inputs
        .discovered
        .iter()
        .filter(|e| e.status == EntityStatus::Queued)
    {
        push(
            &mut out,
            WorkItem {
                class: WorkClass::Generate,
                target: Target::Entity {
                    id: entity.id.clone(),
                },
                label: entity.name.clone(),
                priority: entity.priority.min(20),
                queued_at: entity.discovered_at,
            },
        );
    }

    out
}

fn entry_item(class: WorkClass, entry: &ScannedEntry, priority: u32, now: DateTime<Utc>) -> WorkItem {
    WorkItem {
        class,
        target: Target::Entry {
            path: entry.file_path.clone(),
        },
        label: entry.entry_name.clone(),
        priority,
        queued_at: now,
    }
}
