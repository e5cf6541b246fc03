//! Per-run work planning.
//!
//! # Algorithm
//!
//! 1. Group candidates by [`WorkClass`] and order each group by priority
//!    descending, FIFO on ties.
//! 2. **Quota pass**: walk the classes in priority order, taking up to each
//!    class's cap while budget remains.
//! 3. **Backfill pass**: walk the classes again in the same order, ignoring
//!    caps, until the budget is spent or candidates run out.
//!
//! Caps only ever hold a class back for the benefit of lower classes; a
//! budget slot is never left idle while any candidate remains.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lorekeep_core::config::SchedulerConfig;
use lorekeep_core::model::ReviewMode;

/// Kind of work, in strict priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkClass {
    /// Broken links or frontmatter.
    Repair,
    /// Quality issues flagged by the scanner.
    Review,
    /// Shallow entries.
    Expand,
    /// Entries past the staleness window.
    Stale,
    /// New entries from the discovery queue.
    Generate,
}

impl WorkClass {
    /// Every class, highest priority first.
    pub const ALL: [Self; 5] = [
        Self::Repair,
        Self::Review,
        Self::Expand,
        Self::Stale,
        Self::Generate,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Repair => "repair",
            Self::Review => "review",
            Self::Expand => "expand",
            Self::Stale => "stale",
            Self::Generate => "generate",
        }
    }

    /// Reviewer mode for classes that revise a published entry.
    #[must_use]
    pub const fn review_mode(self) -> Option<ReviewMode> {
        match self {
            Self::Repair | Self::Review => Some(ReviewMode::Repair),
            Self::Expand => Some(ReviewMode::Expand),
            Self::Stale => Some(ReviewMode::Refresh),
            Self::Generate => None,
        }
    }

    const fn index(self) -> usize {
        match self {
            Self::Repair => 0,
            Self::Review => 1,
            Self::Expand => 2,
            Self::Stale => 3,
            Self::Generate => 4,
        }
    }
}

impl fmt::Display for WorkClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| format!("invalid work class: '{s}'"))
    }
}

/// What a work item operates on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Target {
    /// Published entry, relative to the lore root.
    Entry { path: String },
    /// Discovered entity waiting for a first draft.
    Entity { id: String },
}

impl Target {
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Entry { path } => path,
            Self::Entity { id } => id,
        }
    }
}

/// One schedulable unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub class: WorkClass,
    pub target: Target,
    /// Entry or entity name, for display.
    pub label: String,
    pub priority: u32,
    pub queued_at: DateTime<Utc>,
}

/// Per-class caps for the quota pass. `None` is uncapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Quotas {
    caps: [Option<usize>; 5],
}

impl Quotas {
    /// No caps: plain strict-priority planning.
    pub const UNLIMITED: Self = Self { caps: [None; 5] };

    #[must_use]
    pub const fn with_cap(mut self, class: WorkClass, cap: Option<usize>) -> Self {
        self.caps[class.index()] = cap;
        self
    }

    #[must_use]
    pub const fn cap(&self, class: WorkClass) -> Option<usize> {
        self.caps[class.index()]
    }

    /// Caps for a run of `budget` items.
    ///
    /// Explicit caps from `config` win. Otherwise review gets
    /// `max(1, round((1 - generate_ratio) * budget))` and generate gets the
    /// rest of the budget. Repair, expand and stale stay uncapped.
    #[must_use]
    pub fn for_budget(config: &SchedulerConfig, budget: usize) -> Self {
        let review = config
            .review_quota
            .unwrap_or_else(|| default_review_quota(config.generate_ratio, budget));
        let generate = config
            .generate_quota
            .unwrap_or_else(|| budget.saturating_sub(review));
        Self::UNLIMITED
            .with_cap(WorkClass::Repair, config.repair_quota)
            .with_cap(WorkClass::Review, Some(review))
            .with_cap(WorkClass::Expand, config.expand_quota)
            .with_cap(WorkClass::Stale, config.stale_quota)
            .with_cap(WorkClass::Generate, Some(generate))
    }
}

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn default_review_quota(generate_ratio: f64, budget: usize) -> usize {
    let share = (1.0 - generate_ratio.clamp(0.0, 1.0)) * budget as f64;
    (share.round() as usize).max(1)
}

/// Selected work for one run, in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub budget: usize,
    pub items: Vec<WorkItem>,
    pub counts: BTreeMap<WorkClass, usize>,
    /// Items picked only in the backfill pass.
    pub backfilled: usize,
}

impl Plan {
    #[must_use]
    pub fn count(&self, class: WorkClass) -> usize {
        self.counts.get(&class).copied().unwrap_or(0)
    }

    pub fn of_class(&self, class: WorkClass) -> impl Iterator<Item = &WorkItem> {
        self.items.iter().filter(move |i| i.class == class)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Choose up to `budget` items from `candidates`.
///
/// The returned items are ordered by class, then by priority within the
/// class. Candidates are assumed to target distinct entries.
#[must_use]
pub fn plan(candidates: Vec<WorkItem>, budget: usize, quotas: &Quotas) -> Plan {
    let mut by_class: BTreeMap<WorkClass, Vec<WorkItem>> = BTreeMap::new();
    for item in candidates {
        by_class.entry(item.class).or_default().push(item);
    }
    for items in by_class.values_mut() {
        items.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.queued_at.cmp(&b.queued_at))
        });
        // Best candidate last, for `pop`.
        items.reverse();
    }

    let mut selected: Vec<WorkItem> = Vec::with_capacity(budget);
    for class in WorkClass::ALL {
        take(&mut by_class, class, quotas.cap(class), budget, &mut selected);
    }
    let primary = selected.len();
    for class in WorkClass::ALL {
        take(&mut by_class, class, None, budget, &mut selected);
    }
    let backfilled = selected.len() - primary;

    selected.sort_by(|a, b| {
        a.class
            .cmp(&b.class)
            .then_with(|| b.priority.cmp(&a.priority))
            .then_with(|| a.queued_at.cmp(&b.queued_at))
    });
    let mut counts = BTreeMap::new();
    for item in &selected {
        *counts.entry(item.class).or_insert(0) += 1;
    }

    Plan {
        budget,
        items: selected,
        counts,
        backfilled,
    }
}

fn take(
    by_class: &mut BTreeMap<WorkClass, Vec<WorkItem>>,
    class: WorkClass,
    cap: Option<usize>,
    budget: usize,
    selected: &mut Vec<WorkItem>,
) {
    let Some(pool) = by_class.get_mut(&class) else {
        return;
    };
    let already = selected.iter().filter(|i| i.class == class).count();
    let mut room = cap.map_or(usize::MAX, |c| c.saturating_sub(already));
    while room > 0 && selected.len() < budget {
        let Some(item) = pool.pop() else { break };
        selected.push(item);
        room -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap()
    }

    fn items(class: WorkClass, n: usize) -> Vec<WorkItem> {
        (0..n)
            .map(|i| WorkItem {
                class,
                target: Target::Entry {
                    path: format!("{class}/{i}.md"),
                },
                label: format!("{class} {i}"),
                priority: 10,
                queued_at: t0() + Duration::minutes(i64::try_from(i).unwrap()),
            })
            .collect()
    }

    fn defaults(budget: usize) -> Quotas {
        Quotas::for_budget(&SchedulerConfig::default(), budget)
    }

    #[test]
    fn default_quotas_split_seventy_thirty() {
        let q = defaults(10);
        assert_eq!(q.cap(WorkClass::Review), Some(3));
        assert_eq!(q.cap(WorkClass::Generate), Some(7));
        assert_eq!(q.cap(WorkClass::Repair), None);

        let q = defaults(1);
        assert_eq!(q.cap(WorkClass::Review), Some(1));
        assert_eq!(q.cap(WorkClass::Generate), Some(0));
    }

    #[test]
    fn explicit_quota_overrides_ratio() {
        let config = SchedulerConfig {
            review_quota: Some(5),
            ..SchedulerConfig::default()
        };
        let q = Quotas::for_budget(&config, 10);
        assert_eq!(q.cap(WorkClass::Review), Some(5));
        assert_eq!(q.cap(WorkClass::Generate), Some(5));
    }

    #[test]
    fn mixed_queue_follows_ratio() {
        let mut candidates = items(WorkClass::Review, 10);
        candidates.extend(items(WorkClass::Generate, 10));
        let plan = plan(candidates, 10, &defaults(10));
        assert_eq!(plan.count(WorkClass::Review), 3);
        assert_eq!(plan.count(WorkClass::Generate), 7);
        assert_eq!(plan.backfilled, 0);
        assert_eq!(plan.items[0].class, WorkClass::Review);
    }

    #[test]
    fn backfill_spends_budget_when_generation_runs_dry() {
        let mut candidates = items(WorkClass::Review, 10);
        candidates.extend(items(WorkClass::Generate, 2));
        let plan = plan(candidates, 10, &defaults(10));
        assert_eq!(plan.items.len(), 10);
        assert_eq!(plan.count(WorkClass::Generate), 2);
        assert_eq!(plan.count(WorkClass::Review), 8);
        assert_eq!(plan.backfilled, 5);
    }

    #[test]
    fn repair_outranks_everything() {
        let mut candidates = items(WorkClass::Generate, 5);
        candidates.extend(items(WorkClass::Repair, 4));
        candidates.extend(items(WorkClass::Stale, 5));
        let plan = plan(candidates, 5, &defaults(5));
        assert_eq!(plan.count(WorkClass::Repair), 4);
        assert_eq!(plan.items.len(), 5);
        assert_eq!(plan.items[4].class, WorkClass::Stale);
    }

    #[test]
    fn within_class_priority_then_fifo() {
        let mut candidates = items(WorkClass::Review, 3);
        candidates[2].priority = 50;
        let plan = plan(candidates, 2, &Quotas::UNLIMITED);
        let keys: Vec<&str> = plan.items.iter().map(|i| i.target.key()).collect();
        assert_eq!(keys, ["review/2.md", "review/0.md"]);
    }

    #[test]
    fn zero_budget_plans_nothing() {
        let plan = plan(items(WorkClass::Repair, 3), 0, &defaults(0));
        assert!(plan.is_empty());
    }

    #[test]
    fn class_names_parse() {
        assert_eq!("Stale".parse::<WorkClass>().unwrap(), WorkClass::Stale);
        assert!("later".parse::<WorkClass>().is_err());
        assert_eq!(
            serde_json::to_string(&WorkClass::Generate).unwrap(),
            "\"generate\""
        );
    }
}
