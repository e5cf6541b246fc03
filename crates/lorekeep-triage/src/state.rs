//! Persisted scheduler state and the per-run planning entry point.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use lorekeep_core::config::SchedulerConfig;
use lorekeep_core::storage::{Storage, keys};

use crate::schedule::{Inputs, Plan, Quotas, WorkClass, collect, plan};
use crate::score::HealthStats;

/// What the last run was planned to do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerState {
    pub planned_at: Option<DateTime<Utc>>,
    pub budget: usize,
    pub counts: BTreeMap<WorkClass, usize>,
    /// Target keys in execution order.
    pub targets: Vec<String>,
    pub backfilled: usize,
    pub health: Option<HealthStats>,
}

/// Plans runs and remembers the last plan.
#[derive(Debug, Clone)]
pub struct Scheduler {
    storage: Storage,
    config: SchedulerConfig,
}

impl Scheduler {
    #[must_use]
    pub const fn new(storage: Storage, config: SchedulerConfig) -> Self {
        Self { storage, config }
    }

    #[must_use]
    pub fn last(&self) -> SchedulerState {
        self.storage.get_or_default(keys::SCHEDULER_STATE)
    }

    /// Quotas this scheduler applies to a run of `budget` items.
    #[must_use]
    pub fn quotas(&self, budget: usize) -> Quotas {
        Quotas::for_budget(&self.config, budget)
    }

    /// Collect candidates, plan a run of `budget` items and record it.
    ///
    /// Failing to record the plan is logged and does not stop the run.
    #[must_use]
    pub fn plan_run(
        &self,
        inputs: Inputs<'_>,
        budget: usize,
        now: DateTime<Utc>,
    ) -> (Plan, HealthStats) {
        let health = HealthStats::measure(inputs.report, inputs.review_queue, inputs.discovered);
        let candidates = collect(inputs, now);
        let available = candidates.len();
        let plan = plan(candidates, budget, &self.quotas(budget));

        let state = SchedulerState {
            planned_at: Some(now),
            budget,
            counts: plan.counts.clone(),
            targets: plan.items.iter().map(|i| i.target.key().to_string()).collect(),
            backfilled: plan.backfilled,
            health: Some(health),
        };
        if !self.storage.set(keys::SCHEDULER_STATE, &state) {
            warn!("failed to record scheduler state");
        }

        info!(
            budget,
            available,
            selected = plan.items.len(),
            repair = plan.count(WorkClass::Repair),
            review = plan.count(WorkClass::Review),
            expand = plan.count(WorkClass::Expand),
            stale = plan.count(WorkClass::Stale),
            generate = plan.count(WorkClass::Generate),
            backfilled = plan.backfilled,
            health = health.health_score,
            "run planned"
        );
        (plan, health)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use lorekeep_core::model::{DiscoveredEntity, EntityCategory, EntityStatus};
    use lorekeep_core::scanner::ScanReport;
    use lorekeep_core::storage::FileBackend;
    use std::collections::HashSet;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap()
    }

    fn entity(i: u32) -> DiscoveredEntity {
        DiscoveredEntity {
            id: format!("entity-{i}"),
            name: format!("Place {i}"),
            category: EntityCategory::Location,
            sources: vec![],
            confidence: 0.5,
            priority: i,
            description: String::new(),
            status: EntityStatus::Queued,
            discovered_at: now(),
            processed_at: None,
            pending_entry_id: None,
            attempts: 0,
        }
    }

    #[test]
    fn plan_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Scheduler::new(
            Storage::new(FileBackend::new(dir.path())),
            SchedulerConfig::default(),
        );
        assert_eq!(scheduler.last(), SchedulerState::default());

        let report = ScanReport {
            scanned_on: NaiveDate::from_ymd_opt(2024, 6, 10).unwrap(),
            entries: vec![],
            total_issues: 0,
            issues_by_type: BTreeMap::new(),
            average_score: 100,
        };
        let discovered: Vec<DiscoveredEntity> = (1..=4).map(entity).collect();
        let (plan, health) = scheduler
            .plan_run(
                Inputs {
                    report: &report,
                    review_queue: &[],
                    discovered: &discovered,
                    awaiting: &HashSet::new(),
                },
                3,
                now(),
            );

        assert_eq!(plan.count(WorkClass::Generate), 3);
        assert_eq!(health.health_score, 100);
        assert_eq!(health.pending_entities, 4);

        let state = scheduler.last();
        assert_eq!(state.planned_at, Some(now()));
        assert_eq!(state.targets, ["entity-4", "entity-3", "entity-2"]);
        assert_eq!(state.counts.get(&WorkClass::Generate), Some(&3));
    }
}
