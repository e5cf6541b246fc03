use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use lorekeep_core::config::SchedulerConfig;
use lorekeep_triage::schedule::plan;
use lorekeep_triage::{Quotas, Target, WorkClass, WorkItem};

fn arb_items() -> impl Strategy<Value = Vec<WorkItem>> {
    prop::collection::vec(
        (prop::sample::select(WorkClass::ALL.to_vec()), 0u32..100, 0i64..1000),
        0..60,
    )
    .prop_map(|raw| {
        let t0 = Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap();
        raw.into_iter()
            .enumerate()
            .map(|(i, (class, priority, minutes))| WorkItem {
                class,
                target: Target::Entry {
                    path: format!("entries/{i}.md"),
                },
                label: format!("entry {i}"),
                priority,
                queued_at: t0 + Duration::minutes(minutes),
            })
            .collect()
    })
}

/// Repair stays uncapped, as it is by default.
fn arb_config() -> impl Strategy<Value = SchedulerConfig> {
    (
        0.0f64..=1.0,
        prop::option::of(0usize..10),
        prop::option::of(0usize..10),
    )
        .prop_map(|(ratio, review, generate)| SchedulerConfig {
            generate_ratio: ratio,
            review_quota: review,
            generate_quota: generate,
            ..SchedulerConfig::default()
        })
}

fn repairs(n: usize) -> Vec<WorkItem> {
    (0..n)
        .map(|i| WorkItem {
            class: WorkClass::Repair,
            target: Target::Entry {
                path: format!("repair/{i}.md"),
            },
            label: format!("repair {i}"),
            priority: 90,
            queued_at: Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap(),
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn enough_repairs_crowd_out_everything(
        others in arb_items(),
        budget in 1usize..20,
        extra in 0usize..5,
        config in arb_config(),
    ) {
        let mut candidates = repairs(budget + extra);
        candidates.extend(others);
        let plan = plan(candidates, budget, &Quotas::for_budget(&config, budget));
        prop_assert_eq!(plan.items.len(), budget);
        prop_assert!(plan.items.iter().all(|i| i.class == WorkClass::Repair));
    }

    #[test]
    fn budget_is_never_left_idle(
        candidates in arb_items(),
        budget in 0usize..30,
        config in arb_config(),
    ) {
        let available = candidates.len();
        let plan = plan(candidates, budget, &Quotas::for_budget(&config, budget));
        prop_assert_eq!(plan.items.len(), budget.min(available));
        let counted: usize = plan.counts.values().sum();
        prop_assert_eq!(counted, plan.items.len());
    }

    #[test]
    fn items_come_out_in_class_order(candidates in arb_items(), budget in 0usize..30) {
        let plan = plan(candidates, budget, &Quotas::UNLIMITED);
        for pair in plan.items.windows(2) {
            prop_assert!(pair[0].class <= pair[1].class);
            if pair[0].class == pair[1].class {
                prop_assert!(pair[0].priority >= pair[1].priority);
            }
        }
    }

    #[test]
    fn unlimited_plan_is_strict_priority(candidates in arb_items(), budget in 0usize..30) {
        let plan = plan(candidates.clone(), budget, &Quotas::UNLIMITED);
        // A skipped candidate never outranks a selected one by class.
        if let Some(last) = plan.items.last() {
            let chosen: std::collections::HashSet<&str> =
                plan.items.iter().map(|i| i.target.key()).collect();
            for skipped in candidates.iter().filter(|c| !chosen.contains(c.target.key())) {
                prop_assert!(skipped.class >= last.class);
            }
        }
        prop_assert_eq!(plan.backfilled, 0);
    }
}
