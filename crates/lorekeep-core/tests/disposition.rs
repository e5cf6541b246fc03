//! Approval is the only way into the lore tree, and every approval leaves
//! exactly one approved changelog record behind.

use proptest::prelude::*;

use lorekeep_core::changelog::ChangelogFilter;
use lorekeep_core::ids::{new_id, slugify};
use lorekeep_core::model::{
    ChangeReviewStatus, ConfidenceLevel, EntityCategory, PendingEntry, PendingKind, PendingStatus,
};

mod support;
use support::{Workspace, fixed_now};

fn draft(title: &str, category: EntityCategory) -> PendingEntry {
    PendingEntry {
        id: new_id("pending", fixed_now()),
        kind: PendingKind::NewEntry {
            entity_id: new_id("entity", fixed_now()),
        },
        title: title.to_string(),
        slug: slugify(title),
        category,
        content: format!(
            "---\ntitle: {title}\ncategory: {category}\nconfidence: likely\n---\n# {title}\n\n## Overview\n\nText.\n"
        ),
        citations: vec![],
        confidence: ConfidenceLevel::Likely,
        source_files: vec![],
        connections: vec![],
        status: PendingStatus::Pending,
        version: 0,
        changelog_id: None,
        generated_at: fixed_now(),
        reviewed_at: None,
        reviewed_by: None,
        review_notes: None,
    }
}

fn arb_decisions() -> impl Strategy<Value = Vec<(String, EntityCategory, bool)>> {
    prop::collection::btree_map(
        "[A-Z][a-z]{2,8}( [A-Z][a-z]{2,8})?",
        (prop::sample::select(EntityCategory::ALL.to_vec()), any::<bool>()),
        1..10,
    )
    .prop_map(|m| m.into_iter().map(|(t, (c, a))| (t, c, a)).collect())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn only_approved_drafts_reach_the_tree(decisions in arb_decisions()) {
        let ws = Workspace::new();
        let mut expected = Vec::new();
        for (title, category, approve) in &decisions {
            let added = ws.pending.add(draft(title, *category)).unwrap();
            let path = added.target_path();
            if *approve {
                let published = ws
                    .pending
                    .approve(&added.id, "tester", None, ws.publisher(), fixed_now())
                    .unwrap();
                prop_assert_eq!(&published.path, &path);
                expected.push(path);
            } else {
                ws.pending
                    .reject(&added.id, "tester", Some("no"), ws.publisher(), fixed_now())
                    .unwrap();
                prop_assert!(!ws.tree.exists(&path));
            }
        }

        let snapshot = ws.tree.snapshot().unwrap();
        let mut written: Vec<String> = snapshot.iter().map(|(p, _)| p.to_string()).collect();
        written.sort();
        expected.sort();
        prop_assert_eq!(&written, &expected);

        for path in &expected {
            let filter = ChangelogFilter {
                file: Some(path.clone()),
                statuses: vec![ChangeReviewStatus::Approved],
                ..ChangelogFilter::default()
            };
            prop_assert_eq!(ws.changelog.list(&filter).len(), 1);
        }

        let stats = ws.agent.load().stats;
        let approved = decisions.iter().filter(|d| d.2).count() as u64;
        prop_assert_eq!(stats.entries_approved, approved);
        prop_assert_eq!(stats.entries_rejected, decisions.len() as u64 - approved);
        prop_assert!(ws.pending.list(Some(PendingStatus::Pending)).is_empty());
    }
}
