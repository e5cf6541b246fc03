//! Shared generators and fixtures for lorekeep-core integration tests.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

use lorekeep_core::changelog::Changelog;
use lorekeep_core::config::ChangelogConfig;
use lorekeep_core::lore::LoreTree;
use lorekeep_core::pending::{PendingEntries, Publisher};
use lorekeep_core::state::AgentStateMachine;
use lorekeep_core::storage::{FileBackend, Storage};

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap()
}

/// Data dir and lore root in one tempdir.
pub struct Workspace {
    pub dir: tempfile::TempDir,
    pub storage: Storage,
    pub tree: LoreTree,
    pub changelog: Changelog,
    pub agent: AgentStateMachine,
    pub pending: PendingEntries,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(FileBackend::new(&dir.path().join("data")));
        Self {
            tree: LoreTree::new(&dir.path().join("lore"), &[]),
            changelog: Changelog::new(storage.clone(), ChangelogConfig::default()),
            agent: AgentStateMachine::new(storage.clone(), 60),
            pending: PendingEntries::new(storage.clone()),
            storage,
            dir,
        }
    }

    pub fn publisher(&self) -> Publisher<'_> {
        Publisher {
            tree: &self.tree,
            changelog: &self.changelog,
            agent: &self.agent,
        }
    }
}

pub fn arb_name() -> impl Strategy<Value = String> {
    prop::sample::select(vec![
        "Gorm", "Phoenix", "Silver City", "Ember Court", "Ash Wyrm", "Moss Troll", "Glass Road",
    ])
    .prop_map(str::to_string)
}

pub fn arb_category_dir() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["monsters", "locations", "factions", "characters"])
}

/// Markdown body fragments: prose, citations, links in every style.
pub fn arb_fragment() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z ]{10,80}".prop_map(|s| format!("{s}.")),
        arb_name().prop_map(|n| format!("See [[{n}]].")),
        arb_name().prop_map(|n| format!("Allied with [{n}].")),
        arb_name().prop_map(|n| format!("[{n}](../monsters/{}.md)", n.to_lowercase().replace(' ', "-"))),
        Just("It has 40 hit points [400-404].".to_string()),
        Just("`[not a link]`".to_string()),
        Just("## Overview".to_string()),
    ]
}

/// A whole entry, sometimes without frontmatter.
pub fn arb_entry() -> impl Strategy<Value = String> {
    (
        arb_name(),
        prop::bool::weighted(0.8),
        prop::sample::select(vec!["confirmed", "likely", "speculative", "certain"]),
        prop::option::of(prop::sample::select(vec!["2024-06-01", "2022-01-01"])),
        prop::collection::vec(arb_fragment(), 0..12),
    )
        .prop_map(|(name, with_fm, confidence, updated, fragments)| {
            let mut out = String::new();
            if with_fm {
                out.push_str(&format!("---\ntitle: {name}\nconfidence: {confidence}\n"));
                if let Some(date) = updated {
                    out.push_str(&format!("lastUpdated: {date}\n"));
                }
                out.push_str("---\n");
            }
            out.push_str(&format!("# {name}\n\n"));
            out.push_str(&fragments.join("\n\n"));
            out.push('\n');
            out
        })
}

/// A small lore tree as (relative path, content) pairs.
pub fn arb_tree() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::vec((arb_category_dir(), arb_name(), arb_entry()), 1..8).prop_map(|docs| {
        docs.into_iter()
            .map(|(dir, name, body)| {
                (
                    format!("{dir}/{}.md", name.to_lowercase().replace(' ', "-")),
                    body,
                )
            })
            .collect()
    })
}
