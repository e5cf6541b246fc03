use std::io::Write;
use std::path::Path;

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use lorekeep_agent::discovery::{DiscoverySettings, discover};
use lorekeep_agent::{AnthropicClient, CancelToken, GenerationClient};
use serde::Serialize;
use tracing::warn;

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use crate::project::Project;

#[derive(Args, Debug)]
pub struct DiscoverArgs {
    /// Sources to scan (default: discovery.maxSources).
    #[arg(long)]
    pub max_sources: Option<usize>,

    /// Use the section heuristic only, never the classifier.
    #[arg(long)]
    pub no_classifier: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DiscoverView {
    sources_scanned: usize,
    candidates: usize,
    classifier_failures: usize,
    added: Vec<String>,
    merged: usize,
    already_published: usize,
    interrupted: bool,
}

pub fn run_discover(args: &DiscoverArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let project = Project::open(project_root)?;
    let pipeline = project.pipeline();
    let mut settings = DiscoverySettings::from_config(&project.config);
    if let Some(max) = args.max_sources {
        settings.max_sources = max;
    }
    settings.use_classifier &= !args.no_classifier;

    let client = if settings.use_classifier {
        match AnthropicClient::from_env(&project.config.ai) {
            Ok(client) => Some(client),
            Err(err) => {
                warn!(%err, "classifier unavailable, using heuristic");
                None
            }
        }
    } else {
        None
    };

    let now = Utc::now();
    let library = pipeline.load_library();
    let published = project.stores.tree.snapshot()?.published_names();
    let report = discover(
        &library,
        client.as_ref().map(|c| c as &dyn GenerationClient),
        &project.stores.discovery,
        &published,
        &settings,
        &pipeline.budget(CancelToken::new()),
        now,
    )?;

    let names: Vec<String> = report
        .added
        .added
        .iter()
        .filter_map(|id| project.stores.discovery.get(id))
        .map(|e| e.name)
        .collect();
    let view = DiscoverView {
        sources_scanned: report.sources_scanned,
        candidates: report.candidates,
        classifier_failures: report.classifier_failures,
        added: names,
        merged: report.added.merged,
        already_published: report.added.already_published,
        interrupted: report.interrupted,
    };

    render_mode(
        output,
        &view,
        |v, w| {
            for name in &v.added {
                writeln!(w, "{name}")?;
            }
            Ok(())
        },
        |v, w| {
            pretty_section(w, "Discovery")?;
            pretty_kv(w, "Sources", v.sources_scanned.to_string())?;
            pretty_kv(w, "Candidates", v.candidates.to_string())?;
            pretty_kv(w, "Added", v.added.len().to_string())?;
            pretty_kv(w, "Merged", v.merged.to_string())?;
            pretty_kv(w, "Published", v.already_published.to_string())?;
            if v.classifier_failures > 0 {
                pretty_kv(w, "Heuristic", format!("{} fallback(s)", v.classifier_failures))?;
            }
            for name in &v.added {
                writeln!(w, "  + {name}")?;
            }
            Ok(())
        },
    )
}
