use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use lorekeep_core::LoreError;
use lorekeep_core::config::{AgentConfig, load_project_config};
use lorekeep_core::storage::keys;
use serde::Serialize;
use tracing::info;

use crate::output::{OutputMode, render};
use crate::project::Project;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Show the agent configuration, or one key of it
    Show(ShowArgs),
    /// Set one agent configuration key
    Set(SetArgs),
    /// Restore one agent configuration key to its default
    Unset(UnsetArgs),
}

#[derive(Args, Debug)]
struct ShowArgs {
    /// Dotted camelCase key (e.g. schedule.maxEntriesPerRun)
    key: Option<String>,

    /// Show the project layout from .lorekeep/config.toml instead
    #[arg(long, conflicts_with = "key")]
    project: bool,
}

#[derive(Args, Debug)]
struct SetArgs {
    /// Dotted camelCase key (e.g. autoApprove.enabled)
    key: String,

    /// New value, parsed as JSON when possible
    value: String,
}

#[derive(Args, Debug)]
struct UnsetArgs {
    key: String,
}

#[derive(Debug, Serialize)]
struct Mutation<'a> {
    action: &'static str,
    key: &'a str,
    value: serde_json::Value,
}

pub fn run_config(args: &ConfigArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    match &args.command {
        ConfigCommand::Show(show) if show.project => {
            let config = load_project_config(project_root)?;
            render(output, &config, |c, w| {
                let text = toml::to_string_pretty(c).map_err(std::io::Error::other)?;
                write!(w, "{text}")
            })
        }
        ConfigCommand::Show(show) => {
            let project = Project::open(project_root)?;
            let doc = serde_json::to_value(&project.config).context("failed to encode config")?;
            let value = match &show.key {
                Some(key) => lookup(&doc, key)?.clone(),
                None => doc,
            };
            render(output, &value, |v, w| {
                let text = serde_json::to_string_pretty(v).map_err(std::io::Error::other)?;
                writeln!(w, "{text}")
            })
        }
        ConfigCommand::Set(set) => {
            let project = Project::open(project_root)?;
            let updated = project
                .config
                .set_path(&set.key, &set.value)
                .map_err(|err| invalid_key(&set.key, &err))?;
            persist(&project, &updated, "set", &set.key, output)
        }
        ConfigCommand::Unset(unset) => {
            let project = Project::open(project_root)?;
            let defaults =
                serde_json::to_value(AgentConfig::default()).context("failed to encode config")?;
            let default = lookup(&defaults, &unset.key)?;
            let updated = project
                .config
                .set_path(&unset.key, &default.to_string())
                .map_err(|err| invalid_key(&unset.key, &err))?;
            persist(&project, &updated, "unset", &unset.key, output)
        }
    }
}

fn lookup<'a>(doc: &'a serde_json::Value, key: &str) -> Result<&'a serde_json::Value, LoreError> {
    key.split('.')
        .try_fold(doc, |node, seg| node.get(seg))
        .ok_or_else(|| LoreError::InvalidValue {
            field: "config key",
            value: key.to_string(),
        })
}

fn invalid_key(key: &str, err: &anyhow::Error) -> anyhow::Error {
    anyhow::Error::new(LoreError::InvalidValue {
        field: "config key",
        value: key.to_string(),
    })
    .context(format!("{err:#}"))
}

fn persist(
    project: &Project,
    updated: &AgentConfig,
    action: &'static str,
    key: &str,
    output: OutputMode,
) -> Result<()> {
    if !updated.save(&project.stores.storage) {
        return Err(LoreError::StorageWrite(keys::AGENT_CONFIG.to_string()).into());
    }
    let doc = serde_json::to_value(updated).context("failed to encode config")?;
    let value = lookup(&doc, key)?.clone();
    info!(key, %value, action, "agent config updated");
    let mutation = Mutation { action, key, value };
    render(output, &mutation, |m, w| writeln!(w, "{} {} = {}", m.action, m.key, m.value))
}
