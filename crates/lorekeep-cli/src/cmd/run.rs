use std::env;
use std::path::Path;

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use lorekeep_agent::{AnthropicClient, CancelToken, RunReport, RunSummary};

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use crate::project::Project;

const SECRET_VAR: &str = "CRON_SECRET";

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Bearer token, checked when CRON_SECRET is configured.
    #[arg(long, value_name = "HEADER")]
    pub authorization: Option<String>,

    /// Override schedule.maxEntriesPerRun for this run.
    #[arg(long)]
    pub max_entries: Option<usize>,
}

/// The trigger did not present the configured secret.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("missing or invalid authorization")]
pub struct Unauthorized;

/// Accept when no secret is configured, otherwise require `Bearer <secret>`.
pub fn authorize(secret: Option<&str>, header: Option<&str>) -> Result<(), Unauthorized> {
    let Some(secret) = secret.filter(|s| !s.is_empty()) else {
        return Ok(());
    };
    match header.and_then(|h| h.strip_prefix("Bearer ")) {
        Some(token) if token == secret => Ok(()),
        _ => Err(Unauthorized),
    }
}

pub fn run_run(args: &RunArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let secret = env::var(SECRET_VAR).ok();
    authorize(secret.as_deref(), args.authorization.as_deref())?;

    let mut project = Project::open(project_root)?;
    if let Some(max) = args.max_entries {
        project.config.schedule.max_entries_per_run = max;
    }
    // fail before the gate is taken
    let client = AnthropicClient::from_env(&project.config.ai)?;

    let pipeline = project.pipeline();
    let budget = pipeline.budget(CancelToken::new());
    let report = pipeline.run(&client, &budget, Utc::now())?;

    render_mode(
        output,
        &report,
        |r, w| match r {
            RunReport::Skipped { reason } => writeln!(w, "skipped\t{reason}"),
            RunReport::Finished(s) => writeln!(
                w,
                "{}\t{}\tdiscovered={}\tgenerated={}\treviewed={}\texpanded={}\trefreshed={}\terrors={}",
                s.log.id,
                s.outcome,
                s.log.entities_discovered,
                s.log.entries_generated,
                s.log.entries_reviewed,
                s.log.entries_expanded,
                s.log.entries_refreshed,
                s.log.errors.len()
            ),
        },
        |r, w| match r {
            RunReport::Skipped { reason } => writeln!(w, "Run skipped: {reason}"),
            RunReport::Finished(s) => pretty_summary(s, w),
        },
    )
}

fn pretty_summary(s: &RunSummary, w: &mut dyn std::io::Write) -> std::io::Result<()> {
    pretty_section(w, &format!("Run {}", s.log.id))?;
    pretty_kv(w, "Outcome", s.outcome.to_string())?;
    pretty_kv(w, "Duration", format!("{} ms", s.log.duration_ms))?;
    if let Some(stopped) = s.stopped {
        pretty_kv(w, "Stopped", format!("{stopped:?}"))?;
    }
    pretty_kv(w, "Discovered", s.log.entities_discovered.to_string())?;
    pretty_kv(w, "Generated", s.log.entries_generated.to_string())?;
    pretty_kv(w, "Reviewed", s.log.entries_reviewed.to_string())?;
    pretty_kv(w, "Expanded", s.log.entries_expanded.to_string())?;
    pretty_kv(w, "Refreshed", s.log.entries_refreshed.to_string())?;
    if s.requeued > 0 {
        pretty_kv(w, "Requeued", s.requeued.to_string())?;
    }
    if s.skipped > 0 {
        pretty_kv(w, "Skipped", format!("{} (draft awaiting review)", s.skipped))?;
    }
    let planned = s
        .planned
        .iter()
        .map(|(class, n)| format!("{class}={n}"))
        .collect::<Vec<_>>()
        .join(" ");
    pretty_kv(w, "Planned", if planned.is_empty() { "-".into() } else { planned })?;
    for err in &s.log.errors {
        writeln!(w, "  ! {err}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_secret_accepts_anything() {
        assert!(authorize(None, None).is_ok());
        assert!(authorize(Some(""), Some("junk")).is_ok());
    }

    #[test]
    fn secret_requires_matching_bearer() {
        assert!(authorize(Some("s3cret"), Some("Bearer s3cret")).is_ok());
        assert_eq!(authorize(Some("s3cret"), Some("Bearer nope")), Err(Unauthorized));
        assert_eq!(authorize(Some("s3cret"), Some("s3cret")), Err(Unauthorized));
        assert_eq!(authorize(Some("s3cret"), None), Err(Unauthorized));
        assert_eq!(Unauthorized.to_string(), "missing or invalid authorization");
    }
}
