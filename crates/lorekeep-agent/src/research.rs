//! Research runner.
//!
//! Drains up to a few tasks from the research queue per invocation. Each
//! task is answered by the service from the relevant sources; findings are
//! stored on the task, and a suggested entry sends it to review. Suggested
//! entries never claim more confidence than their weakest source.

use std::fmt::Write as _;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use lorekeep_core::ids::new_id;
use lorekeep_core::model::research::{ResearchFindings, SuggestedEntry};
use lorekeep_core::model::{ConfidenceLevel, ResearchSession, ResearchTask, TaskType};

use crate::client::{CompletionRequest, parse_object};
use crate::context::{Stage, stamp};
use crate::discovery::guess_category;
use crate::error::AgentError;
use crate::sources::{Excerpt, weakest_confidence};

/// Tasks processed per invocation unless told otherwise.
pub const DEFAULT_MAX_TASKS: usize = 3;
const RESEARCH_SOURCES: usize = 5;
const EXCERPT_CHARS: usize = 1500;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ResearchReply {
    summary: String,
    facts: Vec<String>,
    connections: Vec<String>,
    sources: Vec<String>,
    suggested_entry: Option<Suggestion>,
}

#[derive(Debug, Deserialize)]
struct Suggestion {
    #[serde(default)]
    title: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    confidence: Option<String>,
}

/// Process up to `max_tasks` queued tasks and log the session.
///
/// Task-level failures mark the task failed and move on. A cancellation
/// or exhausted budget ends the session early; a task interrupted mid-call
/// is marked failed so it can be retried.
#[instrument(skip(stage, now))]
pub fn run_research(
    stage: Stage<'_>,
    max_tasks: usize,
    now: DateTime<Utc>,
) -> Result<ResearchSession, AgentError> {
    let started = Instant::now();
    let mut session = ResearchSession {
        id: new_id("session", now),
        started_at: now,
        completed_at: now,
        tasks_processed: 0,
        tasks_failed: 0,
        task_ids: Vec::new(),
    };

    let result = drain(stage, max_tasks, &mut session, now, started);
    session.completed_at = stamp(now, started);
    stage.stores.research.record_session(session.clone())?;
    info!(
        session = %session.id,
        processed = session.tasks_processed,
        failed = session.tasks_failed,
        "research session finished"
    );
    result.map(|()| session)
}

fn drain(
    stage: Stage<'_>,
    max_tasks: usize,
    session: &mut ResearchSession,
    now: DateTime<Utc>,
    started: Instant,
) -> Result<(), AgentError> {
    let delay = Duration::from_millis(stage.config.schedule.api_delay_ms);
    for n in 0..max_tasks {
        let wait = if n > 0 { delay } else { Duration::ZERO };
        if let Err(err) = stage.budget.sleep(wait) {
            debug!(%err, "research interrupted");
            return Ok(());
        }
        let at = stamp(now, started);
        let Some(task) = stage.stores.research.claim_next(at)? else {
            return Ok(());
        };
        session.task_ids.push(task.id.clone());

        match research_task(stage, &task) {
            Ok((findings, suggested)) => {
                let review = suggested.is_some();
                stage
                    .stores
                    .research
                    .complete(&task.id, findings, suggested, stamp(now, started))?;
                session.tasks_processed += 1;
                debug!(task = %task.id, review, "research task completed");
            }
            Err(err) => {
                warn!(task = %task.id, error = %err, "research task failed");
                stage
                    .stores
                    .research
                    .fail(&task.id, &err.to_string(), stamp(now, started))?;
                session.tasks_failed += 1;
                if err.is_interrupt() {
                    return Ok(());
                }
                if !err.is_item_failure() {
                    return Err(err);
                }
            }
        }
    }
    Ok(())
}

fn research_task(
    stage: Stage<'_>,
    task: &ResearchTask,
) -> Result<(ResearchFindings, Option<SuggestedEntry>), AgentError> {
    let excerpts = stage.library.relevant(&task.topic, RESEARCH_SOURCES);
    let current = task
        .target_file
        .as_deref()
        .and_then(|path| stage.stores.tree.read(path).ok());
    let prompt = research_prompt(task, &excerpts, current.as_deref());
    let reply = stage
        .client
        .complete(&CompletionRequest::new(prompt, &stage.config.ai), stage.budget)?;
    let parsed: ResearchReply = parse_object(&reply)?;

    let cap = weakest_confidence(&excerpts);
    let suggested = parsed
        .suggested_entry
        .filter(|s| !s.title.trim().is_empty() && !s.content.trim().is_empty())
        .map(|s| suggestion(s, cap));
    let sources = if parsed.sources.is_empty() {
        excerpts.iter().map(|e| e.doc.path.clone()).collect()
    } else {
        parsed.sources
    };

    Ok((
        ResearchFindings {
            summary: parsed.summary,
            facts: parsed.facts,
            connections: parsed.connections,
            sources,
        },
        suggested,
    ))
}

fn suggestion(s: Suggestion, cap: ConfidenceLevel) -> SuggestedEntry {
    let title = s.title.trim().to_string();
    let category = s
        .category
        .parse()
        .unwrap_or_else(|_| guess_category(None, &title, &s.content));
    let confidence = s
        .confidence
        .and_then(|c| c.parse::<ConfidenceLevel>().ok())
        .map_or(cap, |c| c.min(cap));
    SuggestedEntry {
        title,
        category,
        content: s.content,
        confidence,
    }
}

fn task_instruction(task_type: TaskType) -> &'static str {
    match task_type {
        TaskType::ExploreTopic => "Explore this topic and gather what the sources establish.",
        TaskType::ExpandEntry => "Find material that would deepen the existing entry.",
        TaskType::VerifyFacts => "Check the existing entry's claims against the sources.",
        TaskType::FindConnections => "Find how this topic relates to other entities.",
        TaskType::UpdateCitations => "Match the existing entry's claims to specific sources.",
        TaskType::WebResearch => "Summarize what is publicly known about this topic.",
        TaskType::CreateEntry => "Gather enough material to write a new entry.",
    }
}

fn research_prompt(task: &ResearchTask, excerpts: &[Excerpt<'_>], current: Option<&str>) -> String {
    let mut out = format!(
        "Research task ({kind}): {topic}\n{instruction}\n",
        kind = task.task_type,
        topic = task.topic,
        instruction = task_instruction(task.task_type),
    );
    if !task.description.is_empty() {
        let _ = writeln!(out, "Details: {}", task.description);
    }
    out.push('\n');
    if let Some(current) = current {
        let _ = write!(out, "EXISTING ENTRY:\n\n{current}\n\n");
    }
    if !excerpts.is_empty() {
        out.push_str("SOURCES:\n\n");
        for excerpt in excerpts {
            let section: String = excerpt.section.chars().take(EXCERPT_CHARS).collect();
            let _ = write!(
                out,
                "### {} [{}] ({})\n{}\n\n",
                excerpt.doc.title, excerpt.doc.path, excerpt.doc.kind, section
            );
        }
    }
    out.push_str(
        "Return only a JSON object:\n\
         {\"summary\": \"...\", \"facts\": [\"...\"], \"connections\": [\"entity names\"], \
         \"sources\": [\"source paths used\"], \"suggestedEntry\": null or \
         {\"title\": \"...\", \"category\": \"monster|character|faction|location|concept|item|event\", \
         \"content\": \"full markdown entry\", \"confidence\": \"confirmed|likely|speculative\"}}",
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::client::ScriptedClient;
    use crate::error::ExternalError;
    use crate::fixtures::{Fixture, now};
    use lorekeep_core::model::{EntityCategory, TaskStatus};
    use lorekeep_core::research::NewTask;

    fn queue(fx: &Fixture, topic: &str) -> String {
        fx.stores
            .research
            .add(NewTask::new(TaskType::ExploreTopic, topic), now())
            .unwrap()
            .id
    }

    #[test]
    fn findings_and_capped_suggestion() {
        let fx = Fixture::silver_city();
        let explore = queue(&fx, "Silver City");
        let client = ScriptedClient::new().reply(
            r##"{"summary": "A ruined settlement.", "facts": ["Lanterns never go out"],
                "connections": ["The Watcher"],
                "suggestedEntry": {"title": "Silver City", "category": "location",
                                   "content": "# Silver City\n\nA ruin.", "confidence": "confirmed"}}"##,
        );

        let session = run_research(fx.stage(&client), DEFAULT_MAX_TASKS, now()).unwrap();
        assert_eq!(session.tasks_processed, 1);
        assert_eq!(session.tasks_failed, 0);
        assert_eq!(session.task_ids, vec![explore.clone()]);

        let task = fx.stores.research.get(&explore).unwrap();
        assert_eq!(task.status, TaskStatus::NeedsReview);
        let findings = task.findings.unwrap();
        assert_eq!(findings.facts, vec!["Lanterns never go out"]);
        assert_eq!(
            findings.sources,
            vec!["shop/silver-city.txt", "community/theories.md"]
        );
        let suggested = task.suggested_entry.unwrap();
        assert_eq!(suggested.category, EntityCategory::Location);
        // a community source contributed
        assert_eq!(suggested.confidence, ConfidenceLevel::Speculative);

        assert_eq!(fx.stores.research.sessions().len(), 1);
    }

    #[test]
    fn failed_task_does_not_stop_session() {
        let fx = Fixture::silver_city();
        let first = queue(&fx, "Silver City");
        let second = queue(&fx, "Gilded Lion");
        let client = ScriptedClient::new()
            .reply("no idea")
            .reply(r#"{"summary": "A golden lion."}"#);

        let session = run_research(fx.stage(&client), DEFAULT_MAX_TASKS, now()).unwrap();
        assert_eq!(session.tasks_processed, 1);
        assert_eq!(session.tasks_failed, 1);

        let statuses: Vec<TaskStatus> = [&first, &second]
            .iter()
            .map(|id| fx.stores.research.get(id).unwrap().status)
            .collect();
        assert!(statuses.contains(&TaskStatus::Failed));
        assert!(statuses.contains(&TaskStatus::Completed));
    }

    #[test]
    fn cancelled_session_claims_nothing() {
        let fx = Fixture::silver_city();
        let id = queue(&fx, "Silver City");
        let token = CancelToken::new();
        token.cancel();
        let budget = crate::cancel::RunBudget::unlimited(token);
        let client = ScriptedClient::new().reply("{}");
        let stage = Stage {
            budget: &budget,
            ..fx.stage(&client)
        };

        let session = run_research(stage, DEFAULT_MAX_TASKS, now()).unwrap();
        assert_eq!(session.tasks_processed, 0);
        assert_eq!(session.tasks_failed, 0);
        assert_eq!(fx.stores.research.get(&id).unwrap().status, TaskStatus::Queued);
        assert_eq!(client.remaining(), 1);
    }

    #[test]
    fn service_error_fails_task() {
        let fx = Fixture::silver_city();
        let id = queue(&fx, "Silver City");
        let client = ScriptedClient::new().fail(ExternalError::Status {
            status: 401,
            body: "invalid x-api-key".into(),
        });

        let session = run_research(fx.stage(&client), 1, now()).unwrap();
        assert_eq!(session.tasks_failed, 1);
        let task = fx.stores.research.get(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().contains("401"));
    }

    #[test]
    fn empty_queue_records_empty_session() {
        let fx = Fixture::silver_city();
        let client = ScriptedClient::new();
        let session = run_research(fx.stage(&client), DEFAULT_MAX_TASKS, now()).unwrap();
        assert!(session.task_ids.is_empty());
        assert_eq!(fx.stores.research.sessions().len(), 1);
    }
}
