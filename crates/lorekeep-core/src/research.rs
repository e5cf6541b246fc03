//! Research tasks: scheduled investigation separate from discovery.
//!
//! A task runs once, produces findings and optionally a suggested entry, and
//! then waits in `needs_review`. Approving it goes through
//! [`PendingEntries::approve`] like any other draft.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::error::LoreError;
use crate::ids::{new_id, slugify};
use crate::lore::{Frontmatter, frontmatter};
use crate::model::research::{ResearchFindings, SuggestedEntry};
use crate::model::{
    PendingEntry, PendingKind, PendingStatus, ResearchSession, ResearchTask, TaskStatus, TaskType,
};
use crate::pending::{PendingEntries, Published, Publisher};
use crate::storage::{Storage, keys};

/// Sessions kept in the log.
pub const SESSION_LOG_LIMIT: usize = 100;

/// Input for [`ResearchQueue::add`].
#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_type: TaskType,
    pub topic: String,
    pub description: String,
    pub priority: u8,
    pub target_file: Option<String>,
}

impl NewTask {
    #[must_use]
    pub fn new(task_type: TaskType, topic: impl Into<String>) -> Self {
        Self {
            task_type,
            topic: topic.into(),
            description: String::new(),
            priority: 5,
            target_file: None,
        }
    }
}

/// Persisted research queue and session log.
#[derive(Debug, Clone)]
pub struct ResearchQueue {
    storage: Storage,
}

impl ResearchQueue {
    #[must_use]
    pub const fn new(storage: Storage) -> Self {
        Self { storage }
    }

    #[must_use]
    pub fn tasks(&self) -> Vec<ResearchTask> {
        self.storage.get_or_default(keys::RESEARCH_QUEUE)
    }

    fn save(&self, tasks: &[ResearchTask]) -> Result<(), LoreError> {
        if self.storage.set(keys::RESEARCH_QUEUE, tasks) {
            Ok(())
        } else {
            Err(LoreError::StorageWrite(keys::RESEARCH_QUEUE.to_string()))
        }
    }

    pub fn get(&self, id: &str) -> Result<ResearchTask, LoreError> {
        self.tasks()
            .into_iter()
            .find(|t| t.id == id)
            .ok_or_else(|| LoreError::not_found("research task", id))
    }

    /// Tasks with the given status (all when `None`), highest priority first,
    /// oldest first on ties.
    #[must_use]
    pub fn list(&self, status: Option<TaskStatus>) -> Vec<ResearchTask> {
        let mut tasks: Vec<ResearchTask> = self
            .tasks()
            .into_iter()
            .filter(|t| status.is_none_or(|s| t.status == s))
            .collect();
        tasks.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        tasks
    }

    /// Queue a task. Priority is clamped to `1..=10`.
    pub fn add(&self, task: NewTask, now: DateTime<Utc>) -> Result<ResearchTask, LoreError> {
        let created = ResearchTask {
            id: new_id("research", now),
            task_type: task.task_type,
            status: TaskStatus::Queued,
            topic: task.topic,
            description: task.description,
            priority: task.priority.clamp(1, 10),
            target_file: task.target_file,
            findings: None,
            suggested_entry: None,
            error: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            reviewed_by: None,
        };
        let mut tasks = self.tasks();
        tasks.push(created.clone());
        self.save(&tasks)?;
        info!(id = %created.id, topic = %created.topic, kind = %created.task_type, "research task queued");
        Ok(created)
    }

    /// Move the most urgent queued task to `in_progress`.
    pub fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<ResearchTask>, LoreError> {
        let Some(next) = self.list(Some(TaskStatus::Queued)).into_iter().next() else {
            return Ok(None);
        };
        self.transition(&next.id, TaskStatus::InProgress, |task| {
            task.started_at = Some(now);
            task.error = None;
        })
        .map(Some)
    }

    /// Record findings. A task with a suggested entry waits for review;
    /// one without is simply completed.
    pub fn complete(
        &self,
        id: &str,
        findings: ResearchFindings,
        suggested: Option<SuggestedEntry>,
        now: DateTime<Utc>,
    ) -> Result<ResearchTask, LoreError> {
        let target = if suggested.is_some() {
            TaskStatus::NeedsReview
        } else {
            TaskStatus::Completed
        };
        self.transition(id, target, |task| {
            task.findings = Some(findings);
            task.suggested_entry = suggested;
            task.completed_at = Some(now);
        })
    }

    pub fn fail(&self, id: &str, error: &str, now: DateTime<Utc>) -> Result<ResearchTask, LoreError> {
        self.transition(id, TaskStatus::Failed, |task| {
            task.error = Some(error.to_string());
            task.completed_at = Some(now);
        })
    }

    /// Put a failed task back in the queue.
    pub fn retry(&self, id: &str) -> Result<ResearchTask, LoreError> {
        self.transition(id, TaskStatus::Queued, |task| {
            task.started_at = None;
            task.completed_at = None;
        })
    }

    /// Approve a task's suggested entry and publish it.
    ///
    /// The suggestion becomes a research draft which is approved through
    /// [`PendingEntries::approve`], so the lore tree is only ever written
    /// by that one path.
    pub fn approve(
        &self,
        id: &str,
        reviewer: &str,
        pending: &PendingEntries,
        publisher: Publisher<'_>,
        now: DateTime<Utc>,
    ) -> Result<Published, LoreError> {
        let task = self.get(id)?;
        let suggested = match (&task.status, &task.suggested_entry) {
            (TaskStatus::NeedsReview, Some(suggested)) => suggested.clone(),
            _ => {
                return Err(LoreError::InvalidTransition {
                    id: id.to_string(),
                    from: task.status.to_string(),
                    to: TaskStatus::Approved.to_string(),
                });
            }
        };

        let draft = pending.add(research_draft(&task, &suggested, now))?;
        let published = pending.approve(&draft.id, reviewer, None, publisher, now)?;
        self.transition(id, TaskStatus::Approved, |t| {
            t.reviewed_by = Some(reviewer.to_string());
        })?;
        info!(id, path = %published.path, reviewer, "research suggestion published");
        Ok(published)
    }

    pub fn reject(&self, id: &str, reviewer: &str) -> Result<ResearchTask, LoreError> {
        self.transition(id, TaskStatus::Rejected, |t| {
            t.reviewed_by = Some(reviewer.to_string());
        })
    }

    /// Drop finished tasks (approved, rejected, completed) older than
    /// `max_age`. Returns how many were removed.
    pub fn cleanup(&self, max_age: Duration, now: DateTime<Utc>) -> Result<usize, LoreError> {
        let cutoff = now - max_age;
        let mut tasks = self.tasks();
        let before = tasks.len();
        tasks.retain(|t| {
            let finished = matches!(
                t.status,
                TaskStatus::Approved | TaskStatus::Rejected | TaskStatus::Completed
            );
            !(finished && t.completed_at.unwrap_or(t.created_at) < cutoff)
        });
        let removed = before - tasks.len();
        if removed > 0 {
            self.save(&tasks)?;
            debug!(removed, "research tasks cleaned up");
        }
        Ok(removed)
    }

    /// Session log, newest first.
    #[must_use]
    pub fn sessions(&self) -> Vec<ResearchSession> {
        self.storage.get_or_default(keys::RESEARCH_SESSIONS)
    }

    /// Prepend a session, keeping the newest [`SESSION_LOG_LIMIT`].
    pub fn record_session(&self, session: ResearchSession) -> Result<(), LoreError> {
        let mut sessions = self.sessions();
        sessions.insert(0, session);
        sessions.truncate(SESSION_LOG_LIMIT);
        if self.storage.set(keys::RESEARCH_SESSIONS, &sessions) {
            Ok(())
        } else {
            Err(LoreError::StorageWrite(keys::RESEARCH_SESSIONS.to_string()))
        }
    }

    fn transition(
        &self,
        id: &str,
        target: TaskStatus,
        apply: impl FnOnce(&mut ResearchTask),
    ) -> Result<ResearchTask, LoreError> {
        let mut tasks = self.tasks();
        let task = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| LoreError::not_found("research task", id))?;
        if !task.status.can_transition_to(target) {
            return Err(LoreError::InvalidTransition {
                id: id.to_string(),
                from: task.status.to_string(),
                to: target.to_string(),
            });
        }
        let from = task.status;
        task.status = target;
        apply(task);
        let updated = task.clone();
        self.save(&tasks)?;
        debug!(id, %from, to = %target, "research task moved");
        Ok(updated)
    }
}

fn research_draft(task: &ResearchTask, suggested: &SuggestedEntry, now: DateTime<Utc>) -> PendingEntry {
    let content = if frontmatter::split(&suggested.content).is_some() {
        suggested.content.clone()
    } else {
        Frontmatter::for_entry(
            &suggested.title,
            suggested.category,
            suggested.confidence,
            now.date_naive(),
        )
        .render(&suggested.content)
    };
    let findings = task.findings.clone().unwrap_or_default();
    PendingEntry {
        id: new_id("pending", now),
        kind: PendingKind::Research {
            task_id: task.id.clone(),
        },
        title: suggested.title.clone(),
        slug: slugify(&suggested.title),
        category: suggested.category,
        content,
        citations: Vec::new(),
        confidence: suggested.confidence,
        source_files: findings.sources,
        connections: findings.connections,
        status: PendingStatus::Pending,
        version: 0,
        changelog_id: None,
        generated_at: now,
        reviewed_at: None,
        reviewed_by: None,
        review_notes: None,
    }
}
