//! Entities discovered in source material, waiting for entry generation.
//!
//! Each entity is generated at most once: [`DiscoveryQueue::claim`] moves it
//! `queued -> processing` before any external call, and only
//! [`DiscoveryQueue::mark_done`] finishes it. A failure puts it back to
//! `queued` for a later run.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::LoreError;
use crate::ids::{new_id, normalize_name};
use crate::model::{DiscoveredEntity, EntityCategory, EntityStatus};
use crate::storage::{Storage, keys};

/// A discovery result before it is queued.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub name: String,
    pub category: EntityCategory,
    pub sources: Vec<String>,
    pub confidence: f64,
    pub priority: u32,
    pub description: String,
}

/// What [`DiscoveryQueue::add`] did with a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddReport {
    pub added: Vec<String>,
    /// Candidates folded into an existing queue entry.
    pub merged: usize,
    /// Candidates that already have a published entry.
    pub already_published: usize,
}

/// Persisted list of [`DiscoveredEntity`] records.
#[derive(Debug, Clone)]
pub struct DiscoveryQueue {
    storage: Storage,
}

impl DiscoveryQueue {
    #[must_use]
    pub const fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Every entity ever queued, in insertion order.
    #[must_use]
    pub fn list(&self) -> Vec<DiscoveredEntity> {
        self.storage.get_or_default(keys::DISCOVERY_QUEUE)
    }

    fn save(&self, entities: &[DiscoveredEntity]) -> Result<(), LoreError> {
        if self.storage.set(keys::DISCOVERY_QUEUE, entities) {
            Ok(())
        } else {
            Err(LoreError::StorageWrite(keys::DISCOVERY_QUEUE.to_string()))
        }
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<DiscoveredEntity> {
        self.list().into_iter().find(|e| e.id == id)
    }

    /// Queued entities, highest priority first, oldest first on ties.
    #[must_use]
    pub fn queued(&self) -> Vec<DiscoveredEntity> {
        let mut queued: Vec<DiscoveredEntity> = self
            .list()
            .into_iter()
            .filter(|e| e.status == EntityStatus::Queued)
            .collect();
        queued.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.discovered_at.cmp(&b.discovered_at))
        });
        queued
    }

    /// Count of entities per status.
    #[must_use]
    pub fn stats(&self) -> BTreeMap<EntityStatus, usize> {
        let mut counts = BTreeMap::new();
        for entity in self.list() {
            *counts.entry(entity.status).or_insert(0) += 1;
        }
        counts
    }

    /// Queue new candidates.
    ///
    /// Names are compared after normalization. A candidate matching a
    /// published entry is dropped; one matching a queued entity merges its
    /// sources into it (raising priority by one per new source).
    pub fn add(
        &self,
        candidates: Vec<Candidate>,
        published: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> Result<AddReport, LoreError> {
        let mut entities = self.list();
        let mut report = AddReport::default();

        for candidate in candidates {
            let key = normalize_name(&candidate.name);
            if key.is_empty() {
                continue;
            }
            if published.contains(&key) {
                report.already_published += 1;
                continue;
            }
            if let Some(existing) = entities.iter_mut().find(|e| normalize_name(&e.name) == key) {
                let mut fresh = 0;
                for source in candidate.sources {
                    if !existing.sources.contains(&source) {
                        existing.sources.push(source);
                        fresh += 1;
                    }
                }
                if existing.status == EntityStatus::Queued {
                    existing.priority += fresh;
                }
                existing.confidence = existing.confidence.max(candidate.confidence);
                if existing.description.is_empty() {
                    existing.description = candidate.description;
                }
                report.merged += 1;
                continue;
            }

            let id = new_id("entity", now);
            debug!(name = %candidate.name, category = %candidate.category, "queued entity");
            report.added.push(id.clone());
            entities.push(DiscoveredEntity {
                id,
                name: candidate.name,
                category: candidate.category,
                sources: candidate.sources,
                confidence: candidate.confidence.clamp(0.0, 1.0),
                priority: candidate.priority,
                description: candidate.description,
                status: EntityStatus::Queued,
                discovered_at: now,
                processed_at: None,
                pending_entry_id: None,
                attempts: 0,
            });
        }

        self.save(&entities)?;
        info!(
            added = report.added.len(),
            merged = report.merged,
            already_published = report.already_published,
            "discovery queue updated"
        );
        Ok(report)
    }

    fn transition(
        &self,
        id: &str,
        target: EntityStatus,
        apply: impl FnOnce(&mut DiscoveredEntity),
    ) -> Result<DiscoveredEntity, LoreError> {
        let mut entities = self.list();
        let entity = entities
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| LoreError::not_found("entity", id))?;
        if !entity.status.can_transition_to(target) {
            return Err(LoreError::InvalidTransition {
                id: id.to_string(),
                from: entity.status.to_string(),
                to: target.to_string(),
            });
        }
        entity.status = target;
        apply(entity);
        let updated = entity.clone();
        self.save(&entities)?;
        Ok(updated)
    }

    /// Check-and-set `queued -> processing`. Fails with
    /// [`LoreError::InvalidTransition`] if another caller got there first.
    pub fn claim(&self, id: &str) -> Result<DiscoveredEntity, LoreError> {
        self.transition(id, EntityStatus::Processing, |e| e.attempts += 1)
    }

    /// Claim the highest-priority queued entity, if any.
    pub fn claim_next(&self) -> Result<Option<DiscoveredEntity>, LoreError> {
        match self.queued().first() {
            Some(next) => self.claim(&next.id).map(Some),
            None => Ok(None),
        }
    }

    /// `processing -> done`, linking the generated draft.
    pub fn mark_done(
        &self,
        id: &str,
        pending_entry_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DiscoveredEntity, LoreError> {
        self.transition(id, EntityStatus::Done, |e| {
            e.processed_at = Some(now);
            e.pending_entry_id = Some(pending_entry_id.to_string());
        })
    }

    /// `processing -> queued` after a failed generation.
    pub fn mark_failed(&self, id: &str, reason: &str) -> Result<DiscoveredEntity, LoreError> {
        warn!(entity = id, reason, "generation failed, entity requeued");
        self.transition(id, EntityStatus::Queued, |_| {})
    }

    /// Drop an entity from consideration.
    pub fn reject(&self, id: &str, now: DateTime<Utc>) -> Result<DiscoveredEntity, LoreError> {
        self.transition(id, EntityStatus::Rejected, |e| e.processed_at = Some(now))
    }

    /// Return every `processing` entity to `queued`.
    ///
    /// Called at run start, when the run gate guarantees no other run is
    /// generating.
    pub fn reset_orphaned(&self) -> Result<usize, LoreError> {
        let mut entities = self.list();
        let mut reset = 0;
        for entity in &mut entities {
            if entity.status == EntityStatus::Processing {
                entity.status = EntityStatus::Queued;
                reset += 1;
            }
        }
        if reset > 0 {
            self.save(&entities)?;
            warn!(count = reset, "requeued entities orphaned by an interrupted run");
        }
        Ok(reset)
    }
}
