//! Entry generation.
//!
//! One queued entity becomes one pending draft: the entity is claimed, its
//! best sources are cited and handed to the text-generation service along
//! with any images matched by name, and the reply is composed into a markdown
//! entry with frontmatter. The draft and
//! its changelog entry are written before the entity is marked done. Any
//! failure returns the entity to the queue.

use std::fmt::Write as _;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tracing::{info, instrument, warn};

use lorekeep_core::changelog::NewChange;
use lorekeep_core::citations::CitationRequest;
use lorekeep_core::ids::{new_id, slugify};
use lorekeep_core::lore::Frontmatter;
use lorekeep_core::model::{
    ChangeSource, ChangeType, ChangelogEntry, Citation, ConfidenceLevel, DiffSummary,
    DiscoveredEntity, EntityCategory, PendingEntry, PendingKind, PendingStatus,
};

use crate::client::{CompletionRequest, parse_object};
use crate::context::Stage;
use crate::error::{AgentError, ExternalError};
use crate::images::{MAX_IMAGES, MatchedImage};
use crate::sources::{Excerpt, weakest_confidence};

/// Sources handed to the service per entity.
pub const MAX_SOURCES: usize = 5;
/// Characters of each source section included in the prompt.
const EXCERPT_CHARS: usize = 2000;

/// Shape the service is asked to reply with.
#[derive(Debug, Deserialize)]
struct GeneratedEntry {
    #[serde(default)]
    title: String,
    #[serde(default)]
    summary: String,
    body: String,
    #[serde(default)]
    connections: Vec<String>,
}

/// A generated draft and what happened to it.
#[derive(Debug, Clone)]
pub struct Drafted {
    pub entity: DiscoveredEntity,
    pub draft: PendingEntry,
    pub changelog: ChangelogEntry,
    /// Path written when the draft met the auto-approval threshold.
    pub published: Option<String>,
}

/// Generate for the highest-priority queued entity.
///
/// `Ok(None)` means nothing is queued.
pub fn generate_next(stage: Stage<'_>, now: DateTime<Utc>) -> Result<Option<Drafted>, AgentError> {
    let Some(entity) = stage.stores.discovery.claim_next()? else {
        return Ok(None);
    };
    generate_claimed(stage, entity, now).map(Some)
}

/// Generate for one entity, which must be queued.
pub fn generate_entity(stage: Stage<'_>, id: &str, now: DateTime<Utc>) -> Result<Drafted, AgentError> {
    let entity = stage.stores.discovery.claim(id)?;
    generate_claimed(stage, entity, now)
}

fn generate_claimed(
    stage: Stage<'_>,
    entity: DiscoveredEntity,
    now: DateTime<Utc>,
) -> Result<Drafted, AgentError> {
    let (draft, changelog) = match draft_entity(stage, &entity, now) {
        Ok(drafted) => drafted,
        Err(err) => {
            if let Err(requeue) = stage.stores.discovery.mark_failed(&entity.id, &err.to_string()) {
                warn!(entity = %entity.id, error = %requeue, "could not requeue entity");
            }
            return Err(err);
        }
    };

    let rule = &stage.config.auto_approve;
    let published = if rule.enabled && draft.confidence >= rule.min_confidence {
        match stage
            .stores
            .pending
            .auto_approve(&draft.id, stage.stores.publisher(), now)
        {
            Ok(published) => Some(published.path),
            Err(err) => {
                warn!(draft = %draft.id, error = %err, "auto-approval failed, draft left pending");
                None
            }
        }
    } else {
        None
    };

    Ok(Drafted {
        entity: stage.stores.discovery.get(&entity.id).unwrap_or(entity),
        draft,
        changelog,
        published,
    })
}

#[instrument(skip_all, fields(entity = %entity.name))]
fn draft_entity(
    stage: Stage<'_>,
    entity: &DiscoveredEntity,
    now: DateTime<Utc>,
) -> Result<(PendingEntry, ChangelogEntry), AgentError> {
    let excerpts = stage.library.relevant(&entity.name, MAX_SOURCES);
    if excerpts.is_empty() {
        return Err(AgentError::NoSources(entity.name.clone()));
    }
    let confidence = weakest_confidence(&excerpts);

    // Citing is idempotent per (source, topic), so a retry reuses the ids.
    let requests: Vec<CitationRequest> = excerpts
        .iter()
        .map(|e| e.doc.citation_request(&entity.name))
        .collect();
    let citations = stage.stores.citations.cite_all(&requests, now)?;

    let images = stage.library.images_for(&entity.name, MAX_IMAGES);
    let prompt = generation_prompt(entity, &excerpts, &citations, &images);
    let reply = stage
        .client
        .complete(&CompletionRequest::new(prompt, &stage.config.ai), stage.budget)?;
    let generated: GeneratedEntry = parse_object(&reply)?;
    if generated.body.trim().is_empty() {
        return Err(ExternalError::Malformed("entry body is empty".into()).into());
    }

    let title = match generated.title.trim() {
        "" => entity.name.clone(),
        t => t.to_string(),
    };
    let content = compose_entry(
        &title,
        entity.category,
        confidence,
        &generated,
        &citations,
        &images,
        now.date_naive(),
    );

    let mut draft = stage.stores.pending.add(PendingEntry {
        id: new_id("pending", now),
        kind: PendingKind::NewEntry {
            entity_id: entity.id.clone(),
        },
        title: title.clone(),
        slug: slugify(&entity.name),
        category: entity.category,
        content: content.clone(),
        citations: citations.iter().map(|c| c.id.clone()).collect(),
        confidence,
        source_files: excerpts.iter().map(|e| e.doc.path.clone()).collect(),
        connections: generated.connections.clone(),
        status: PendingStatus::Pending,
        version: 1,
        changelog_id: None,
        generated_at: now,
        reviewed_at: None,
        reviewed_by: None,
        review_notes: None,
    })?;

    let summary = match generated.summary.trim() {
        "" => entity.description.clone(),
        s => s.to_string(),
    };
    let mut change = NewChange::new(ChangeType::Create, ChangeSource::AgentResearch, &title)
        .description(summary)
        .file(draft.target_path())
        .diff(DiffSummary::between("", &content))
        .confidence(confidence)
        .pending_entry(&draft.id);
    if let Some(run) = stage.run_id {
        change = change.run(run);
    }
    let changelog = stage.stores.changelog.record(change, now)?;
    stage.stores.pending.link_changelog(&draft.id, &changelog.id)?;
    draft.changelog_id = Some(changelog.id.clone());

    stage.stores.discovery.mark_done(&entity.id, &draft.id, now)?;
    info!(
        draft = %draft.id,
        path = %draft.target_path(),
        sources = excerpts.len(),
        images = images.len(),
        %confidence,
        "entry drafted"
    );
    Ok((draft, changelog))
}

fn generation_prompt(
    entity: &DiscoveredEntity,
    excerpts: &[Excerpt<'_>],
    citations: &[Citation],
    images: &[MatchedImage],
) -> String {
    let mut sources = String::new();
    for (excerpt, citation) in excerpts.iter().zip(citations) {
        let section: String = excerpt.section.chars().take(EXCERPT_CHARS).collect();
        let _ = write!(
            sources,
            "### {} {} ({})\n{}\n\n",
            citation.marker(),
            excerpt.doc.title,
            excerpt.doc.kind,
            section
        );
    }
    let known = if entity.description.is_empty() {
        String::new()
    } else {
        format!("Known so far: {}\n\n", entity.description)
    };
    let mut pictures = String::new();
    if !images.is_empty() {
        pictures.push_str("IMAGES (attached to the entry; mention them only if relevant):\n");
        for image in images {
            let _ = writeln!(pictures, "- {}: {}", image.path, image.caption);
        }
        pictures.push('\n');
    }

    format!(
        "Write a lore compendium entry about \"{name}\" ({category}).\n\n\
         Use only the source material below. Do not invent facts. After each \
         statement, cite the source it came from with its bracketed marker, \
         for example {example}. Where sources disagree, say so.\n\n\
         {known}\
         SOURCES:\n\n{sources}\
         {pictures}\
         Return only a JSON object:\n\
         {{\"title\": \"{name}\", \"summary\": \"one or two sentences\", \
         \"body\": \"markdown using ## sections, no top-level heading\", \
         \"connections\": [\"names of related entities\"]}}",
        name = entity.name,
        category = entity.category,
        example = citations.first().map_or_else(|| "[400]".to_string(), Citation::marker),
    )
}

/// Markdown entry with frontmatter, an `## Overview` lead when the body has
/// no sections of its own, and a source list carrying every citation marker.
/// Matched images go in the frontmatter `images` list.
fn compose_entry(
    title: &str,
    category: EntityCategory,
    confidence: ConfidenceLevel,
    generated: &GeneratedEntry,
    citations: &[Citation],
    images: &[MatchedImage],
    date: NaiveDate,
) -> String {
    let mut body = format!("# {title}\n\n");
    let summary = generated.summary.trim();
    if !summary.is_empty() {
        let _ = write!(body, "{summary}\n\n");
    }
    let text = generated.body.trim();
    if !text.lines().any(|l| l.starts_with("## ")) {
        body.push_str("## Overview\n\n");
    }
    let _ = write!(body, "{text}\n\n");

    let connections: Vec<&str> = generated
        .connections
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect();
    if !connections.is_empty() {
        body.push_str("## Connections\n\n");
        for name in connections {
            let _ = writeln!(body, "- {name}");
        }
        body.push('\n');
    }

    body.push_str("## Sources\n\n");
    for citation in citations {
        let _ = writeln!(
            body,
            "- {} {} ({})",
            citation.marker(),
            citation.source,
            citation.source_kind
        );
    }

    let mut fm = Frontmatter::for_entry(title, category, confidence, date);
    if !images.is_empty() {
        match serde_yaml::to_value(images) {
            Ok(list) => fm.set("images", list),
            Err(err) => warn!(%err, "could not record matched images"),
        }
    }
    fm.render(&body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ScriptedClient;
    use crate::fixtures::{Fixture, now};
    use lorekeep_core::lore::{citation_markers, frontmatter};
    use crate::images::ImageFile;
    use lorekeep_core::model::{ChangeReviewStatus, EntityStatus, SourceKind};

    const SILVER_CITY_REPLY: &str = r#"Here is the entry:
```json
{
  "title": "Silver City",
  "summary": "A gleaming ruin where the lanterns never go out.",
  "body": "Silver City is a ruin of pale stone [400-404]. Its lanterns never go out [400-404].\n\nSome survivors believe masked builders raised it [405-409].",
  "connections": ["Gilded Lion", "The Watcher"]
}
```"#;

    #[test]
    fn drafts_entry_from_sources() {
        let fx = Fixture::silver_city();
        let entity = fx.queue_entity("Silver City", EntityCategory::Location);
        let client = ScriptedClient::new().reply(SILVER_CITY_REPLY);

        let drafted = generate_entity(fx.stage(&client), &entity.id, now()).unwrap();

        let draft = &drafted.draft;
        assert_eq!(draft.target_path(), "locations/silver-city.md");
        assert_eq!(draft.status, PendingStatus::Pending);
        assert_eq!(draft.version, 1);
        // the community source caps confidence
        assert_eq!(draft.confidence, ConfidenceLevel::Speculative);
        assert_eq!(draft.citations, vec!["400-404", "405-409"]);
        assert_eq!(
            draft.source_files,
            vec!["shop/silver-city.txt", "community/theories.md"]
        );
        assert_eq!(draft.connections, vec!["Gilded Lion", "The Watcher"]);
        assert_eq!(draft.changelog_id.as_deref(), Some(drafted.changelog.id.as_str()));

        let fm = Frontmatter::parse(&draft.content).unwrap();
        assert_eq!(fm.title().as_deref(), Some("Silver City"));
        assert_eq!(fm.category(), Some(EntityCategory::Location));
        assert_eq!(fm.confidence(), Some(ConfidenceLevel::Speculative));
        let body = frontmatter::body(&draft.content);
        assert!(body.starts_with("# Silver City\n"));
        assert!(body.contains("## Overview"));
        assert!(body.contains("- [400-404] Silver City Expansion (shop)"));
        assert!(citation_markers(body).contains(&"[405-409]".to_string()));

        assert_eq!(drafted.changelog.change_type, ChangeType::Create);
        assert_eq!(drafted.changelog.source, ChangeSource::AgentResearch);
        assert_eq!(drafted.changelog.review_status, ChangeReviewStatus::PendingReview);
        assert_eq!(drafted.changelog.run_id.as_deref(), Some("run-test"));
        assert!(drafted.published.is_none());

        let stored = fx.stores.discovery.get(&entity.id).unwrap();
        assert_eq!(stored.status, EntityStatus::Done);
        assert_eq!(stored.pending_entry_id.as_deref(), Some(draft.id.as_str()));
        assert!(!fx.stores.tree.exists("locations/silver-city.md"));

        let prompt = &client.prompts()[0];
        assert!(prompt.contains("### [400-404] Silver City Expansion (shop)"));
        assert!(prompt.contains("Silver City is a gleaming ruin"));
    }

    #[test]
    fn matched_images_reach_prompt_and_frontmatter() {
        let mut fx = Fixture::silver_city();
        fx.library = fx.library.clone().with_images(vec![
            ImageFile::new("shop/images/silver-city.png", SourceKind::Shop),
            ImageFile::new("community/images/dusk.jpg", SourceKind::Community)
                .with_caption("Silver City at dusk"),
            ImageFile::new("shop/images/gilded-lion.png", SourceKind::Shop),
        ]);
        let entity = fx.queue_entity("Silver City", EntityCategory::Location);
        let client = ScriptedClient::new().reply(SILVER_CITY_REPLY);

        let drafted = generate_entity(fx.stage(&client), &entity.id, now()).unwrap();

        let prompt = &client.prompts()[0];
        assert!(prompt.contains("- shop/images/silver-city.png: Silver City - Product image"));
        assert!(prompt.contains("- community/images/dusk.jpg: Silver City at dusk"));
        assert!(!prompt.contains("gilded-lion.png"));

        let (yaml, _, _) = frontmatter::split(&drafted.draft.content).unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(yaml).unwrap();
        let listed = parsed["images"].as_sequence().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0]["path"].as_str(), Some("shop/images/silver-city.png"));
        assert_eq!(listed[1]["caption"].as_str(), Some("Silver City at dusk"));
    }

    #[test]
    fn entries_without_images_have_no_image_list() {
        let fx = Fixture::silver_city();
        let entity = fx.queue_entity("Silver City", EntityCategory::Location);
        let client = ScriptedClient::new().reply(SILVER_CITY_REPLY);

        let drafted = generate_entity(fx.stage(&client), &entity.id, now()).unwrap();
        let fm = Frontmatter::parse(&drafted.draft.content).unwrap();
        assert!(!fm.has("images"));
        assert!(!client.prompts()[0].contains("IMAGES"));
    }

    #[test]
    fn malformed_reply_requeues_entity() {
        let fx = Fixture::silver_city();
        let entity = fx.queue_entity("Silver City", EntityCategory::Location);
        let client = ScriptedClient::new().reply("I could not find anything useful.");

        let err = generate_entity(fx.stage(&client), &entity.id, now()).unwrap_err();
        assert!(matches!(err, AgentError::External(ExternalError::Malformed(_))));
        assert!(err.is_item_failure());

        let stored = fx.stores.discovery.get(&entity.id).unwrap();
        assert_eq!(stored.status, EntityStatus::Queued);
        assert_eq!(stored.attempts, 1);
        assert!(fx.stores.pending.entries().is_empty());
        assert_eq!(fx.stores.changelog.stats().total, 0);
    }

    #[test]
    fn entity_without_sources_is_requeued() {
        let fx = Fixture::silver_city();
        let entity = fx.queue_entity("Dragon King", EntityCategory::Monster);
        let client = ScriptedClient::new();

        let err = generate_entity(fx.stage(&client), &entity.id, now()).unwrap_err();
        assert!(matches!(err, AgentError::NoSources(ref name) if name == "Dragon King"));
        assert!(client.prompts().is_empty());
        assert_eq!(
            fx.stores.discovery.get(&entity.id).unwrap().status,
            EntityStatus::Queued
        );
    }

    #[test]
    fn empty_queue_is_not_a_failure() {
        let fx = Fixture::silver_city();
        let client = ScriptedClient::new();
        assert!(generate_next(fx.stage(&client), now()).unwrap().is_none());
    }

    #[test]
    fn auto_approve_publishes_confident_drafts() {
        let mut fx = Fixture::silver_city();
        fx.config.auto_approve.enabled = true;
        fx.config.auto_approve.min_confidence = ConfidenceLevel::Confirmed;
        let entity = fx.queue_entity("Gilded Lion", EntityCategory::Monster);
        let client = ScriptedClient::new()
            .reply(r#"{"title": "Gilded Lion", "body": "A lion with a golden mane [400-404]."}"#);

        let drafted = generate_entity(fx.stage(&client), &entity.id, now()).unwrap();
        assert_eq!(drafted.draft.confidence, ConfidenceLevel::Confirmed);
        assert_eq!(drafted.published.as_deref(), Some("monsters/gilded-lion.md"));
        assert!(fx.stores.tree.exists("monsters/gilded-lion.md"));

        let change = fx.stores.changelog.get(&drafted.changelog.id).unwrap();
        assert_eq!(change.review_status, ChangeReviewStatus::AutoApproved);
        assert_eq!(change.reviewed_by.as_deref(), Some("auto-approve"));
        assert_eq!(fx.stores.changelog.stats().total, 1);
    }

    #[test]
    fn auto_approve_skips_weak_drafts() {
        let mut fx = Fixture::silver_city();
        fx.config.auto_approve.enabled = true;
        let entity = fx.queue_entity("Silver City", EntityCategory::Location);
        let client = ScriptedClient::new().reply(SILVER_CITY_REPLY);

        let drafted = generate_entity(fx.stage(&client), &entity.id, now()).unwrap();
        assert!(drafted.published.is_none());
        assert!(!fx.stores.tree.exists("locations/silver-city.md"));
    }
}
